//! Crash report and crash/session pairing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::SessionId;

/// A crash report recorded by the crash reporter
///
/// `session_id` is the session that was active when the crash happened.
/// It is how the reconciler pairs the report with a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub id: String,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub message: String,
    pub location: String,
    pub backtrace: String,
    pub platform: String,
}
