//! Upload port (driven/secondary port)
//!
//! Defines the session envelope handed to the wire transport and the
//! transport trait itself. The transport performs the HTTP exchange; a
//! returned `Ok` means the backend accepted the payload.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because transport failures are adapter-specific.
//! - The payload types are port-level DTOs with the compact wire keys used
//!   by the backend (`st`, `et`, `as`, `sn`, ...).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CrashReport, LogRecord, SessionId, SessionRecord, SpanRecord};

/// Epoch milliseconds, truncated toward the past
pub fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Compact session-info block of the upload envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfoPayload {
    #[serde(rename = "id")]
    pub session_id: SessionId,
    #[serde(rename = "st")]
    pub start_time: i64,
    #[serde(rename = "et")]
    pub end_time: i64,
    #[serde(rename = "as")]
    pub app_state: String,
    /// Per-install upload counter
    #[serde(rename = "sn")]
    pub counter: i64,
    #[serde(rename = "cs")]
    pub cold_start: bool,
    #[serde(rename = "cr", default, skip_serializing_if = "Option::is_none")]
    pub crash_report_id: Option<String>,
}

impl SessionInfoPayload {
    /// Builds the info block; open sessions end at their last heartbeat
    pub fn new(session: &SessionRecord, counter: i64) -> Self {
        Self {
            session_id: session.id.clone(),
            start_time: epoch_millis(session.start_time),
            end_time: epoch_millis(session.effective_end_time()),
            app_state: session.state.as_str().to_string(),
            counter,
            cold_start: session.cold_start,
            crash_report_id: session.crash_report_id.clone(),
        }
    }
}

/// Session envelope: info block plus everything scoped to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(rename = "s")]
    pub session: SessionInfoPayload,
    #[serde(rename = "r")]
    pub resources: BTreeMap<String, String>,
    pub spans: Vec<SpanRecord>,
    pub logs: Vec<LogRecord>,
}

/// Port trait for the wire transport
#[async_trait::async_trait]
pub trait IUploadClient: Send + Sync {
    /// Uploads one session envelope
    async fn upload_session(&self, payload: &SessionPayload) -> anyhow::Result<()>;

    /// Uploads a crash report that could not be paired with a stored session
    async fn upload_crash_report(&self, report: &CrashReport) -> anyhow::Result<()>;
}
