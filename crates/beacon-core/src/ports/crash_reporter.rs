//! Crash reporter port (driven/secondary port)
//!
//! The crash reporter reads the current session id at crash time and
//! persists it alongside the report. On the next launch the reconciler
//! reads the pairing back through this port.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because report storage is adapter-specific.
//! - `set_current_session_id` is synchronous and must not block: it is
//!   called from session lifecycle notifications.

use crate::domain::{CrashReport, SessionId};

/// Port trait for crash report integration
#[async_trait::async_trait]
pub trait ICrashReporter: Send + Sync {
    /// Records the session that a crash happening now belongs to
    ///
    /// `None` clears it (no session is open).
    fn set_current_session_id(&self, session_id: Option<SessionId>);

    /// Returns the session id a crash happening now would be paired with
    fn current_session_id(&self) -> Option<SessionId>;

    /// Returns reports written by previous runs that were not uploaded yet
    async fn fetch_unsent_crash_reports(&self) -> anyhow::Result<Vec<CrashReport>>;

    /// Deletes a report once it has been uploaded
    async fn delete_crash_report(&self, id: &str) -> anyhow::Result<()>;
}
