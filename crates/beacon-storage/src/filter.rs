//! Query filters for the fetch-all operations
//!
//! Each filter is a plain struct with builder-style `with_*` setters. An
//! empty filter matches every row.

use beacon_core::domain::{LogSeverity, ProcessId, SessionId};
use chrono::{DateTime, Utc};

/// Filter criteria for [`fetch_sessions`](crate::TelemetryStore::fetch_sessions)
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions of this process
    pub process_id: Option<ProcessId>,
    /// Exclude sessions of this process
    pub excluding_process_id: Option<ProcessId>,
    /// `Some(true)` for finished sessions, `Some(false)` for open ones
    pub finished: Option<bool>,
    /// `Some(true)` for sent sessions, `Some(false)` for unsent ones
    pub sent: Option<bool>,
    /// Maximum number of rows, oldest `start_time` first
    pub limit: Option<u32>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process_id(mut self, process_id: ProcessId) -> Self {
        self.process_id = Some(process_id);
        self
    }

    pub fn excluding_process_id(mut self, process_id: ProcessId) -> Self {
        self.excluding_process_id = Some(process_id);
        self
    }

    pub fn with_finished(mut self, finished: bool) -> Self {
        self.finished = Some(finished);
        self
    }

    pub fn with_sent(mut self, sent: bool) -> Self {
        self.sent = Some(sent);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if no criteria are set
    pub fn is_empty(&self) -> bool {
        self.process_id.is_none()
            && self.excluding_process_id.is_none()
            && self.finished.is_none()
            && self.sent.is_none()
            && self.limit.is_none()
    }
}

/// Filter criteria for [`fetch_logs`](crate::TelemetryStore::fetch_logs)
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub session_id: Option<SessionId>,
    pub process_id: Option<ProcessId>,
    /// Only logs at or above this severity
    pub min_severity: Option<LogSeverity>,
    /// Only logs emitted at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_process_id(mut self, process_id: ProcessId) -> Self {
        self.process_id = Some(process_id);
        self
    }

    pub fn with_min_severity(mut self, severity: LogSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if no criteria are set
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.process_id.is_none()
            && self.min_severity.is_none()
            && self.since.is_none()
            && self.limit.is_none()
    }
}

/// Filter criteria for [`fetch_spans`](crate::TelemetryStore::fetch_spans)
#[derive(Debug, Clone, Default)]
pub struct SpanFilter {
    pub session_id: Option<SessionId>,
    pub process_id: Option<ProcessId>,
    /// `Some(true)` for finished spans, `Some(false)` for spans in flight
    pub finished: Option<bool>,
    /// Exact span name
    pub name: Option<String>,
    pub limit: Option<u32>,
}

impl SpanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_process_id(mut self, process_id: ProcessId) -> Self {
        self.process_id = Some(process_id);
        self
    }

    pub fn with_finished(mut self, finished: bool) -> Self {
        self.finished = Some(finished);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if no criteria are set
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.process_id.is_none()
            && self.finished.is_none()
            && self.name.is_none()
            && self.limit.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters_are_empty() {
        assert!(SessionFilter::new().is_empty());
        assert!(LogFilter::new().is_empty());
        assert!(SpanFilter::new().is_empty());
    }

    #[test]
    fn test_builders_set_criteria() {
        let filter = SessionFilter::new().with_finished(true).with_sent(false);
        assert_eq!(filter.finished, Some(true));
        assert_eq!(filter.sent, Some(false));
        assert!(!filter.is_empty());

        let filter = LogFilter::new().with_min_severity(LogSeverity::Error);
        assert_eq!(filter.min_severity, Some(LogSeverity::Error));
    }
}
