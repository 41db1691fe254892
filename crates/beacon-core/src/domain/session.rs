//! SessionRecord domain entity
//!
//! A session is a bounded interval of app usage. While a session is open its
//! `end_time` is `None` and its heartbeat keeps advancing; a session found
//! open with a stale heartbeat at the next launch was abandoned by an
//! unclean termination.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ProcessId, SessionId};

/// App state recorded on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Foreground,
    Background,
}

impl AppState {
    /// Persisted tag for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Foreground => "foreground",
            AppState::Background => "background",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "foreground" => Ok(AppState::Foreground),
            "background" => Ok(AppState::Background),
            other => Err(DomainError::UnknownVariant {
                kind: "app state",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub process_id: ProcessId,
    pub state: AppState,
    pub start_time: DateTime<Utc>,
    /// `None` while the session is open
    pub end_time: Option<DateTime<Utc>>,
    pub last_heartbeat_time: DateTime<Utc>,
    /// Crash report that terminated this session, if any
    pub crash_report_id: Option<String>,
    /// First session of its process
    pub cold_start: bool,
    /// Set once the upload collaborator accepted the session
    pub sent_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Creates a new open session whose heartbeat starts at `start_time`
    pub fn new(
        id: SessionId,
        process_id: ProcessId,
        state: AppState,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            process_id,
            state,
            start_time,
            end_time: None,
            last_heartbeat_time: start_time,
            crash_report_id: None,
            cold_start: false,
            sent_at: None,
        }
    }

    /// Marks this session as the first one of its process
    pub fn with_cold_start(mut self, cold_start: bool) -> Self {
        self.cold_start = cold_start;
        self
    }

    /// Sets the end time, used for records created already closed
    pub fn with_end_time(mut self, end_time: Option<DateTime<Utc>>) -> Self {
        self.end_time = end_time;
        self
    }

    /// Returns true while the session has no end time
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Returns true once the session has an end time
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Returns true once the session was accepted for upload
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// End time, falling back to the last heartbeat for open sessions
    pub fn effective_end_time(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.last_heartbeat_time)
    }

    /// Advances the heartbeat; older timestamps are ignored
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        if at > self.last_heartbeat_time {
            self.last_heartbeat_time = at;
        }
    }

    /// Returns true if the heartbeat is older than `threshold` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat_time > threshold
    }
}
