//! SpanRecord domain entity
//!
//! A span is mutable only while in flight (`end_time == None`). Once it has
//! an end time the stored row is final.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ProcessId, SessionId, SpanId, TraceId};
use super::value::Attributes;

/// Role of a span in a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Persisted tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

impl FromStr for SpanKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(SpanKind::Internal),
            "server" => Ok(SpanKind::Server),
            "client" => Ok(SpanKind::Client),
            "producer" => Ok(SpanKind::Producer),
            "consumer" => Ok(SpanKind::Consumer),
            other => Err(DomainError::UnknownVariant {
                kind: "span kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Reason a span ended in error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanErrorCode {
    Failure,
    UserAbandon,
    Unknown,
}

/// Final status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "code")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(Option<SpanErrorCode>),
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanStatus::Unset => write!(f, "unset"),
            SpanStatus::Ok => write!(f, "ok"),
            SpanStatus::Error(_) => write!(f, "error"),
        }
    }
}

/// A timestamped event recorded on a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// A reference from one span to another span context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default)]
    pub attributes: Attributes,
}

/// A persisted span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// `None` for root spans
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    /// `None` while the span is in flight
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub status: SpanStatus,
    pub process_id: ProcessId,
    pub session_id: Option<SessionId>,
}

impl SpanRecord {
    /// Creates an in-flight root span with a fresh trace
    pub fn new(
        name: impl Into<String>,
        kind: SpanKind,
        process_id: ProcessId,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            name: name.into(),
            kind,
            start_time,
            end_time: None,
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
            status: SpanStatus::Unset,
            process_id,
            session_id: None,
        }
    }

    /// Makes this span a child of `parent`, sharing its trace
    pub fn with_parent(mut self, parent: &SpanRecord) -> Self {
        self.trace_id = parent.trace_id.clone();
        self.parent_span_id = Some(parent.span_id.clone());
        self
    }

    /// Stamps the span with the active session
    pub fn with_session_id(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Returns true for spans without a parent
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Returns true once the span has an end time
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Ends an in-flight span
    ///
    /// # Errors
    /// Returns `InvalidState` if the span already ended
    pub fn finish(&mut self, end_time: DateTime<Utc>, status: SpanStatus) -> Result<(), DomainError> {
        if self.is_finished() {
            return Err(DomainError::InvalidState {
                from: "finished".to_string(),
                to: "finished".to_string(),
            });
        }
        self.end_time = Some(end_time);
        self.status = status;
        Ok(())
    }
}
