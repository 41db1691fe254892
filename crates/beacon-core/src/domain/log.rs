//! LogRecord domain entity

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{LogId, ProcessId, SessionId};
use super::value::Attributes;

/// Log severity, ordered `Info < Warn < Error < Fatal`
///
/// Discriminants are the OpenTelemetry SeverityNumber of each level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Info = 9,
    Warn = 13,
    Error = 17,
    Fatal = 24,
}

impl LogSeverity {
    /// OpenTelemetry SeverityNumber
    pub fn number(&self) -> i32 {
        *self as i32
    }

    /// OpenTelemetry SeverityText
    pub fn text(&self) -> &'static str {
        match self {
            LogSeverity::Info => "INFO",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERROR",
            LogSeverity::Fatal => "FATAL",
        }
    }

    /// Maps any OpenTelemetry SeverityNumber (1..=24) onto the four
    /// persisted levels. TRACE and DEBUG collapse into `Info`.
    pub fn from_otel_number(number: i32) -> Self {
        match number {
            n if n >= 21 => LogSeverity::Fatal,
            17..=20 => LogSeverity::Error,
            13..=16 => LogSeverity::Warn,
            _ => LogSeverity::Info,
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

impl FromStr for LogSeverity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogSeverity::Info),
            "WARN" => Ok(LogSeverity::Warn),
            "ERROR" => Ok(LogSeverity::Error),
            "FATAL" => Ok(LogSeverity::Fatal),
            other => Err(DomainError::UnknownVariant {
                kind: "log severity",
                value: other.to_string(),
            }),
        }
    }
}

/// An immutable persisted log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: LogId,
    pub process_id: ProcessId,
    /// Session active when the log was emitted
    pub session_id: Option<SessionId>,
    pub severity: LogSeverity,
    pub body: String,
    pub attributes: Attributes,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Creates a log with a fresh id and no attributes
    pub fn new(
        process_id: ProcessId,
        severity: LogSeverity,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogId::new(),
            process_id,
            session_id: None,
            severity,
            body: body.into(),
            attributes: Attributes::new(),
            timestamp,
        }
    }

    /// Stamps the log with the active session
    pub fn with_session_id(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Replaces the attribute map
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(LogSeverity::Info < LogSeverity::Warn);
        assert!(LogSeverity::Warn < LogSeverity::Error);
        assert!(LogSeverity::Error < LogSeverity::Fatal);
    }

    #[test]
    fn test_severity_numbers_follow_otel() {
        assert_eq!(LogSeverity::Info.number(), 9);
        assert_eq!(LogSeverity::Warn.number(), 13);
        assert_eq!(LogSeverity::Error.number(), 17);
        assert_eq!(LogSeverity::Fatal.number(), 24);
    }

    #[test]
    fn test_from_otel_number() {
        assert_eq!(LogSeverity::from_otel_number(1), LogSeverity::Info);
        assert_eq!(LogSeverity::from_otel_number(14), LogSeverity::Warn);
        assert_eq!(LogSeverity::from_otel_number(20), LogSeverity::Error);
        assert_eq!(LogSeverity::from_otel_number(22), LogSeverity::Fatal);
    }

    #[test]
    fn test_severity_text_round_trip() {
        for s in [
            LogSeverity::Info,
            LogSeverity::Warn,
            LogSeverity::Error,
            LogSeverity::Fatal,
        ] {
            assert_eq!(s.text().parse::<LogSeverity>().unwrap(), s);
        }
    }
}
