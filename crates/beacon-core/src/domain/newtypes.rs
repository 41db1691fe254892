//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow through the store.
//! Each newtype ensures validity at construction time so the storage layer
//! can bind them as TEXT without re-checking.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Session identifier
// ============================================================================

/// Identifier of a [`SessionRecord`](super::SessionRecord)
///
/// Freshly generated ids are hyphenated UUID strings, but any non-empty
/// string read back from storage or handed over by a crash report is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier
    ///
    /// # Errors
    /// Returns error if the identifier is empty or only whitespace
    pub fn parse(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidId(
                "Session ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ============================================================================
// UUID-based ID types
// ============================================================================

/// Identifier of one running process of the host application
///
/// A new value is generated at every launch; records stamped with a
/// `ProcessId` other than the current one belong to a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// Create a new random ProcessId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a ProcessId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid ProcessId: {e}")))
    }
}

/// Identifier of a [`LogRecord`](super::LogRecord)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(Uuid);

impl LogId {
    /// Create a new random LogId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for LogId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LogId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid LogId: {e}")))
    }
}

// ============================================================================
// W3C trace context identifiers
// ============================================================================

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// 16-byte trace identifier, stored as 32 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(String);

impl TraceId {
    /// Create a new random TraceId
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create a TraceId from its hex form
    ///
    /// # Errors
    /// Returns error unless `hex` is exactly 32 lowercase hex characters
    pub fn new(hex: String) -> Result<Self, DomainError> {
        if !is_lower_hex(&hex, 32) {
            return Err(DomainError::InvalidTraceId(hex));
        }
        Ok(Self(hex))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TraceId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.0
    }
}

/// 8-byte span identifier, stored as 16 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpanId(String);

impl SpanId {
    /// Create a new random SpanId
    #[must_use]
    pub fn random() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(16);
        Self(hex)
    }

    /// Create a SpanId from its hex form
    ///
    /// # Errors
    /// Returns error unless `hex` is exactly 16 lowercase hex characters
    pub fn new(hex: String) -> Result<Self, DomainError> {
        if !is_lower_hex(&hex, 16) {
            return Err(DomainError::InvalidSpanId(hex));
        }
        Ok(Self(hex))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SpanId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SpanId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SpanId> for String {
    fn from(id: SpanId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod session_id_tests {
        use super::*;

        #[test]
        fn test_new_creates_unique_ids() {
            assert_ne!(SessionId::new(), SessionId::new());
        }

        #[test]
        fn test_parse_accepts_arbitrary_text() {
            let id: SessionId = "id1".parse().unwrap();
            assert_eq!(id.as_str(), "id1");
        }

        #[test]
        fn test_parse_rejects_blank() {
            assert!(SessionId::parse("").is_err());
            assert!(SessionId::parse("   ").is_err());
        }

        #[test]
        fn test_serde_rejects_blank() {
            let result: Result<SessionId, _> = serde_json::from_str("\"\"");
            assert!(result.is_err());
        }
    }

    mod process_id_tests {
        use super::*;

        #[test]
        fn test_from_str() {
            let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
            let id: ProcessId = uuid_str.parse().unwrap();
            assert_eq!(id.to_string(), uuid_str);
        }

        #[test]
        fn test_from_str_invalid() {
            let result: Result<ProcessId, _> = "not-a-uuid".parse();
            assert!(result.is_err());
        }
    }

    mod trace_context_tests {
        use super::*;

        #[test]
        fn test_random_ids_are_valid() {
            let trace = TraceId::random();
            assert!(TraceId::new(trace.as_str().to_string()).is_ok());

            let span = SpanId::random();
            assert_eq!(span.as_str().len(), 16);
            assert!(SpanId::new(span.as_str().to_string()).is_ok());
        }

        #[test]
        fn test_rejects_wrong_length_or_case() {
            assert!(TraceId::new("abc".to_string()).is_err());
            assert!(TraceId::new("A".repeat(32)).is_err());
            assert!(SpanId::new("0123456789abcdeF".to_string()).is_err());
            assert!(SpanId::new("0123456789abcdef".to_string()).is_ok());
        }
    }
}
