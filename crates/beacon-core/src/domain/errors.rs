//! Domain error types
//!
//! Errors raised while constructing or parsing domain values: identifiers,
//! persisted enum tags and configuration-level values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Trace identifier is not 32 lowercase hex characters
    #[error("Invalid trace ID: {0}")]
    InvalidTraceId(String),

    /// Span identifier is not 16 lowercase hex characters
    #[error("Invalid span ID: {0}")]
    InvalidSpanId(String),

    /// A persisted tag did not match any known variant
    #[error("Unknown {kind}: {value}")]
    UnknownVariant {
        /// The enum being parsed, e.g. `"log severity"`
        kind: &'static str,
        /// The offending stored value
        value: String,
    },

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
