//! Domain records
//!
//! - Typed identifiers (sessions, processes, logs, trace context)
//! - Sessions, spans, logs, resources
//! - Crash reports and their session pairing
//! - Domain-specific error types

pub mod crash;
pub mod errors;
pub mod log;
pub mod newtypes;
pub mod resource;
pub mod session;
pub mod span;
pub mod value;

// Re-export commonly used types
pub use crash::CrashReport;
pub use errors::DomainError;
pub use log::{LogRecord, LogSeverity};
pub use newtypes::*;
pub use resource::{ResourceKey, ResourceRecord, ResourceType};
pub use session::{AppState, SessionRecord};
pub use span::{SpanErrorCode, SpanEvent, SpanKind, SpanLink, SpanRecord, SpanStatus};
pub use value::{Attributes, PersistableValue};
