//! Beacon Storage - durable local telemetry store
//!
//! SQLite-based persistence for:
//! - Sessions and their heartbeats
//! - Spans (in flight and finished)
//! - Logs
//! - Scoped resources
//!
//! ## Architecture
//!
//! Every write is one SQLite transaction on a single-connection writer pool,
//! so writers never contend with each other. Reads go through a separate
//! reader pool and see committed snapshots thanks to WAL journaling.
//!
//! ## Key Components
//!
//! - [`StoragePool`] - Writer and reader pools with migration support
//! - [`TelemetryStore`] - Direct async query surface
//! - [`WriteSerializer`] / [`StoreHandle`] - Queued form; operations run in
//!   submission order and complete through a [`Pending`] value
//! - [`StorageError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use beacon_core::config::StorageConfig;
//! use beacon_storage::{StoragePool, TelemetryStore, WriteSerializer};
//!
//! # async fn example() -> Result<(), beacon_storage::StorageError> {
//! let pool = StoragePool::open(Path::new("/tmp/beacon/db.sqlite"), &StorageConfig::default()).await?;
//! let store = TelemetryStore::new(pool);
//! let (handle, _task) = WriteSerializer::spawn(store.clone());
//! let count = handle.finished_sessions_count().await?;
//! # let _ = count;
//! # Ok(())
//! # }
//! ```

pub mod filter;
pub mod pool;
pub mod serializer;
pub mod store;

pub use filter::{LogFilter, SessionFilter, SpanFilter};
pub use pool::StoragePool;
pub use serializer::{Pending, StoreHandle, WriteSerializer};
pub use store::TelemetryStore;

use beacon_core::domain::DomainError;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The database could not be opened or migrated
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// An update targeted a record that does not exist
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A write would break a uniqueness or immutability rule
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other database failure
    #[error("Storage I/O error: {0}")]
    Io(String),

    /// A stored value could not be mapped to or from a domain record
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_unique_violation() || db_err.message().contains("constraint failed") {
                return StorageError::ConstraintViolation(db_err.message().to_string());
            }
        }
        StorageError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<DomainError> for StorageError {
    fn from(e: DomainError) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
