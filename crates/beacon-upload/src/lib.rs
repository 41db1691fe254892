//! Beacon Upload - forwarding persisted data to the upload port
//!
//! Provides:
//! - `SessionPayloadBuilder`: assembles the session envelope from the store
//! - `UnsentDataReconciler`: one pass at startup that closes abandoned
//!   sessions, pairs crash reports and uploads everything not yet sent

pub mod payload;
pub mod reconciler;

use beacon_storage::StorageError;

pub use payload::SessionPayloadBuilder;
pub use reconciler::{ReconcileReport, UnsentDataReconciler};

/// Failures of a single reconciliation step
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crash reporter error: {0}")]
    CrashReporter(anyhow::Error),

    #[error("upload failed: {0}")]
    Upload(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
