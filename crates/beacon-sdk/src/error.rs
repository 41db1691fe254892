//! SDK construction errors

use beacon_core::config::ValidationError;
use beacon_storage::StorageError;
use thiserror::Error;

/// Failures while constructing a [`Beacon`](crate::Beacon)
///
/// Runtime store failures never surface here; they are logged by the
/// component that hit them.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid configuration: {}", join(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
