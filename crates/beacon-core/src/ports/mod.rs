//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the traits implemented by collaborators that live outside the
//! durability core.
//!
//! ## Ports Overview
//!
//! - [`IUploadClient`] - Wire transport that delivers session envelopes and crash reports
//! - [`ICrashReporter`] - Crash reporter that records the session active at crash time

pub mod crash_reporter;
pub mod upload;

pub use crash_reporter::ICrashReporter;
pub use upload::{IUploadClient, SessionInfoPayload, SessionPayload};
