//! Beacon Core - telemetry domain model and ports
//!
//! This crate contains the hexagonal core shared by every Beacon crate:
//! - **Domain records** - `SessionRecord`, `SpanRecord`, `LogRecord`, `ResourceRecord`, `CrashReport`
//! - **Typed identifiers** - `SessionId`, `ProcessId`, `LogId`, `TraceId`, `SpanId`
//! - **Configuration** - YAML-backed [`config::Config`] with validation and a builder
//! - **Port definitions** - `IUploadClient`, `ICrashReporter`
//!
//! # Architecture
//!
//! The domain module holds plain data types with no I/O. Ports define the
//! traits implemented by the excluded collaborators (transport, crash
//! reporter). Storage, batching, lifecycle and reconciliation live in the
//! adapter crates that depend on this one.

pub mod config;
pub mod domain;
pub mod ports;
