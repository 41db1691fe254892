//! Beacon Pipeline - validation and batching in front of the store
//!
//! Producers hand records to a [`Batcher`] (directly, or through the
//! OpenTelemetry-shaped exporters). Each record is validated, buffered in
//! memory and flushed to the store as one batched write when the buffer is
//! full, when the flush interval elapses, or on demand.
//!
//! ## Key Components
//!
//! - [`validation`] - `Validator` trait, ordered chains and the default validators
//! - [`batcher`] - Generic `Batcher` with its `BatchSink` seam and flush timer
//! - [`exporter`] - `StorageLogExporter` and `StorageSpanExporter`

pub mod batcher;
pub mod exporter;
pub mod validation;

pub use batcher::{BatchLimits, BatchSink, Batcher, LogBatcher, SpanBatcher};
pub use exporter::{
    AttributeValue, CurrentSession, ExportResult, ReadableLogRecord, ReadableSpan,
    ReadableSpanEvent, ReadableSpanLink, StorageLogExporter, StorageSpanExporter,
};
pub use validation::{
    default_log_validators, default_span_validators, BodyLengthValidator,
    SpanNameLengthValidator, Validator, ValidatorChain, Verdict, WhitespaceSpanNameValidator,
};
