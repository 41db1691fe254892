//! OpenTelemetry-shaped exporter adapters
//!
//! The exporters are the boundary where instrumentation hands over logs
//! and ended spans. They convert the incoming records into store records,
//! stamp the current process and session, and forward them to a batcher.
//! Persistence happens asynchronously, so `export` only fails after
//! `shutdown`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use beacon_core::domain::{
    Attributes, LogId, LogRecord, LogSeverity, PersistableValue, ProcessId, SessionId, SpanEvent,
    SpanId, SpanKind, SpanLink, SpanRecord, SpanStatus, TraceId,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::batcher::{LogBatcher, SpanBatcher};

/// Result of an export call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    Success,
    Failure,
}

/// Source of the session id stamped on exported records
pub trait CurrentSession: Send + Sync + 'static {
    fn current_session_id(&self) -> Option<SessionId>;
}

impl<F> CurrentSession for F
where
    F: Fn() -> Option<SessionId> + Send + Sync + 'static,
{
    fn current_session_id(&self) -> Option<SessionId> {
        self()
    }
}

// ============================================================================
// Incoming record shapes
// ============================================================================

/// Attribute value as produced by instrumentation
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    StringArray(Vec<String>),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
}

impl AttributeValue {
    /// Scalars are kept as is; arrays become their JSON text
    ///
    /// Non-finite doubles are stored as "NaN", "inf" or "-inf", also inside
    /// arrays.
    pub fn into_persistable(self) -> PersistableValue {
        let array = match self {
            AttributeValue::String(s) => return PersistableValue::String(s),
            AttributeValue::Bool(b) => return PersistableValue::Bool(b),
            AttributeValue::Int(i) => return PersistableValue::Int(i),
            AttributeValue::Double(d) => return PersistableValue::from(d),
            AttributeValue::StringArray(values) => Value::from(values),
            AttributeValue::BoolArray(values) => Value::from(values),
            AttributeValue::IntArray(values) => Value::from(values),
            AttributeValue::DoubleArray(values) => values.into_iter().map(double_json).collect(),
        };
        PersistableValue::String(array.to_string())
    }
}

fn double_json(d: f64) -> Value {
    if d.is_finite() {
        Value::from(d)
    } else {
        Value::String(d.to_string())
    }
}

fn persistable(attributes: BTreeMap<String, AttributeValue>) -> Attributes {
    attributes
        .into_iter()
        .map(|(key, value)| (key, value.into_persistable()))
        .collect()
}

/// A log record as emitted by an OpenTelemetry logger
#[derive(Debug, Clone, PartialEq)]
pub struct ReadableLogRecord {
    pub timestamp: DateTime<Utc>,
    /// OpenTelemetry SeverityNumber; `None` maps to info
    pub severity_number: Option<i32>,
    pub body: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadableSpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadableSpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// An ended span as handed to span exporters
#[derive(Debug, Clone, PartialEq)]
pub struct ReadableSpan {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub events: Vec<ReadableSpanEvent>,
    pub links: Vec<ReadableSpanLink>,
    pub status: SpanStatus,
}

// ============================================================================
// StorageLogExporter
// ============================================================================

/// Exports logs into the store through a [`LogBatcher`]
pub struct StorageLogExporter {
    batcher: LogBatcher,
    process_id: ProcessId,
    session: Arc<dyn CurrentSession>,
    active: AtomicBool,
}

impl StorageLogExporter {
    pub fn new(batcher: LogBatcher, process_id: ProcessId, session: Arc<dyn CurrentSession>) -> Self {
        Self {
            batcher,
            process_id,
            session,
            active: AtomicBool::new(true),
        }
    }

    pub fn export(&self, records: &[ReadableLogRecord]) -> ExportResult {
        if !self.active.load(Ordering::Acquire) {
            return ExportResult::Failure;
        }

        let session_id = self.session.current_session_id();
        for record in records {
            self.batcher
                .add_record(self.build_log_record(record.clone(), session_id.clone()));
        }
        ExportResult::Success
    }

    fn build_log_record(&self, record: ReadableLogRecord, session_id: Option<SessionId>) -> LogRecord {
        LogRecord {
            id: LogId::new(),
            process_id: self.process_id,
            session_id,
            severity: record
                .severity_number
                .map_or(LogSeverity::Info, LogSeverity::from_otel_number),
            body: record.body.unwrap_or_default(),
            attributes: persistable(record.attributes),
            timestamp: record.timestamp,
        }
    }

    /// Flushes buffered logs to the store
    pub fn force_flush(&self) -> ExportResult {
        drop(self.batcher.flush());
        ExportResult::Success
    }

    /// Rejects every later export; idempotent
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::debug!("Log exporter shut down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

// ============================================================================
// StorageSpanExporter
// ============================================================================

/// Exports ended spans into the store through a [`SpanBatcher`]
pub struct StorageSpanExporter {
    batcher: SpanBatcher,
    process_id: ProcessId,
    session: Arc<dyn CurrentSession>,
    active: AtomicBool,
}

impl StorageSpanExporter {
    pub fn new(batcher: SpanBatcher, process_id: ProcessId, session: Arc<dyn CurrentSession>) -> Self {
        Self {
            batcher,
            process_id,
            session,
            active: AtomicBool::new(true),
        }
    }

    pub fn export(&self, spans: &[ReadableSpan]) -> ExportResult {
        if !self.active.load(Ordering::Acquire) {
            return ExportResult::Failure;
        }

        let session_id = self.session.current_session_id();
        for span in spans {
            self.batcher
                .add_record(self.build_span_record(span.clone(), session_id.clone()));
        }
        ExportResult::Success
    }

    fn build_span_record(&self, span: ReadableSpan, session_id: Option<SessionId>) -> SpanRecord {
        SpanRecord {
            trace_id: span.trace_id,
            span_id: span.span_id,
            parent_span_id: span.parent_span_id,
            name: span.name,
            kind: span.kind,
            start_time: span.start_time,
            end_time: span.end_time,
            attributes: persistable(span.attributes),
            events: span
                .events
                .into_iter()
                .map(|event| SpanEvent {
                    name: event.name,
                    timestamp: event.timestamp,
                    attributes: persistable(event.attributes),
                })
                .collect(),
            links: span
                .links
                .into_iter()
                .map(|link| SpanLink {
                    trace_id: link.trace_id,
                    span_id: link.span_id,
                    attributes: persistable(link.attributes),
                })
                .collect(),
            status: span.status,
            process_id: self.process_id,
            session_id,
        }
    }

    /// Flushes buffered spans to the store
    pub fn force_flush(&self) -> ExportResult {
        drop(self.batcher.flush());
        ExportResult::Success
    }

    /// Rejects every later export; idempotent
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::debug!("Span exporter shut down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_core::config::BatchingConfig;
    use beacon_core::domain::SpanErrorCode;
    use beacon_storage::{LogFilter, SpanFilter, StoreHandle, TelemetryStore, WriteSerializer};

    use super::*;
    use crate::batcher::{BatchLimits, Batcher};
    use crate::validation::{default_log_validators, default_span_validators};

    async fn handle() -> StoreHandle {
        let store = TelemetryStore::in_memory().await.unwrap();
        WriteSerializer::spawn(store).0
    }

    fn limits() -> BatchLimits {
        BatchLimits {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(3600),
        }
    }

    fn fixed_session() -> Arc<dyn CurrentSession> {
        Arc::new(|| Some(SessionId::parse("session-1").unwrap()))
    }

    fn readable_log(body: Option<&str>, severity_number: Option<i32>) -> ReadableLogRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("tags".to_string(), AttributeValue::StringArray(vec!["a".into(), "b".into()]));
        attributes.insert("retries".to_string(), AttributeValue::Int(2));
        ReadableLogRecord {
            timestamp: Utc::now(),
            severity_number,
            body: body.map(str::to_string),
            attributes,
        }
    }

    #[test]
    fn test_arrays_are_stringified() {
        assert_eq!(
            AttributeValue::IntArray(vec![1, 2]).into_persistable(),
            PersistableValue::String("[1,2]".to_string())
        );
        assert_eq!(
            AttributeValue::Bool(true).into_persistable(),
            PersistableValue::Bool(true)
        );
    }

    #[test]
    fn test_non_finite_doubles_are_stringified() {
        assert_eq!(
            AttributeValue::Double(f64::NAN).into_persistable(),
            PersistableValue::String("NaN".to_string())
        );
        assert_eq!(
            AttributeValue::Double(0.25).into_persistable(),
            PersistableValue::Double(0.25)
        );
        assert_eq!(
            AttributeValue::DoubleArray(vec![1.5, f64::INFINITY]).into_persistable(),
            PersistableValue::String(r#"[1.5,"inf"]"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_non_finite_attribute_keeps_session_readable() {
        let handle = handle().await;
        let config = BatchingConfig::default();
        let batcher = Batcher::new("log", handle.clone(), default_log_validators(&config), limits());
        let exporter = StorageLogExporter::new(batcher, ProcessId::new(), fixed_session());

        let mut odd = readable_log(Some("ratio"), None);
        odd.attributes.insert("ratio".to_string(), AttributeValue::Double(f64::NAN));
        odd.attributes
            .insert("samples".to_string(), AttributeValue::DoubleArray(vec![f64::NEG_INFINITY]));
        exporter.export(&[readable_log(Some("plain"), None), odd]);
        exporter.force_flush();

        let logs = handle
            .fetch_logs(LogFilter::new().with_session_id(SessionId::parse("session-1").unwrap()))
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        let stored = logs.iter().find(|l| l.body == "ratio").unwrap();
        assert_eq!(stored.attributes.get("ratio"), Some(&PersistableValue::from("NaN")));
        assert_eq!(
            stored.attributes.get("samples"),
            Some(&PersistableValue::String(r#"["-inf"]"#.to_string()))
        );
    }

    #[tokio::test]
    async fn test_log_export_stamps_process_and_session() {
        let handle = handle().await;
        let config = BatchingConfig::default();
        let batcher = Batcher::new("log", handle.clone(), default_log_validators(&config), limits());
        let process_id = ProcessId::new();
        let exporter = StorageLogExporter::new(batcher, process_id, fixed_session());

        let result = exporter.export(&[readable_log(Some("hello"), Some(17)), readable_log(None, None)]);
        assert_eq!(result, ExportResult::Success);
        assert_eq!(exporter.force_flush(), ExportResult::Success);

        let logs = handle.fetch_logs(LogFilter::new()).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.process_id == process_id));
        assert!(logs
            .iter()
            .all(|l| l.session_id.as_ref().map(SessionId::as_str) == Some("session-1")));

        let hello = logs.iter().find(|l| l.body == "hello").unwrap();
        assert_eq!(hello.severity, LogSeverity::Error);
        assert_eq!(
            hello.attributes.get("tags"),
            Some(&PersistableValue::String(r#"["a","b"]"#.to_string()))
        );
        assert_eq!(hello.attributes.get("retries"), Some(&PersistableValue::Int(2)));

        let empty = logs.iter().find(|l| l.body.is_empty()).unwrap();
        assert_eq!(empty.severity, LogSeverity::Info);
    }

    #[tokio::test]
    async fn test_export_fails_after_shutdown() {
        let handle = handle().await;
        let config = BatchingConfig::default();
        let batcher = Batcher::new("log", handle.clone(), default_log_validators(&config), limits());
        let exporter = StorageLogExporter::new(batcher, ProcessId::new(), Arc::new(|| None::<SessionId>));

        exporter.shutdown();
        exporter.shutdown();
        assert!(!exporter.is_active());
        assert_eq!(
            exporter.export(&[readable_log(Some("late"), None)]),
            ExportResult::Failure
        );
        exporter.force_flush();
        assert!(handle.fetch_logs(LogFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_span_export_converts_events_and_validates() {
        let handle = handle().await;
        let config = BatchingConfig::default();
        let batcher = Batcher::new("span", handle.clone(), default_span_validators(&config), limits());
        let exporter = StorageSpanExporter::new(batcher, ProcessId::new(), fixed_session());

        let now = Utc::now();
        let mut event_attributes = BTreeMap::new();
        event_attributes.insert("codes".to_string(), AttributeValue::IntArray(vec![500, 503]));
        let good = ReadableSpan {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            name: "checkout".to_string(),
            kind: SpanKind::Client,
            start_time: now,
            end_time: Some(now + chrono::Duration::milliseconds(30)),
            attributes: BTreeMap::new(),
            events: vec![ReadableSpanEvent {
                name: "retry".to_string(),
                timestamp: now,
                attributes: event_attributes,
            }],
            links: Vec::new(),
            status: SpanStatus::Error(Some(SpanErrorCode::Failure)),
        };
        let mut blank = good.clone();
        blank.span_id = SpanId::random();
        blank.name = "  ".to_string();

        assert_eq!(exporter.export(&[good.clone(), blank]), ExportResult::Success);
        exporter.force_flush();

        let spans = handle.fetch_spans(SpanFilter::new()).await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_id, good.span_id);
        assert_eq!(spans[0].status, good.status);
        assert_eq!(
            spans[0].events[0].attributes.get("codes"),
            Some(&PersistableValue::String("[500,503]".to_string()))
        );
    }
}
