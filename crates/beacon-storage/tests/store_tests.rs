//! Integration tests for the telemetry store

use beacon_core::config::StorageConfig;
use beacon_core::domain::{
    AppState, Attributes, LogRecord, LogSeverity, PersistableValue, ProcessId, ResourceKey,
    ResourceRecord, ResourceType, SessionId, SessionRecord, SpanErrorCode, SpanEvent, SpanKind,
    SpanRecord, SpanStatus,
};
use beacon_storage::{
    LogFilter, SessionFilter, SpanFilter, StorageError, StoragePool, TelemetryStore,
    WriteSerializer,
};
use chrono::{Duration, TimeZone, Utc};

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn session(id: &str, process_id: ProcessId, start: i64) -> SessionRecord {
    SessionRecord::new(
        SessionId::parse(id).unwrap(),
        process_id,
        AppState::Foreground,
        at(start),
    )
}

fn sid(id: &str) -> SessionId {
    SessionId::parse(id).unwrap()
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_finished_count_and_fetch_finished() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();

    store.add_session(&session("id1", pid, 0)).await.unwrap();
    store
        .add_session(&session("id2", pid, 1).with_end_time(Some(at(2))))
        .await
        .unwrap();
    store
        .add_session(&session("id3", pid, 3).with_end_time(Some(at(4))))
        .await
        .unwrap();

    assert_eq!(store.finished_sessions_count().await.unwrap(), 2);

    let finished: Vec<String> = store
        .fetch_finished_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id.to_string())
        .collect();
    assert_eq!(finished, vec!["id2", "id3"]);

    let open = store.fetch_open_sessions().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id.as_str(), "id1");
}

#[tokio::test]
async fn test_add_duplicate_session_is_constraint_violation() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();

    store.add_session(&session("dup", pid, 0)).await.unwrap();
    let result = store.add_session(&session("dup", pid, 5)).await;
    assert!(matches!(result, Err(StorageError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_upsert_session_is_idempotent() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();
    let mut record = session("up", pid, 0);

    store.upsert_session(&record).await.unwrap();
    record.state = AppState::Background;
    record.end_time = Some(at(10));
    store.upsert_session(&record).await.unwrap();
    store.upsert_session(&record).await.unwrap();

    let all = store.fetch_sessions(&SessionFilter::new()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0], record);
}

#[tokio::test]
async fn test_session_round_trips_every_field() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let mut record = session("full", ProcessId::new(), 0).with_cold_start(true);
    record.record_heartbeat(Utc.timestamp_opt(1_700_000_003, 987_654_321).unwrap());
    record.crash_report_id = Some("crash-1".to_string());
    record.sent_at = Some(at(20));
    record.end_time = Some(at(9));

    store.add_session(&record).await.unwrap();
    let fetched = store.fetch_session(&record.id).await.unwrap().unwrap();
    assert_eq!(fetched, record);
}

#[tokio::test]
async fn test_updates_of_missing_session_are_not_found() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let missing = sid("missing");

    assert!(matches!(
        store.update_session_end_time(&missing, at(1)).await,
        Err(StorageError::RecordNotFound(_))
    ));
    assert!(matches!(
        store.update_session_heartbeat(&missing, at(1)).await,
        Err(StorageError::RecordNotFound(_))
    ));
    assert!(matches!(
        store.update_session_state(&missing, AppState::Background).await,
        Err(StorageError::RecordNotFound(_))
    ));
    assert!(matches!(
        store.mark_session_sent(&missing, at(1)).await,
        Err(StorageError::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn test_heartbeat_never_moves_backwards() {
    let store = TelemetryStore::in_memory().await.unwrap();
    store
        .add_session(&session("hb", ProcessId::new(), 0))
        .await
        .unwrap();

    store.update_session_heartbeat(&sid("hb"), at(10)).await.unwrap();
    store.update_session_heartbeat(&sid("hb"), at(5)).await.unwrap();

    let fetched = store.fetch_session(&sid("hb")).await.unwrap().unwrap();
    assert_eq!(fetched.last_heartbeat_time, at(10));
}

#[tokio::test]
async fn test_latest_session_has_greatest_start_time() {
    let store = TelemetryStore::in_memory().await.unwrap();
    for (id, start) in [("a", 0), ("b", 1), ("c", 2)] {
        store
            .add_session(&session(id, ProcessId::new(), start))
            .await
            .unwrap();
    }

    let latest = store.fetch_latest_session().await.unwrap().unwrap();
    assert_eq!(latest.id.as_str(), "c");
}

#[tokio::test]
async fn test_unsent_finished_sessions_exclude_sent_ones() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();
    store
        .add_session(&session("sent", pid, 0).with_end_time(Some(at(1))))
        .await
        .unwrap();
    store
        .add_session(&session("unsent", pid, 2).with_end_time(Some(at(3))))
        .await
        .unwrap();
    store.add_session(&session("open", pid, 4)).await.unwrap();

    store.mark_session_sent(&sid("sent"), at(5)).await.unwrap();

    let unsent = store.fetch_unsent_finished_sessions().await.unwrap();
    assert_eq!(unsent.len(), 1);
    assert_eq!(unsent[0].id.as_str(), "unsent");
}

#[tokio::test]
async fn test_session_filter_by_process() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let mine = ProcessId::new();
    let other = ProcessId::new();
    store.add_session(&session("m", mine, 0)).await.unwrap();
    store.add_session(&session("o", other, 1)).await.unwrap();

    let others = store
        .fetch_sessions(&SessionFilter::new().excluding_process_id(mine))
        .await
        .unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].process_id, other);

    let limited = store
        .fetch_sessions(&SessionFilter::new().with_limit(1))
        .await
        .unwrap();
    assert_eq!(limited[0].id.as_str(), "m");
}

#[tokio::test]
async fn test_crash_report_pairing_and_delete() {
    let store = TelemetryStore::in_memory().await.unwrap();
    store
        .add_session(&session("crashed", ProcessId::new(), 0))
        .await
        .unwrap();

    store
        .set_session_crash_report(&sid("crashed"), "report-7")
        .await
        .unwrap();
    let fetched = store.fetch_session(&sid("crashed")).await.unwrap().unwrap();
    assert_eq!(fetched.crash_report_id.as_deref(), Some("report-7"));

    store.delete_session(&sid("crashed")).await.unwrap();
    assert!(!store.session_exists(&sid("crashed")).await.unwrap());
}

// ============================================================================
// Resources
// ============================================================================

#[tokio::test]
async fn test_resource_upsert_replaces_value_in_scope() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();

    store
        .upsert_resource(&ResourceRecord::process(ResourceKey::AppVersion, "1.0", pid))
        .await
        .unwrap();
    store
        .upsert_resource(&ResourceRecord::process(ResourceKey::AppVersion, "1.1", pid))
        .await
        .unwrap();

    let found = store
        .fetch_resource_in_scope(&ResourceKey::AppVersion, ResourceType::Process, &pid.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.value, "1.1");
    assert_eq!(
        store.fetch_all_resources_for_process(&pid).await.unwrap().len(),
        1
    );

    let dup = store
        .add_resource(&ResourceRecord::process(ResourceKey::AppVersion, "1.2", pid))
        .await;
    assert!(matches!(dup, Err(StorageError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_fetch_resource_prefers_permanent_scope() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let key = ResourceKey::Custom("device.model".to_string());

    store
        .add_resource(&ResourceRecord::process(key.clone(), "process-value", ProcessId::new()))
        .await
        .unwrap();
    assert_eq!(
        store.fetch_resource(&key).await.unwrap().unwrap().value,
        "process-value"
    );

    store
        .add_resource(&ResourceRecord::permanent(key.clone(), "permanent-value"))
        .await
        .unwrap();
    assert_eq!(
        store.fetch_resource(&key).await.unwrap().unwrap().value,
        "permanent-value"
    );
}

#[tokio::test]
async fn test_resources_for_session_cover_three_scopes() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();
    let other_pid = ProcessId::new();
    store.add_session(&session("s", pid, 0)).await.unwrap();

    store
        .add_resource(&ResourceRecord::session("session.key", "a", &sid("s")))
        .await
        .unwrap();
    store
        .add_resource(&ResourceRecord::session("session.key", "other", &sid("t")))
        .await
        .unwrap();
    store
        .add_resource(&ResourceRecord::process(ResourceKey::SdkVersion, "6.0", pid))
        .await
        .unwrap();
    store
        .add_resource(&ResourceRecord::process(ResourceKey::SdkVersion, "5.0", other_pid))
        .await
        .unwrap();
    store
        .add_resource(&ResourceRecord::permanent(ResourceKey::AppLaunchCount, "3"))
        .await
        .unwrap();

    let visible = store.fetch_all_resources_for_session(&sid("s")).await.unwrap();
    let mut values: Vec<&str> = visible.iter().map(|r| r.value.as_str()).collect();
    values.sort_unstable();
    assert_eq!(values, vec!["3", "6.0", "a"]);
}

#[tokio::test]
async fn test_permanent_counter_starts_at_one_and_increments() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let key = ResourceKey::SessionUploadIndex;

    assert_eq!(store.increment_permanent_counter(&key).await.unwrap(), 1);
    assert_eq!(store.increment_permanent_counter(&key).await.unwrap(), 2);
    assert_eq!(
        store.fetch_resource(&key).await.unwrap().unwrap().value,
        "2"
    );

    store
        .delete_resource(&key, ResourceType::Permanent, "")
        .await
        .unwrap();
    assert!(store.fetch_resource(&key).await.unwrap().is_none());
}

// ============================================================================
// Logs
// ============================================================================

#[tokio::test]
async fn test_log_round_trips_unchanged() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let mut attributes = Attributes::new();
    attributes.insert("count".into(), PersistableValue::Int(3));
    attributes.insert("ratio".into(), PersistableValue::Double(0.5));
    attributes.insert("ok".into(), PersistableValue::Bool(true));
    attributes.insert("who".into(), "me".into());

    let log = LogRecord::new(ProcessId::new(), LogSeverity::Warn, "hello", Utc::now())
        .with_session_id(Some(sid("s")))
        .with_attributes(attributes);

    store.add_log_record(&log).await.unwrap();
    let fetched = store.fetch_log_record(&log.id).await.unwrap().unwrap();
    assert_eq!(fetched, log);
}

#[tokio::test]
async fn test_non_finite_attribute_does_not_break_session_reads() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();
    let plain = LogRecord::new(pid, LogSeverity::Info, "plain", at(0)).with_session_id(Some(sid("s")));

    let mut attributes = Attributes::new();
    attributes.insert("ratio".into(), PersistableValue::Double(f64::NAN));
    let odd = LogRecord::new(pid, LogSeverity::Info, "odd", at(1))
        .with_session_id(Some(sid("s")))
        .with_attributes(attributes.clone());

    store.add_log_record(&plain).await.unwrap();
    store.add_log_record(&odd).await.unwrap();

    let mut record = span("measure", 2).with_session_id(Some(sid("s")));
    record.attributes = attributes;
    store.add_span_record(&record).await.unwrap();

    let logs = store
        .fetch_logs(&LogFilter::new().with_session_id(sid("s")))
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].attributes["ratio"], PersistableValue::from("NaN"));

    let spans = store
        .fetch_spans(&SpanFilter::new().with_session_id(sid("s")))
        .await
        .unwrap();
    assert_eq!(spans[0].attributes["ratio"], PersistableValue::from("NaN"));
}

#[tokio::test]
async fn test_batched_logs_are_atomic() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();
    let first = LogRecord::new(pid, LogSeverity::Info, "one", at(0));
    let second = LogRecord::new(pid, LogSeverity::Info, "two", at(1));

    store.add_log_record(&first).await.unwrap();

    // `first` collides, so `second` must not be stored either
    let result = store.add_log_records(&[second.clone(), first.clone()]).await;
    assert!(matches!(result, Err(StorageError::ConstraintViolation(_))));
    assert!(store.fetch_log_record(&second.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_log_filters() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let pid = ProcessId::new();
    let logs = vec![
        LogRecord::new(pid, LogSeverity::Info, "a", at(0)).with_session_id(Some(sid("s1"))),
        LogRecord::new(pid, LogSeverity::Error, "b", at(1)).with_session_id(Some(sid("s1"))),
        LogRecord::new(pid, LogSeverity::Fatal, "c", at(2)).with_session_id(Some(sid("s2"))),
    ];
    store.add_log_records(&logs).await.unwrap();

    let s1 = store
        .fetch_logs(&LogFilter::new().with_session_id(sid("s1")))
        .await
        .unwrap();
    assert_eq!(s1.len(), 2);

    let severe = store
        .fetch_logs(&LogFilter::new().with_min_severity(LogSeverity::Error))
        .await
        .unwrap();
    let bodies: Vec<&str> = severe.iter().map(|l| l.body.as_str()).collect();
    assert_eq!(bodies, vec!["b", "c"]);

    let recent = store
        .fetch_logs(&LogFilter::new().with_since(at(2)))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);

    assert_eq!(store.delete_logs_for_session(&sid("s1")).await.unwrap(), 2);
    assert_eq!(store.fetch_logs(&LogFilter::new()).await.unwrap().len(), 1);
}

// ============================================================================
// Spans
// ============================================================================

fn span(name: &str, start: i64) -> SpanRecord {
    SpanRecord::new(name, SpanKind::Client, ProcessId::new(), at(start))
}

#[tokio::test]
async fn test_span_round_trips_events_and_status() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let mut record = span("network", 0).with_session_id(Some(sid("s")));
    record.events.push(SpanEvent {
        name: "retry".to_string(),
        timestamp: at(1),
        attributes: Attributes::new(),
    });
    record
        .finish(at(2), SpanStatus::Error(Some(SpanErrorCode::Failure)))
        .unwrap();

    store.add_span_record(&record).await.unwrap();
    let fetched = store
        .fetch_span(&record.trace_id, &record.span_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched, record);
}

#[tokio::test]
async fn test_upsert_over_finished_span_is_rejected() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let mut record = span("op", 0);

    store.upsert_span_record(&record).await.unwrap();
    record.finish(at(5), SpanStatus::Ok).unwrap();
    store.upsert_span_record(&record).await.unwrap();

    let mut again = record.clone();
    again.end_time = Some(at(9));
    let result = store.upsert_span_record(&again).await;
    assert!(matches!(result, Err(StorageError::ConstraintViolation(_))));

    let stored = store
        .fetch_span(&record.trace_id, &record.span_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.end_time, Some(at(5)));
}

#[tokio::test]
async fn test_batched_upsert_skips_only_ended_spans() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let mut in_flight = span("upload", 0);
    store.upsert_span_record(&in_flight).await.unwrap();

    let mut ended = span("decode", 1);
    ended.finish(at(2), SpanStatus::Ok).unwrap();
    store.add_span_record(&ended).await.unwrap();

    in_flight.finish(at(3), SpanStatus::Ok).unwrap();
    let mut late = ended.clone();
    late.end_time = Some(at(8));
    let mut fresh = span("render", 4);
    fresh.finish(at(5), SpanStatus::Ok).unwrap();

    let written = store
        .upsert_span_records(&[in_flight.clone(), late, fresh.clone()])
        .await
        .unwrap();
    assert_eq!(written, 2);

    let completed = store
        .fetch_span(&in_flight.trace_id, &in_flight.span_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.end_time, Some(at(3)));

    let untouched = store
        .fetch_span(&ended.trace_id, &ended.span_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.end_time, Some(at(2)));

    assert!(store.fetch_span(&fresh.trace_id, &fresh.span_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_span_filters_and_delete() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let root = span("root", 0).with_session_id(Some(sid("s")));
    let mut child = span("child", 1).with_parent(&root).with_session_id(Some(sid("s")));
    child.finish(at(2), SpanStatus::Ok).unwrap();
    store
        .add_span_records(&[root.clone(), child.clone()])
        .await
        .unwrap();

    let in_flight = store
        .fetch_spans(&SpanFilter::new().with_finished(false))
        .await
        .unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].name, "root");

    let by_session = store
        .fetch_spans(&SpanFilter::new().with_session_id(sid("s")))
        .await
        .unwrap();
    assert_eq!(by_session.len(), 2);
    assert_eq!(by_session[1].parent_span_id.as_ref(), Some(&root.span_id));

    store.delete_span(&child.trace_id, &child.span_id).await.unwrap();
    let named = store
        .fetch_spans(&SpanFilter::new().with_name("child"))
        .await
        .unwrap();
    assert!(named.is_empty());
}

// ============================================================================
// File-backed store and queued form
// ============================================================================

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");
    let config = StorageConfig::default();

    {
        let pool = StoragePool::open(&path, &config).await.unwrap();
        let store = TelemetryStore::new(pool.clone());
        store
            .add_session(&session("durable", ProcessId::new(), 0))
            .await
            .unwrap();
        pool.close().await;
    }

    let store = TelemetryStore::new(StoragePool::open(&path, &config).await.unwrap());
    assert!(store.session_exists(&sid("durable")).await.unwrap());
}

#[tokio::test]
async fn test_queued_end_time_update_is_visible() {
    let store = TelemetryStore::in_memory().await.unwrap();
    let (handle, _task) = WriteSerializer::spawn(store.clone());

    store
        .add_session(&session("queued", ProcessId::new(), 0))
        .await
        .unwrap();
    handle
        .update_session_end_time(sid("queued"), at(1) + Duration::milliseconds(250))
        .await
        .unwrap();

    let fetched = store.fetch_session(&sid("queued")).await.unwrap().unwrap();
    assert_eq!(fetched.end_time, Some(at(1) + Duration::milliseconds(250)));
    assert!(handle.session_exists(sid("queued")).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_and_writer_on_file() {
    let dir = tempfile::tempdir().unwrap();
    let pool = StoragePool::open(&dir.path().join("db.sqlite"), &StorageConfig::default())
        .await
        .unwrap();
    let store = TelemetryStore::new(pool);
    let (handle, _task) = WriteSerializer::spawn(store.clone());

    let pid = ProcessId::new();
    let writes: Vec<_> = (0..20)
        .map(|i| {
            let record = LogRecord::new(pid, LogSeverity::Info, format!("log {i}"), at(i));
            handle.add_log_record(record)
        })
        .collect();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let reader = store.clone();
        readers.push(tokio::spawn(async move {
            reader.fetch_logs(&LogFilter::new()).await.map(|logs| logs.len())
        }));
    }

    for write in writes {
        write.await.unwrap();
    }
    for reader in readers {
        let seen = reader.await.unwrap().unwrap();
        assert!(seen <= 20);
    }

    assert_eq!(store.fetch_logs(&LogFilter::new()).await.unwrap().len(), 20);
}
