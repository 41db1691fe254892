//! Queued store operations.
//!
//! Provides `WriteSerializer` to run every store operation of a process on
//! one task, in the order the operations were submitted. Callers get a
//! [`Pending`] completion back immediately and decide whether to await it,
//! block on it, or drop it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use beacon_core::domain::{
    AppState, LogId, LogRecord, ProcessId, ResourceKey, ResourceRecord, ResourceType, SessionId,
    SessionRecord, SpanId, SpanRecord, TraceId,
};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::filter::{LogFilter, SessionFilter, SpanFilter};
use crate::store::TelemetryStore;
use crate::{Result, StorageError};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce(TelemetryStore) -> BoxFuture + Send>;

// ============================================================================
// StoreOp
// ============================================================================

/// One queued store operation
///
/// The job owns its arguments and the oneshot sender that returns the
/// result to the caller.
pub struct StoreOp {
    name: &'static str,
    job: Job,
}

impl fmt::Debug for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOp").field("name", &self.name).finish()
    }
}

fn serializer_stopped() -> StorageError {
    StorageError::Io("store serializer has stopped".to_string())
}

// ============================================================================
// Pending
// ============================================================================

/// Completion of a queued store operation
///
/// - `.await` it from async code
/// - call [`Pending::wait`] from a thread outside the async runtime
/// - drop it to fire and forget; the operation still runs and a failure
///   is logged by the serializer
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Blocks the current thread until the operation has run
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context, like
    /// any blocking receive on a tokio channel.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(serializer_stopped()))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(serializer_stopped())))
    }
}

// ============================================================================
// StoreHandle
// ============================================================================

/// Handle for submitting operations to the WriteSerializer
///
/// This handle can be cloned and shared across tasks and threads. Every
/// method enqueues its operation before returning, so operations from one
/// thread run in call order and a read observes every write submitted
/// before it.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl StoreHandle {
    fn submit<T, F, Fut>(&self, name: &'static str, op: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(TelemetryStore) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |store| {
            Box::pin(async move {
                let result = op(store).await;
                if let Err(Err(e)) = reply.send(result) {
                    tracing::warn!(op = name, error = %e, "Detached store operation failed");
                }
            })
        });

        // On failure the op, and with it the reply sender, is dropped, which
        // resolves the Pending with the stopped error.
        if self.tx.send(StoreOp { name, job }).is_err() {
            tracing::debug!(op = name, "Store operation rejected, serializer has stopped");
        }

        Pending { rx }
    }

    /// Returns true once the serializer task is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once every operation submitted before it has run
    pub fn barrier(&self) -> Pending<()> {
        self.submit("barrier", |_store| async { Ok(()) })
    }

    // --- Sessions ---

    pub fn add_session(&self, session: SessionRecord) -> Pending<()> {
        self.submit("add_session", move |store| async move {
            store.add_session(&session).await
        })
    }

    pub fn upsert_session(&self, session: SessionRecord) -> Pending<()> {
        self.submit("upsert_session", move |store| async move {
            store.upsert_session(&session).await
        })
    }

    pub fn fetch_session(&self, id: SessionId) -> Pending<Option<SessionRecord>> {
        self.submit("fetch_session", move |store| async move {
            store.fetch_session(&id).await
        })
    }

    pub fn session_exists(&self, id: SessionId) -> Pending<bool> {
        self.submit("session_exists", move |store| async move {
            store.session_exists(&id).await
        })
    }

    pub fn fetch_open_sessions(&self) -> Pending<Vec<SessionRecord>> {
        self.submit("fetch_open_sessions", |store| async move {
            store.fetch_open_sessions().await
        })
    }

    pub fn update_session_end_time(&self, id: SessionId, end_time: DateTime<Utc>) -> Pending<()> {
        self.submit("update_session_end_time", move |store| async move {
            store.update_session_end_time(&id, end_time).await
        })
    }

    pub fn update_session_heartbeat(&self, id: SessionId, heartbeat: DateTime<Utc>) -> Pending<()> {
        self.submit("update_session_heartbeat", move |store| async move {
            store.update_session_heartbeat(&id, heartbeat).await
        })
    }

    pub fn update_session_state(&self, id: SessionId, state: AppState) -> Pending<()> {
        self.submit("update_session_state", move |store| async move {
            store.update_session_state(&id, state).await
        })
    }

    pub fn set_session_crash_report(&self, id: SessionId, crash_report_id: String) -> Pending<()> {
        self.submit("set_session_crash_report", move |store| async move {
            store.set_session_crash_report(&id, &crash_report_id).await
        })
    }

    pub fn mark_session_sent(&self, id: SessionId, sent_at: DateTime<Utc>) -> Pending<()> {
        self.submit("mark_session_sent", move |store| async move {
            store.mark_session_sent(&id, sent_at).await
        })
    }

    pub fn finished_sessions_count(&self) -> Pending<u64> {
        self.submit("finished_sessions_count", |store| async move {
            store.finished_sessions_count().await
        })
    }

    pub fn fetch_finished_sessions(&self) -> Pending<Vec<SessionRecord>> {
        self.submit("fetch_finished_sessions", |store| async move {
            store.fetch_finished_sessions().await
        })
    }

    pub fn fetch_unsent_finished_sessions(&self) -> Pending<Vec<SessionRecord>> {
        self.submit("fetch_unsent_finished_sessions", |store| async move {
            store.fetch_unsent_finished_sessions().await
        })
    }

    pub fn fetch_latest_session(&self) -> Pending<Option<SessionRecord>> {
        self.submit("fetch_latest_session", |store| async move {
            store.fetch_latest_session().await
        })
    }

    pub fn fetch_sessions(&self, filter: SessionFilter) -> Pending<Vec<SessionRecord>> {
        self.submit("fetch_sessions", move |store| async move {
            store.fetch_sessions(&filter).await
        })
    }

    pub fn delete_session(&self, id: SessionId) -> Pending<()> {
        self.submit("delete_session", move |store| async move {
            store.delete_session(&id).await
        })
    }

    // --- Resources ---

    pub fn add_resource(&self, resource: ResourceRecord) -> Pending<()> {
        self.submit("add_resource", move |store| async move {
            store.add_resource(&resource).await
        })
    }

    pub fn upsert_resource(&self, resource: ResourceRecord) -> Pending<()> {
        self.submit("upsert_resource", move |store| async move {
            store.upsert_resource(&resource).await
        })
    }

    pub fn fetch_resource(&self, key: ResourceKey) -> Pending<Option<ResourceRecord>> {
        self.submit("fetch_resource", move |store| async move {
            store.fetch_resource(&key).await
        })
    }

    pub fn fetch_resource_in_scope(
        &self,
        key: ResourceKey,
        resource_type: ResourceType,
        resource_type_id: String,
    ) -> Pending<Option<ResourceRecord>> {
        self.submit("fetch_resource_in_scope", move |store| async move {
            store
                .fetch_resource_in_scope(&key, resource_type, &resource_type_id)
                .await
        })
    }

    pub fn fetch_all_resources_for_session(&self, id: SessionId) -> Pending<Vec<ResourceRecord>> {
        self.submit("fetch_all_resources_for_session", move |store| async move {
            store.fetch_all_resources_for_session(&id).await
        })
    }

    pub fn fetch_all_resources_for_process(&self, id: ProcessId) -> Pending<Vec<ResourceRecord>> {
        self.submit("fetch_all_resources_for_process", move |store| async move {
            store.fetch_all_resources_for_process(&id).await
        })
    }

    pub fn increment_permanent_counter(&self, key: ResourceKey) -> Pending<i64> {
        self.submit("increment_permanent_counter", move |store| async move {
            store.increment_permanent_counter(&key).await
        })
    }

    pub fn delete_resource(
        &self,
        key: ResourceKey,
        resource_type: ResourceType,
        resource_type_id: String,
    ) -> Pending<()> {
        self.submit("delete_resource", move |store| async move {
            store
                .delete_resource(&key, resource_type, &resource_type_id)
                .await
        })
    }

    // --- Logs ---

    pub fn add_log_record(&self, log: LogRecord) -> Pending<()> {
        self.submit("add_log_record", move |store| async move {
            store.add_log_record(&log).await
        })
    }

    pub fn add_log_records(&self, logs: Vec<LogRecord>) -> Pending<()> {
        self.submit("add_log_records", move |store| async move {
            store.add_log_records(&logs).await
        })
    }

    pub fn fetch_log_record(&self, id: LogId) -> Pending<Option<LogRecord>> {
        self.submit("fetch_log_record", move |store| async move {
            store.fetch_log_record(&id).await
        })
    }

    pub fn fetch_logs(&self, filter: LogFilter) -> Pending<Vec<LogRecord>> {
        self.submit("fetch_logs", move |store| async move {
            store.fetch_logs(&filter).await
        })
    }

    pub fn delete_log_record(&self, id: LogId) -> Pending<()> {
        self.submit("delete_log_record", move |store| async move {
            store.delete_log_record(&id).await
        })
    }

    pub fn delete_logs_for_session(&self, id: SessionId) -> Pending<u64> {
        self.submit("delete_logs_for_session", move |store| async move {
            store.delete_logs_for_session(&id).await
        })
    }

    // --- Spans ---

    pub fn add_span_record(&self, span: SpanRecord) -> Pending<()> {
        self.submit("add_span_record", move |store| async move {
            store.add_span_record(&span).await
        })
    }

    pub fn add_span_records(&self, spans: Vec<SpanRecord>) -> Pending<()> {
        self.submit("add_span_records", move |store| async move {
            store.add_span_records(&spans).await
        })
    }

    pub fn upsert_span_record(&self, span: SpanRecord) -> Pending<()> {
        self.submit("upsert_span_record", move |store| async move {
            store.upsert_span_record(&span).await
        })
    }

    /// Queued [`TelemetryStore::upsert_span_records`]; spans already ended
    /// in the store are skipped
    pub fn upsert_span_records(&self, spans: Vec<SpanRecord>) -> Pending<()> {
        self.submit("upsert_span_records", move |store| async move {
            store.upsert_span_records(&spans).await.map(|_| ())
        })
    }

    pub fn fetch_span(&self, trace_id: TraceId, span_id: SpanId) -> Pending<Option<SpanRecord>> {
        self.submit("fetch_span", move |store| async move {
            store.fetch_span(&trace_id, &span_id).await
        })
    }

    pub fn fetch_spans(&self, filter: SpanFilter) -> Pending<Vec<SpanRecord>> {
        self.submit("fetch_spans", move |store| async move {
            store.fetch_spans(&filter).await
        })
    }

    pub fn delete_span(&self, trace_id: TraceId, span_id: SpanId) -> Pending<()> {
        self.submit("delete_span", move |store| async move {
            store.delete_span(&trace_id, &span_id).await
        })
    }
}

// ============================================================================
// WriteSerializer
// ============================================================================

/// Runs queued store operations one at a time
///
/// The WriteSerializer runs as a tokio task that processes operations
/// sequentially from an unbounded mpsc channel, so submission never blocks
/// a producer and operations never overtake each other.
///
/// # Architecture
///
/// ```text
/// ┌─────────────┐      StoreOp      ┌──────────────────┐
/// │   caller    │ ─────────────────► │ WriteSerializer  │
/// │ (any thread)│                    │      task        │
/// └─────────────┘                    └──────────────────┘
///       │                                      │
///       │        Result via Pending<T>         │
///       │ ◄────────────────────────────────────┤
///       │                                      ▼
///       │                             ┌─────────────────┐
///       │                             │ TelemetryStore  │
///       │                             └─────────────────┘
/// ```
pub struct WriteSerializer {
    rx: mpsc::UnboundedReceiver<StoreOp>,
    store: TelemetryStore,
}

impl WriteSerializer {
    /// Creates a new WriteSerializer over `store`
    ///
    /// Returns a tuple of:
    /// - The serializer itself (to be spawned as a task)
    /// - A handle for submitting operations
    ///
    /// The caller must spawn the serializer as a tokio task by calling `run()`.
    pub fn new(store: TelemetryStore) -> (Self, StoreHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let serializer = Self { rx, store };
        let handle = StoreHandle { tx };

        (serializer, handle)
    }

    /// Creates the serializer and spawns it on the current tokio runtime
    pub fn spawn(store: TelemetryStore) -> (StoreHandle, JoinHandle<()>) {
        let (serializer, handle) = Self::new(store);
        let task = tokio::spawn(serializer.run());
        (handle, task)
    }

    /// Runs the serializer loop
    ///
    /// Processes operations until every handle has been dropped. A failed
    /// operation reports its error through its own `Pending`; the loop
    /// keeps going.
    pub async fn run(mut self) {
        tracing::info!("Store serializer task started");

        while let Some(op) = self.rx.recv().await {
            self.process_operation(op).await;
        }

        tracing::info!("Store serializer task stopped (all handles dropped)");
    }

    async fn process_operation(&self, op: StoreOp) {
        tracing::trace!(op = op.name, "Processing store operation");
        (op.job)(self.store.clone()).await;
    }
}
