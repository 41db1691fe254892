//! The Beacon context object

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use beacon_core::config::Config;
use beacon_core::domain::{AppState, ProcessId, ResourceKey, ResourceRecord, SessionId};
use beacon_pipeline::{
    default_log_validators, default_span_validators, BatchLimits, Batcher, CurrentSession,
    LogBatcher, SpanBatcher, StorageLogExporter, StorageSpanExporter,
};
use beacon_session::{SessionController, SessionState};
use beacon_storage::{StoragePool, StoreHandle, TelemetryStore, WriteSerializer};
use beacon_upload::{ReconcileReport, UnsentDataReconciler};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SdkError;
use crate::observer::CrashSessionObserver;
use crate::options::BeaconOptions;

/// Components that exist only when the store opened
struct Runtime {
    store: TelemetryStore,
    handle: StoreHandle,
    controller: SessionController,
    log_batcher: LogBatcher,
    span_batcher: SpanBatcher,
    log_exporter: Arc<StorageLogExporter>,
    span_exporter: Arc<StorageSpanExporter>,
}

/// Background tasks spawned by [`Beacon::start`]
#[derive(Default)]
struct Tasks {
    background: Vec<JoinHandle<()>>,
    reconciler: Option<JoinHandle<Option<ReconcileReport>>>,
}

/// Telemetry context of one process
///
/// When the store cannot be opened the context still works: every
/// operation is a no-op and [`startup_error`](Self::startup_error) holds
/// the reason.
pub struct Beacon {
    config: Config,
    process_id: ProcessId,
    runtime: Option<Runtime>,
    startup_error: Option<SdkError>,
    options: BeaconOptions,
    started: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl Beacon {
    /// Builds the context
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// Returns `SdkError::InvalidConfig` listing every configuration
    /// problem. A store that fails to open is not an error; see
    /// [`startup_error`](Self::startup_error).
    pub async fn new(options: BeaconOptions) -> Result<Self, SdkError> {
        let errors = options.config.validate();
        if !errors.is_empty() {
            return Err(SdkError::InvalidConfig(errors));
        }

        let config = options.config.clone();
        let process_id = ProcessId::new();

        let (runtime, startup_error) = match Self::open_store(&options).await {
            Ok(store) => (Some(Self::build_runtime(store, process_id, &options)), None),
            Err(e) => {
                warn!(error = %e, "Telemetry store unavailable, capture disabled");
                (None, Some(SdkError::Storage(e)))
            }
        };

        info!(process_id = %process_id, degraded = runtime.is_none(), "Beacon initialized");

        Ok(Self {
            config,
            process_id,
            runtime,
            startup_error,
            options,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
        })
    }

    async fn open_store(options: &BeaconOptions) -> beacon_storage::Result<TelemetryStore> {
        if options.in_memory {
            return TelemetryStore::in_memory().await;
        }
        let storage = &options.config.storage;
        let pool = StoragePool::open(&storage.path, storage).await?;
        Ok(TelemetryStore::new(pool))
    }

    fn build_runtime(store: TelemetryStore, process_id: ProcessId, options: &BeaconOptions) -> Runtime {
        let config = &options.config;
        let (handle, _serializer) = WriteSerializer::spawn(store.clone());

        let controller = SessionController::new(handle.clone(), process_id, config.session.clone());
        if let Some(reporter) = &options.crash_reporter {
            controller.add_observer(Arc::new(CrashSessionObserver::new(Arc::clone(reporter))));
        }

        let log_batcher = Batcher::new(
            "log",
            handle.clone(),
            default_log_validators(&config.batching),
            BatchLimits::for_logs(&config.batching),
        );
        let span_batcher = Batcher::new(
            "span",
            handle.clone(),
            default_span_validators(&config.batching),
            BatchLimits::for_spans(&config.batching),
        );

        let session_source = controller.clone();
        let current_session: Arc<dyn CurrentSession> =
            Arc::new(move || session_source.current_session_id());

        Runtime {
            log_exporter: Arc::new(StorageLogExporter::new(
                log_batcher.clone(),
                process_id,
                Arc::clone(&current_session),
            )),
            span_exporter: Arc::new(StorageSpanExporter::new(
                span_batcher.clone(),
                process_id,
                current_session,
            )),
            store,
            handle,
            controller,
            log_batcher,
            span_batcher,
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens the first session and starts background work
    ///
    /// Spawns the heartbeat, both flush timers and, when
    /// `upload.reconcile_on_start` is set, the reconciler after
    /// `upload.reconcile_delay_ms`. Idempotent; a stopped context cannot
    /// be restarted. Must be called within a tokio runtime.
    pub fn start(&self) {
        if self.stopped.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(runtime) = &self.runtime else {
            debug!("Beacon start ignored, capture disabled");
            return;
        };

        if let Some(reporter) = &self.options.panic_hook {
            reporter.install_panic_hook();
        }

        runtime.controller.enable();

        let mut tasks = self.tasks();
        tasks
            .background
            .push(runtime.controller.spawn_heartbeat(self.cancel.child_token()));
        tasks
            .background
            .push(runtime.log_batcher.spawn_flush_timer(self.cancel.child_token()));
        tasks
            .background
            .push(runtime.span_batcher.spawn_flush_timer(self.cancel.child_token()));

        if self.config.upload.reconcile_on_start {
            let mut reconciler = UnsentDataReconciler::new(
                runtime.store.clone(),
                runtime.handle.clone(),
                self.process_id,
                &self.config.session,
            );
            if let Some(client) = &self.options.upload_client {
                reconciler = reconciler.with_upload_client(Arc::clone(client));
            }
            if let Some(reporter) = &self.options.crash_reporter {
                reconciler = reconciler.with_crash_reporter(Arc::clone(reporter));
            }
            tasks.reconciler = Some(reconciler.spawn(
                std::time::Duration::from_millis(self.config.upload.reconcile_delay_ms),
                self.cancel.child_token(),
            ));
        }

        info!(process_id = %self.process_id, "Beacon started");
    }

    /// Flushes pending records, ends the session and stops background work
    ///
    /// Idempotent. Returns once every store write submitted before the
    /// call has completed.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(runtime) = &self.runtime else {
            return;
        };

        runtime.log_exporter.shutdown();
        runtime.span_exporter.shutdown();
        let final_flushes = [runtime.log_batcher.shutdown(), runtime.span_batcher.shutdown()];
        runtime.controller.disable();
        self.cancel.cancel();

        for flush in final_flushes.into_iter().flatten() {
            if let Err(e) = flush.await {
                warn!(error = %e, "Final flush failed");
            }
        }

        let (background, reconciler) = {
            let mut tasks = self.tasks();
            (std::mem::take(&mut tasks.background), tasks.reconciler.take())
        };
        for task in background {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        // A pass that already started runs to completion
        if let Some(reconciler) = reconciler {
            if let Err(e) = reconciler.await {
                warn!(error = %e, "Reconciler task ended abnormally");
            }
        }

        if let Err(e) = runtime.handle.barrier().await {
            warn!(error = %e, "Store queue did not drain");
        }
        info!(process_id = %self.process_id, "Beacon stopped");
    }

    /// Waits for the startup reconciliation pass and returns its report
    ///
    /// `None` if no pass was scheduled, it was cancelled, or it was
    /// already awaited.
    pub async fn wait_for_reconciliation(&self) -> Option<ReconcileReport> {
        let handle = self.tasks().reconciler.take()?;
        match handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Reconciler task ended abnormally");
                None
            }
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.runtime.as_ref()?.controller.current_session_id()
    }

    pub fn session_state(&self) -> SessionState {
        self.runtime
            .as_ref()
            .map_or(SessionState::NoSession, |runtime| runtime.controller.state())
    }

    pub fn start_new_session(&self) {
        if let Some(runtime) = &self.runtime {
            runtime.controller.start_new_session();
        }
    }

    /// Flushes buffered logs and spans, then ends the open session
    pub fn end_current_session(&self) {
        if let Some(runtime) = &self.runtime {
            drop(runtime.log_batcher.flush());
            drop(runtime.span_batcher.flush());
            runtime.controller.end_current_session();
        }
    }

    pub fn set_app_state(&self, state: AppState) {
        if let Some(runtime) = &self.runtime {
            runtime.controller.set_app_state(state);
        }
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Records a resource of this process
    pub fn add_resource(&self, key: impl Into<ResourceKey>, value: impl Into<String>) {
        if let Some(runtime) = &self.runtime {
            drop(
                runtime
                    .handle
                    .upsert_resource(ResourceRecord::process(key, value, self.process_id)),
            );
        }
    }

    /// Records a resource of the open session; dropped when none is open
    pub fn add_session_resource(&self, key: impl Into<ResourceKey>, value: impl Into<String>) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        match runtime.controller.current_session_id() {
            Some(session_id) => drop(
                runtime
                    .handle
                    .upsert_resource(ResourceRecord::session(key, value, &session_id)),
            ),
            None => debug!("Session resource dropped, no open session"),
        }
    }

    /// Records a resource shared by every session and process
    pub fn add_permanent_resource(&self, key: impl Into<ResourceKey>, value: impl Into<String>) {
        if let Some(runtime) = &self.runtime {
            drop(runtime.handle.upsert_resource(ResourceRecord::permanent(key, value)));
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn log_exporter(&self) -> Option<Arc<StorageLogExporter>> {
        self.runtime.as_ref().map(|runtime| Arc::clone(&runtime.log_exporter))
    }

    pub fn span_exporter(&self) -> Option<Arc<StorageSpanExporter>> {
        self.runtime.as_ref().map(|runtime| Arc::clone(&runtime.span_exporter))
    }

    /// Queued store access; `None` when capture is disabled
    pub fn store(&self) -> Option<&StoreHandle> {
        self.runtime.as_ref().map(|runtime| &runtime.handle)
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Why capture is disabled, if it is
    pub fn startup_error(&self) -> Option<&SdkError> {
        self.startup_error.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.runtime.is_some()
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("process_id", &self.process_id)
            .field("enabled", &self.is_enabled())
            .field("started", &self.started.load(Ordering::Acquire))
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish()
    }
}
