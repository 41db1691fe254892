//! Session state machine

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use beacon_core::config::SessionConfig;
use beacon_core::domain::{AppState, ProcessId, SessionId, SessionRecord};
use beacon_storage::StoreHandle;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::observer::SessionObserver;

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Disabled, or enabled before the first session
    NoSession,
    OpenForeground,
    OpenBackground,
    /// The last session ended and none was started after it
    Ended,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::OpenForeground | SessionState::OpenBackground)
    }
}

struct Lifecycle {
    enabled: bool,
    current: Option<SessionRecord>,
    ended: bool,
    /// App state used for the next session
    app_state: AppState,
    /// Whether this process already had a session
    started_any: bool,
}

enum Transition {
    Started(SessionRecord),
    Ended(SessionRecord),
}

/// Transitions waiting for observer delivery, in the order they happened
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Transition>,
    /// Set while one thread is delivering; others only enqueue
    delivering: bool,
}

/// Releases the outbox if an observer panics mid-delivery
struct DeliveryGuard<'a> {
    outbox: &'a Mutex<Outbox>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock_outbox(self.outbox).delivering = false;
        }
    }
}

fn lock_outbox(outbox: &Mutex<Outbox>) -> MutexGuard<'_, Outbox> {
    outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    store: StoreHandle,
    process_id: ProcessId,
    config: SessionConfig,
    lifecycle: Mutex<Lifecycle>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
    outbox: Mutex<Outbox>,
}

/// Drives the session lifecycle of one process
///
/// Observers see transitions in the order they happened. When several
/// threads transition at once, one of them delivers for all, so a call can
/// return before its own transitions reached the observers.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(store: StoreHandle, process_id: ProcessId, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                process_id,
                config,
                lifecycle: Mutex::new(Lifecycle {
                    enabled: false,
                    current: None,
                    ended: false,
                    app_state: AppState::Foreground,
                    started_any: false,
                }),
                observers: RwLock::new(Vec::new()),
                outbox: Mutex::new(Outbox::default()),
            }),
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.inner.process_id
    }

    /// Registers an observer for later transitions
    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        // Every transition leaves the state whole before it can panic
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Enables capture and opens the first session of the process
    ///
    /// The first session ever opened by this controller is a cold start.
    /// No-op when already enabled.
    pub fn enable(&self) {
        {
            let mut lifecycle = self.lock();
            if lifecycle.enabled {
                return;
            }
            lifecycle.enabled = true;
            info!(process_id = %self.inner.process_id, "Session capture enabled");
            let opened = self.open_session(&mut lifecycle);
            self.enqueue(opened);
        }
        self.deliver();
    }

    /// Ends the open session and stops opening new ones
    pub fn disable(&self) {
        {
            let mut lifecycle = self.lock();
            if !lifecycle.enabled {
                return;
            }
            lifecycle.enabled = false;
            let ended = self.close_session(&mut lifecycle);
            lifecycle.ended = false;
            info!(process_id = %self.inner.process_id, "Session capture disabled");
            self.enqueue(ended);
        }
        self.deliver();
    }

    /// Opens a session; no-op if one is open or capture is disabled
    pub fn start_new_session(&self) {
        {
            let mut lifecycle = self.lock();
            if !lifecycle.enabled || lifecycle.current.is_some() {
                debug!("start_new_session ignored");
                return;
            }
            let opened = self.open_session(&mut lifecycle);
            self.enqueue(opened);
        }
        self.deliver();
    }

    /// Closes the open session; no-op if none is open
    ///
    /// When capture is enabled and `restart_on_end` is set, a new session
    /// is opened right after.
    pub fn end_current_session(&self) {
        {
            let mut lifecycle = self.lock();
            let Some(ended) = self.close_session(&mut lifecycle) else {
                debug!("end_current_session ignored, no open session");
                return;
            };
            self.enqueue(Some(ended));
            if lifecycle.enabled && self.inner.config.restart_on_end {
                let opened = self.open_session(&mut lifecycle);
                self.enqueue(opened);
            }
        }
        self.deliver();
    }

    /// Records an app state change on the open session
    ///
    /// Without an open session the state is remembered for the next one.
    pub fn set_app_state(&self, state: AppState) {
        let mut lifecycle = self.lock();
        if lifecycle.app_state == state {
            return;
        }
        lifecycle.app_state = state;

        if let Some(session) = lifecycle.current.as_mut() {
            session.state = state;
            debug!(session_id = %session.id, state = %state, "App state changed");
            drop(self.inner.store.update_session_state(session.id.clone(), state));
        }
    }

    /// Advances the heartbeat of the open session to now
    pub fn heartbeat(&self) {
        let mut lifecycle = self.lock();
        if let Some(session) = lifecycle.current.as_mut() {
            session.record_heartbeat(Utc::now());
            tracing::trace!(session_id = %session.id, "Heartbeat");
            drop(
                self.inner
                    .store
                    .update_session_heartbeat(session.id.clone(), session.last_heartbeat_time),
            );
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> SessionState {
        let lifecycle = self.lock();
        match &lifecycle.current {
            Some(session) => match session.state {
                AppState::Foreground => SessionState::OpenForeground,
                AppState::Background => SessionState::OpenBackground,
            },
            None if lifecycle.ended => SessionState::Ended,
            None => SessionState::NoSession,
        }
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.lock().current.as_ref().map(|session| session.id.clone())
    }

    /// Snapshot of the open session
    pub fn current_session(&self) -> Option<SessionRecord> {
        self.lock().current.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    // ========================================================================
    // Heartbeat task
    // ========================================================================

    /// Spawns the heartbeat task
    ///
    /// Beats every `heartbeat_interval` until `cancel` fires.
    pub fn spawn_heartbeat(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.inner.config.heartbeat_interval();
        tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "Session heartbeat starting");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => controller.heartbeat(),
                }
            }

            info!("Session heartbeat stopped");
        })
    }

    // ========================================================================
    // Internals (lock held)
    // ========================================================================

    fn open_session(&self, lifecycle: &mut Lifecycle) -> Option<Transition> {
        if lifecycle.current.is_some() {
            return None;
        }

        let session = SessionRecord::new(
            SessionId::new(),
            self.inner.process_id,
            lifecycle.app_state,
            Utc::now(),
        )
        .with_cold_start(!lifecycle.started_any);

        lifecycle.started_any = true;
        lifecycle.ended = false;
        lifecycle.current = Some(session.clone());

        info!(
            session_id = %session.id,
            cold_start = session.cold_start,
            state = %session.state,
            "Session started"
        );
        drop(self.inner.store.add_session(session.clone()));
        Some(Transition::Started(session))
    }

    fn close_session(&self, lifecycle: &mut Lifecycle) -> Option<Transition> {
        let mut session = lifecycle.current.take()?;
        let now = Utc::now();
        session.record_heartbeat(now);
        session.end_time = Some(session.last_heartbeat_time);
        lifecycle.ended = true;

        info!(session_id = %session.id, "Session ended");
        drop(
            self.inner
                .store
                .update_session_heartbeat(session.id.clone(), session.last_heartbeat_time),
        );
        drop(
            self.inner
                .store
                .update_session_end_time(session.id.clone(), session.last_heartbeat_time),
        );
        Some(Transition::Ended(session))
    }

    /// Queues a transition for delivery; called with the lifecycle lock held
    fn enqueue(&self, transition: Option<Transition>) {
        if let Some(transition) = transition {
            lock_outbox(&self.inner.outbox).queue.push_back(transition);
        }
    }

    // ========================================================================
    // Observer delivery (no lock held)
    // ========================================================================

    /// Delivers queued transitions unless another thread already is
    ///
    /// Only one thread delivers at a time and it drains the queue in order,
    /// including transitions queued by other threads or by observers.
    fn deliver(&self) {
        {
            let mut outbox = lock_outbox(&self.inner.outbox);
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }
        let _guard = DeliveryGuard {
            outbox: &self.inner.outbox,
        };

        loop {
            let batch: Vec<Transition> = {
                let mut outbox = lock_outbox(&self.inner.outbox);
                if outbox.queue.is_empty() {
                    outbox.delivering = false;
                    return;
                }
                outbox.queue.drain(..).collect()
            };

            let observers = self
                .inner
                .observers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();

            for transition in &batch {
                for observer in &observers {
                    match transition {
                        Transition::Started(session) => observer.on_new_session(session),
                        Transition::Ended(session) => observer.on_session_ended(session),
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("process_id", &self.inner.process_id)
            .field("state", &self.state())
            .finish()
    }
}
