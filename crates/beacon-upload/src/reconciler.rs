//! Startup reconciliation of data left by previous runs
//!
//! ```text
//! crash reports ─┐
//!                ▼
//! stale open sessions ──→ close at last heartbeat
//!                ▼
//! unsent finished sessions ──→ pair crash ──→ build payload ──→ upload ──→ mark sent
//!                ▼
//! crash reports matching no session ──→ upload ──→ delete
//! ```
//!
//! Reads use the store's reader pool so live capture is never queued
//! behind the scan. Every write is awaited before the next step reads.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::config::SessionConfig;
use beacon_core::domain::{CrashReport, ProcessId, SessionId, SessionRecord};
use beacon_core::ports::{ICrashReporter, IUploadClient};
use beacon_storage::{SessionFilter, StoreHandle, TelemetryStore};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::payload::SessionPayloadBuilder;
use crate::{ReconcileError, Result};

/// Counts of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Open sessions of earlier processes closed at their last heartbeat
    pub abandoned_sessions_closed: usize,
    pub sessions_uploaded: usize,
    pub sessions_failed: usize,
    /// Crash reports attached to a stored session
    pub crash_reports_paired: usize,
    /// Crash reports uploaded on their own
    pub crash_reports_uploaded: usize,
}

/// Forwards persisted but unsent data to the upload port
pub struct UnsentDataReconciler {
    store: TelemetryStore,
    writer: StoreHandle,
    process_id: ProcessId,
    staleness_threshold: chrono::Duration,
    upload_client: Option<Arc<dyn IUploadClient>>,
    crash_reporter: Option<Arc<dyn ICrashReporter>>,
    payloads: SessionPayloadBuilder,
}

impl UnsentDataReconciler {
    /// Creates a reconciler for the process `process_id`
    ///
    /// Open sessions of `process_id` itself are never treated as abandoned.
    pub fn new(
        store: TelemetryStore,
        writer: StoreHandle,
        process_id: ProcessId,
        config: &SessionConfig,
    ) -> Self {
        Self {
            payloads: SessionPayloadBuilder::new(store.clone(), writer.clone()),
            store,
            writer,
            process_id,
            staleness_threshold: config.staleness_threshold(),
            upload_client: None,
            crash_reporter: None,
        }
    }

    pub fn with_upload_client(mut self, client: Arc<dyn IUploadClient>) -> Self {
        self.upload_client = Some(client);
        self
    }

    pub fn with_crash_reporter(mut self, reporter: Arc<dyn ICrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    /// Spawns one pass after `delay`, skipped if `cancel` fires first
    pub fn spawn(self, delay: Duration, cancel: CancellationToken) -> JoinHandle<Option<ReconcileReport>> {
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Reconciliation cancelled before start");
                    None
                }
                _ = tokio::time::sleep(delay) => Some(self.run().await),
            }
        })
    }

    /// Runs one reconciliation pass
    ///
    /// Failures are logged and end the affected step only; this never
    /// panics or returns an error.
    pub async fn run(&self) -> ReconcileReport {
        info!(process_id = %self.process_id, "Reconciling unsent data");
        let mut report = ReconcileReport::default();

        let crash_reports = self.fetch_crash_reports().await;

        match self.close_abandoned_sessions(&crash_reports).await {
            Ok(closed) => report.abandoned_sessions_closed = closed,
            Err(e) => warn!(error = %e, "Failed to close abandoned sessions"),
        }

        let Some(client) = self.upload_client.clone() else {
            warn!("No upload client configured, unsent data stays in the store");
            return report;
        };

        let mut claimed = HashSet::new();
        match self.store.fetch_unsent_finished_sessions().await {
            Ok(sessions) => {
                for session in sessions {
                    self.upload_session(client.as_ref(), session, &crash_reports, &mut claimed, &mut report)
                        .await;
                }
            }
            Err(e) => {
                // Crash reports may belong to the sessions that could not be read
                warn!(error = %e, "Failed to fetch unsent sessions");
                return report;
            }
        }

        for crash in crash_reports.iter().filter(|c| !claimed.contains(&c.id)) {
            match self.upload_unpaired_crash(client.as_ref(), crash).await {
                Ok(true) => report.crash_reports_uploaded += 1,
                Ok(false) => {}
                Err(e) => warn!(report_id = %crash.id, error = %e, "Crash report upload failed"),
            }
        }

        info!(
            closed = report.abandoned_sessions_closed,
            uploaded = report.sessions_uploaded,
            failed = report.sessions_failed,
            crashes_paired = report.crash_reports_paired,
            crashes_uploaded = report.crash_reports_uploaded,
            "Reconciliation finished"
        );
        report
    }

    async fn fetch_crash_reports(&self) -> Vec<CrashReport> {
        let Some(reporter) = &self.crash_reporter else {
            return Vec::new();
        };
        match reporter.fetch_unsent_crash_reports().await {
            Ok(reports) => {
                debug!(count = reports.len(), "Fetched unsent crash reports");
                reports
            }
            Err(e) => {
                warn!(error = %ReconcileError::CrashReporter(e), "Failed to fetch crash reports");
                Vec::new()
            }
        }
    }

    /// Closes open sessions of other processes whose heartbeat went stale
    ///
    /// A session named by a crash report is closed whatever its heartbeat,
    /// since the process that owned it is gone.
    async fn close_abandoned_sessions(&self, crash_reports: &[CrashReport]) -> Result<usize> {
        let crashed: HashSet<&SessionId> = crash_reports
            .iter()
            .filter_map(|c| c.session_id.as_ref())
            .collect();

        let open = self
            .store
            .fetch_sessions(
                &SessionFilter::new()
                    .excluding_process_id(self.process_id)
                    .with_finished(false),
            )
            .await?;

        let now = Utc::now();
        let mut closed = 0;
        let abandoned = open
            .into_iter()
            .filter(|s| crashed.contains(&s.id) || s.is_stale(now, self.staleness_threshold));
        for session in abandoned {
            self.writer
                .update_session_end_time(session.id.clone(), session.last_heartbeat_time)
                .await?;
            info!(
                session_id = %session.id,
                process_id = %session.process_id,
                crashed = crashed.contains(&session.id),
                "Closed abandoned session at last heartbeat"
            );
            closed += 1;
        }
        Ok(closed)
    }

    async fn upload_session(
        &self,
        client: &dyn IUploadClient,
        mut session: SessionRecord,
        crash_reports: &[CrashReport],
        claimed: &mut HashSet<String>,
        report: &mut ReconcileReport,
    ) {
        let crash = crash_reports
            .iter()
            .find(|c| c.session_id.as_ref() == Some(&session.id));

        if let Some(crash) = crash {
            claimed.insert(crash.id.clone());
            if session.crash_report_id.as_deref() != Some(crash.id.as_str()) {
                if let Err(e) = self
                    .writer
                    .set_session_crash_report(session.id.clone(), crash.id.clone())
                    .await
                {
                    warn!(session_id = %session.id, error = %e, "Failed to pair crash report");
                    report.sessions_failed += 1;
                    return;
                }
                session.crash_report_id = Some(crash.id.clone());
                report.crash_reports_paired += 1;
                info!(session_id = %session.id, report_id = %crash.id, "Paired crash report with session");
            }
        }

        match self.send_session(client, &session).await {
            Ok(()) => {
                report.sessions_uploaded += 1;
                if let (Some(crash), Some(reporter)) = (crash, &self.crash_reporter) {
                    if let Err(e) = reporter.delete_crash_report(&crash.id).await {
                        warn!(report_id = %crash.id, error = %e, "Failed to delete uploaded crash report");
                    }
                }
            }
            Err(e) => {
                report.sessions_failed += 1;
                warn!(session_id = %session.id, error = %e, "Session upload failed, will retry next launch");
            }
        }
    }

    async fn send_session(&self, client: &dyn IUploadClient, session: &SessionRecord) -> Result<()> {
        let payload = self.payloads.build(session).await?;
        client
            .upload_session(&payload)
            .await
            .map_err(ReconcileError::Upload)?;
        self.writer.mark_session_sent(session.id.clone(), Utc::now()).await?;
        debug!(session_id = %session.id, "Session uploaded");
        Ok(())
    }

    /// Uploads a crash report that no unsent session claimed
    ///
    /// A report already carried by a sent session is only deleted. A report
    /// whose session is still open is kept for a later pass. Returns whether
    /// the report was uploaded.
    async fn upload_unpaired_crash(&self, client: &dyn IUploadClient, crash: &CrashReport) -> Result<bool> {
        let session = match &crash.session_id {
            Some(session_id) => self.store.fetch_session(session_id).await?,
            None => None,
        };

        if session.as_ref().is_some_and(SessionRecord::is_open) {
            debug!(report_id = %crash.id, "Crash report session still open, kept for pairing");
            return Ok(false);
        }

        let already_sent = session
            .is_some_and(|s| s.is_sent() && s.crash_report_id.as_deref() == Some(crash.id.as_str()));

        if !already_sent {
            client
                .upload_crash_report(crash)
                .await
                .map_err(ReconcileError::Upload)?;
        }

        if let Some(reporter) = &self.crash_reporter {
            reporter
                .delete_crash_report(&crash.id)
                .await
                .map_err(ReconcileError::CrashReporter)?;
        }
        Ok(!already_sent)
    }
}

impl std::fmt::Debug for UnsentDataReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsentDataReconciler")
            .field("process_id", &self.process_id)
            .field("has_upload_client", &self.upload_client.is_some())
            .field("has_crash_reporter", &self.crash_reporter.is_some())
            .finish()
    }
}
