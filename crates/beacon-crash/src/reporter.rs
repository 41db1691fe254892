//! File-backed [`ICrashReporter`]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use beacon_core::domain::{CrashReport, SessionId};
use beacon_core::ports::ICrashReporter;
use tracing::{debug, warn};

use crate::report::{new_crash_report, save_crash_report};

/// Crash reporter writing one JSON file per crash
///
/// The session id set through [`ICrashReporter::set_current_session_id`]
/// is stamped on every report, which is how the next launch pairs the
/// crash with its session. Cloning shares the current session id.
#[derive(Debug, Clone)]
pub struct FileCrashReporter {
    reports_dir: PathBuf,
    current_session: Arc<Mutex<Option<SessionId>>>,
}

impl FileCrashReporter {
    pub fn new(reports_dir: PathBuf) -> Self {
        Self {
            reports_dir,
            current_session: Arc::new(Mutex::new(None)),
        }
    }

    /// `~/.local/share/beacon/crashes` or the platform equivalent
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("beacon")
            .join("crashes")
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    fn session(&self) -> Option<SessionId> {
        self.current_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Writes a report for a crash happening now
    pub fn record_crash(
        &self,
        message: &str,
        location: &str,
        backtrace: &str,
    ) -> anyhow::Result<CrashReport> {
        let report = new_crash_report(self.session(), message, location, backtrace);
        save_crash_report(&self.reports_dir, &report)?;
        Ok(report)
    }

    /// Installs a panic hook that records a report before the previous hook runs
    pub fn install_panic_hook(&self) {
        let reporter = self.clone();
        let previous_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |panic_info| {
            let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let location = panic_info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_default();

            let backtrace = std::backtrace::Backtrace::force_capture().to_string();

            if let Err(e) = reporter.record_crash(&message, &location, &backtrace) {
                eprintln!("Failed to save crash report: {e}");
            }

            previous_hook(panic_info);
        }));
    }

    /// Reports on disk with their paths, oldest first
    fn entries(&self) -> anyhow::Result<Vec<(PathBuf, CrashReport)>> {
        if !self.reports_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.reports_dir)? {
            let path = entry?.path();
            let is_report = path.extension().is_some_and(|e| e == "json")
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("crash-"));
            if !is_report {
                continue;
            }

            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<CrashReport>(&content) {
                Ok(report) => entries.push((path, report)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable crash report"),
            }
        }

        entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp));
        Ok(entries)
    }

    /// Pending reports, oldest first
    pub fn list(&self) -> anyhow::Result<Vec<CrashReport>> {
        Ok(self.entries()?.into_iter().map(|(_, report)| report).collect())
    }

    /// Deletes the report with `id`; returns false if there is none
    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        for (path, report) in self.entries()? {
            if report.id == id {
                std::fs::remove_file(&path)?;
                debug!(report_id = %id, "Deleted crash report");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait::async_trait]
impl ICrashReporter for FileCrashReporter {
    fn set_current_session_id(&self, session_id: Option<SessionId>) {
        *self
            .current_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session_id;
    }

    fn current_session_id(&self) -> Option<SessionId> {
        self.session()
    }

    async fn fetch_unsent_crash_reports(&self) -> anyhow::Result<Vec<CrashReport>> {
        let reporter = self.clone();
        tokio::task::spawn_blocking(move || reporter.list()).await?
    }

    async fn delete_crash_report(&self, id: &str) -> anyhow::Result<()> {
        let reporter = self.clone();
        let id = id.to_string();
        let deleted = tokio::task::spawn_blocking(move || reporter.delete(&id)).await??;
        if !deleted {
            debug!("Crash report already gone");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_missing_dir() {
        let reporter = FileCrashReporter::new(PathBuf::from("/nonexistent/beacon/crashes"));
        assert!(reporter.list().unwrap().is_empty());
    }

    #[test]
    fn test_crash_is_paired_with_current_session() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = FileCrashReporter::new(dir.path().to_path_buf());
        let session_id = SessionId::parse("session-7").unwrap();

        reporter.set_current_session_id(Some(session_id.clone()));
        let paired = reporter.record_crash("boom", "main.rs:1:1", "").unwrap();
        reporter.set_current_session_id(None);
        let unpaired = reporter.record_crash("bang", "main.rs:2:1", "").unwrap();

        let reports = reporter.list().unwrap();
        assert_eq!(reports.len(), 2);
        let stored_paired = reports.iter().find(|r| r.id == paired.id).unwrap();
        assert_eq!(stored_paired.session_id, Some(session_id));
        let stored_unpaired = reports.iter().find(|r| r.id == unpaired.id).unwrap();
        assert_eq!(stored_unpaired.session_id, None);
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crash-20260101-deadbeef.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let reporter = FileCrashReporter::new(dir.path().to_path_buf());
        reporter.record_crash("boom", "", "").unwrap();

        assert_eq!(reporter.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_port_fetch_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = FileCrashReporter::new(dir.path().to_path_buf());
        let report = reporter.record_crash("boom", "", "").unwrap();

        let pending = reporter.fetch_unsent_crash_reports().await.unwrap();
        assert_eq!(pending, vec![report.clone()]);

        reporter.delete_crash_report(&report.id).await.unwrap();
        reporter.delete_crash_report(&report.id).await.unwrap();
        assert!(reporter.fetch_unsent_crash_reports().await.unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_session() {
        let reporter = FileCrashReporter::new(PathBuf::from("/tmp"));
        let clone = reporter.clone();
        reporter.set_current_session_id(Some(SessionId::parse("shared").unwrap()));
        assert_eq!(clone.current_session_id().map(|s| s.to_string()), Some("shared".to_string()));
    }
}
