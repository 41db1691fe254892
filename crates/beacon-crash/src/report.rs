//! Crash report construction and persistence
//!
//! Reports are pretty-printed JSON files named `crash-{date}-{id8}.json`.

use std::path::{Path, PathBuf};

use beacon_core::domain::{CrashReport, SessionId};
use chrono::Utc;
use uuid::Uuid;

use crate::platform::PlatformInfo;

/// Builds a report for a crash happening now
pub fn new_crash_report(
    session_id: Option<SessionId>,
    message: &str,
    location: &str,
    backtrace: &str,
) -> CrashReport {
    CrashReport {
        id: Uuid::new_v4().to_string(),
        session_id,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        message: message.to_string(),
        location: location.to_string(),
        backtrace: backtrace.to_string(),
        platform: PlatformInfo::collect().to_string(),
    }
}

/// File name of `report`: `crash-{date}-{id8}.json`
pub fn report_file_name(report: &CrashReport) -> String {
    let date = report.timestamp.format("%Y%m%d");
    let short_id: String = report.id.chars().take(8).collect();
    format!("crash-{date}-{short_id}.json")
}

/// Saves a report into `reports_dir`, creating the directory if needed
pub fn save_crash_report(reports_dir: &Path, report: &CrashReport) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(reports_dir)?;

    let path = reports_dir.join(report_file_name(report));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_carries_session() {
        let session_id = SessionId::parse("s-1").unwrap();
        let report = new_crash_report(Some(session_id.clone()), "boom", "lib.rs:42:1", "");
        assert_eq!(report.session_id, Some(session_id));
        assert_eq!(report.message, "boom");
        assert!(!report.platform.is_empty());
    }

    #[test]
    fn test_file_name_shape() {
        let report = new_crash_report(None, "boom", "", "");
        let name = report_file_name(&report);
        assert!(name.starts_with("crash-"));
        assert!(name.ends_with(&format!("-{}.json", &report.id[..8])));
    }

    #[test]
    fn test_save_crash_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = new_crash_report(None, "boom", "main.rs:10:5", "");

        let path = save_crash_report(&dir.path().join("nested"), &report).unwrap();
        let loaded: CrashReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }
}
