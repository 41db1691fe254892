//! Beacon Crash - file-backed crash reporter
//!
//! Provides:
//! - `FileCrashReporter`: [`ICrashReporter`](beacon_core::ports::ICrashReporter)
//!   implementation that remembers the current session and writes one JSON
//!   report per panic
//! - `PlatformInfo`: non-identifying platform description stored on reports

pub mod platform;
pub mod report;
pub mod reporter;

pub use platform::PlatformInfo;
pub use report::{new_crash_report, report_file_name, save_crash_report};
pub use reporter::FileCrashReporter;
