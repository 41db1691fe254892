//! Construction options for [`Beacon`](crate::Beacon)

use std::path::PathBuf;
use std::sync::Arc;

use beacon_core::config::Config;
use beacon_core::ports::{ICrashReporter, IUploadClient};
use beacon_crash::FileCrashReporter;

/// Everything a [`Beacon`](crate::Beacon) is built from
#[derive(Clone)]
pub struct BeaconOptions {
    pub config: Config,
    /// Transport for reconciled sessions; without one nothing is uploaded
    pub upload_client: Option<Arc<dyn IUploadClient>>,
    pub crash_reporter: Option<Arc<dyn ICrashReporter>>,
    /// Reporter whose panic hook is installed on start
    pub(crate) panic_hook: Option<FileCrashReporter>,
    /// Keep the store in memory instead of at `storage.path`
    pub in_memory: bool,
}

impl BeaconOptions {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            upload_client: None,
            crash_reporter: None,
            panic_hook: None,
            in_memory: false,
        }
    }

    /// Options from the configuration file at its default path
    pub fn from_default_config() -> Self {
        Self::new(Config::load_or_default(&Config::default_path()))
    }

    pub fn with_upload_client(mut self, client: Arc<dyn IUploadClient>) -> Self {
        self.upload_client = Some(client);
        self
    }

    pub fn with_crash_reporter(mut self, reporter: Arc<dyn ICrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    /// Uses a [`FileCrashReporter`] writing to `reports_dir` and installs
    /// its panic hook when the SDK starts
    pub fn with_file_crash_reporter(mut self, reports_dir: PathBuf) -> Self {
        let reporter = FileCrashReporter::new(reports_dir);
        self.crash_reporter = Some(Arc::new(reporter.clone()));
        self.panic_hook = Some(reporter);
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }
}

impl std::fmt::Debug for BeaconOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconOptions")
            .field("config", &self.config)
            .field("has_upload_client", &self.upload_client.is_some())
            .field("has_crash_reporter", &self.crash_reporter.is_some())
            .field("in_memory", &self.in_memory)
            .finish()
    }
}
