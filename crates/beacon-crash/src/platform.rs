//! Platform information collector
//!
//! Never includes hostname or username.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Non-identifying platform information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    /// Kernel release where it can be read, empty otherwise
    pub kernel: String,
}

impl PlatformInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            kernel: read_kernel_release(),
        }
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if !self.kernel.is_empty() {
            write!(f, " {}", self.kernel)?;
        }
        Ok(())
    }
}

fn read_kernel_release() -> String {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.trim().to_string())
        .unwrap_or_default()
}
