//! Daemon configuration

use anyhow::Context;
use resl_core::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to Unix socket
    pub socket_path: PathBuf,

    /// Language table (`languages.json`); the builtin table when absent
    pub languages: Option<PathBuf>,

    /// Pull every registered image before accepting requests
    pub pull_on_start: bool,

    /// Sandbox configuration shared by all executions
    pub sandbox: SandboxConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: resl_core::config::default_socket_path(),
            languages: resl_core::config::languages_path_from_env(),
            pull_on_start: true,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Read a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("invalid config {}", path.display()))
    }

    /// How long shutdown waits for in-flight executions: one full deadline
    /// plus the forced removal that may follow it
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.sandbox.timeout + self.sandbox.removal_timeout
    }
}
