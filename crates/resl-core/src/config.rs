//! Sandbox configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every execution driven through one pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container runtime binary (`docker`, `podman`, ...)
    pub runtime: PathBuf,

    /// Global options placed before the runtime subcommand (`--context`, `--host`, ...)
    pub runtime_args: Vec<String>,

    /// Host directory under which per-execution workspaces are created
    pub workspace_root: PathBuf,

    /// Mount point of the workspace inside the container
    pub container_workdir: String,

    /// Grace period the container gets when asked to stop
    pub stop_grace: Duration,

    /// End-to-end deadline shared by all stages of one execution
    pub timeout: Duration,

    /// Upper bound on the forced removal issued after a timeout
    pub removal_timeout: Duration,

    /// Memory limit in bytes, `None` leaves the runtime default
    pub memory_limit: Option<u64>,

    /// CPU limit in cores, `None` leaves the runtime default
    pub cpu_limit: Option<f32>,

    /// Maximum number of processes/threads inside the container
    pub max_pids: Option<u32>,

    /// Allow network access
    pub allow_network: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            runtime_args: Vec::new(),
            workspace_root: std::env::temp_dir().join("resl"),
            container_workdir: "/usr/src/app".into(),
            stop_grace: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            removal_timeout: Duration::from_secs(10),
            memory_limit: Some(256 * 1024 * 1024), // 256MB
            cpu_limit: Some(1.0),
            max_pids: Some(64),
            allow_network: false,
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }
}

/// Builder for SandboxConfig
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    #[must_use]
    pub fn runtime(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.runtime = path.into();
        self
    }

    #[must_use]
    pub fn runtime_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.runtime_args.push(arg.into());
        self
    }

    #[must_use]
    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    #[must_use]
    pub fn container_workdir(mut self, dir: impl Into<String>) -> Self {
        self.config.container_workdir = dir.into();
        self
    }

    #[must_use]
    pub fn stop_grace(mut self, duration: Duration) -> Self {
        self.config.stop_grace = duration;
        self
    }

    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    #[must_use]
    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    #[must_use]
    pub fn removal_timeout(mut self, duration: Duration) -> Self {
        self.config.removal_timeout = duration;
        self
    }

    #[must_use]
    pub fn memory_limit(mut self, bytes: Option<u64>) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn memory_limit_mb(self, mb: u64) -> Self {
        self.memory_limit(Some(mb * 1024 * 1024))
    }

    #[must_use]
    pub fn cpu_limit(mut self, cores: Option<f32>) -> Self {
        self.config.cpu_limit = cores;
        self
    }

    #[must_use]
    pub fn max_pids(mut self, pids: Option<u32>) -> Self {
        self.config.max_pids = pids;
        self
    }

    #[must_use]
    pub fn allow_network(mut self, allow: bool) -> Self {
        self.config.allow_network = allow;
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Get the container runtime from RESL_RUNTIME or fall back to `docker`
pub fn default_runtime() -> PathBuf {
    std::env::var_os("RESL_RUNTIME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("docker"))
}

/// Get default socket path from RESL_SOCKET env var or system default
///
/// Returns:
/// - `$RESL_SOCKET` if set (for development)
/// - `/run/resl/resl.sock` otherwise (production)
pub fn default_socket_path() -> PathBuf {
    std::env::var("RESL_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/resl/resl.sock"))
}

/// Language table path from RESL_LANGUAGES, if set
pub fn languages_path_from_env() -> Option<PathBuf> {
    std::env::var_os("RESL_LANGUAGES").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_network() {
        let config = SandboxConfig::default();
        assert!(!config.allow_network);
        assert_eq!(config.stop_grace, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.container_workdir, "/usr/src/app");
    }

    #[test]
    fn builder_overrides() {
        let config = SandboxConfig::builder()
            .runtime("/usr/bin/podman")
            .timeout_secs(5)
            .memory_limit_mb(128)
            .max_pids(None)
            .build();

        assert_eq!(config.runtime, PathBuf::from("/usr/bin/podman"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.memory_limit, Some(128 * 1024 * 1024));
        assert_eq!(config.max_pids, None);
    }
}
