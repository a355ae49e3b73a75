//! Sandbox executor
//!
//! Turns one stage's command line into a single container invocation:
//! auto-removed, named after the execution id, networkless, with the
//! workspace mounted as its working directory. The runtime binary is run
//! as a child process and both of its output streams are collected into
//! one buffer in arrival order.

use crate::{
    ReslError, Result, SandboxConfig, StageResult, language::LanguageRegistry,
    workspace::Execution,
};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 8 * 1024;

/// Spawns container runtime processes for one pipeline
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: Arc<SandboxConfig>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn runtime_command(&self) -> Command {
        let mut command = Command::new(&self.config.runtime);
        command.args(&self.config.runtime_args);
        command
    }

    /// Arguments of `<runtime> run ...` for one stage
    #[must_use]
    pub fn run_args(&self, execution: &Execution, command_line: &str) -> Vec<OsString> {
        let config = &self.config;
        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--rm".into(),
            "--stop-timeout".into(),
            stop_timeout_secs(config.stop_grace).to_string().into(),
            "--name".into(),
            execution.id().into(),
        ];

        if !config.allow_network {
            args.push("--network".into());
            args.push("none".into());
        }
        if let Some(bytes) = config.memory_limit {
            args.push("--memory".into());
            args.push(bytes.to_string().into());
            // Equal to --memory: no swap on top of the limit
            args.push("--memory-swap".into());
            args.push(bytes.to_string().into());
        }
        if let Some(pids) = config.max_pids {
            args.push("--pids-limit".into());
            args.push(pids.to_string().into());
        }
        if let Some(cores) = config.cpu_limit {
            args.push("--cpus".into());
            args.push(cores.to_string().into());
        }

        let mut mount = execution.workspace_dir().as_os_str().to_os_string();
        mount.push(":");
        mount.push(&config.container_workdir);

        args.extend([
            "-v".into(),
            mount,
            "-w".into(),
            config.container_workdir.clone().into(),
            execution.config().image.clone().into(),
            "sh".into(),
            "-c".into(),
            command_line.into(),
        ]);
        args
    }

    /// Start one stage's container; fails only if the runtime cannot be spawned
    pub fn spawn(&self, execution: &Execution, command_line: &str) -> Result<RunningStage> {
        let args = self.run_args(execution, command_line);
        tracing::debug!(
            execution_id = execution.id(),
            runtime = %self.config.runtime.display(),
            command = command_line,
            "spawning sandbox"
        );

        let mut child = self
            .runtime_command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ReslError::Spawn {
                runtime: self.config.runtime.clone(),
                source,
            })?;

        let output = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(collect(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(collect(stderr, Arc::clone(&output)));
        }

        Ok(RunningStage {
            name: execution.id().to_owned(),
            executor: self.clone(),
            child,
            output,
            readers,
            settled: false,
        })
    }

    /// `<runtime> rm --force <name>`, bounded by the removal timeout
    pub async fn force_remove(&self, name: &str) -> Result<()> {
        let mut command = self.runtime_command();
        command
            .args(["rm", "--force", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.removal_timeout, command.output())
            .await
            .map_err(|_| ReslError::Timeout(self.config.removal_timeout))?
            .map_err(|source| ReslError::Spawn {
                runtime: self.config.runtime.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ReslError::Execution(format!(
                "rm --force {name} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// `<runtime> pull <image>`
    pub async fn pull(&self, image: &str) -> Result<StageResult> {
        let output = self
            .runtime_command()
            .args(["pull", image])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ReslError::Spawn {
                runtime: self.config.runtime.clone(),
                source,
            })?;

        let mut combined_output = output.stdout;
        combined_output.extend_from_slice(&output.stderr);
        Ok(StageResult {
            combined_output,
            exit_code: output.status.code(),
        })
    }

    /// Pull every registered image once; the first failure aborts
    pub async fn prime_images(&self, registry: &LanguageRegistry) -> Result<()> {
        for image in registry.images() {
            tracing::info!(image, "pulling image");
            let result = self.pull(image).await?;
            if !result.is_success() {
                return Err(ReslError::ImagePull {
                    image: image.to_owned(),
                    output: result.output_str().trim().to_owned(),
                });
            }
        }
        tracing::info!(images = registry.images().len(), "images ready");
        Ok(())
    }
}

fn stop_timeout_secs(grace: Duration) -> u64 {
    grace.as_secs() + u64::from(grace.subsec_nanos() > 0)
}

fn collect<R>(mut reader: R, output: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => output.lock().extend_from_slice(&buf[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "sandbox output stream closed");
                    break;
                }
            }
        }
    })
}

/// A spawned stage whose process has not been reaped yet.
///
/// Dropping a stage that neither exited nor was terminated (its future was
/// cancelled mid-flight) fires a detached `rm --force` for its container.
#[derive(Debug)]
pub struct RunningStage {
    name: String,
    executor: SandboxExecutor,
    child: Child,
    output: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
    settled: bool,
}

impl RunningStage {
    /// Container name, equal to the execution id
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for exit and drain both streams
    pub async fn wait(&mut self) -> Result<StageResult> {
        let status = self.child.wait().await?;
        // `run --rm` returns once the container is gone
        self.settled = true;
        for reader in &mut self.readers {
            // A reader only fails if it panicked; whatever it collected is kept
            let _ = reader.await;
        }
        Ok(StageResult {
            combined_output: std::mem::take(&mut *self.output.lock()),
            exit_code: status.code(),
        })
    }

    /// SIGKILL the local runtime process, then remove the container by name.
    ///
    /// The two steps fail independently: a kill error is logged and the
    /// removal is attempted regardless.
    pub async fn terminate(&mut self) -> Result<()> {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(
                container = %self.name,
                error = %e,
                "failed to kill sandbox process"
            );
        }
        for reader in &self.readers {
            reader.abort();
        }
        let removal = self.executor.force_remove(&self.name).await;
        self.settled = true;
        removal
    }
}

impl Drop for RunningStage {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        if self.settled {
            return;
        }
        tracing::warn!(
            container = %self.name,
            "stage dropped while running, removing container"
        );

        // Drop cannot await, and the runtime may be shutting down: hand the
        // removal to a plain process reaped on its own thread.
        let config = self.executor.config();
        let removal = std::process::Command::new(&config.runtime)
            .args(&config.runtime_args)
            .args(["rm", "--force", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match removal {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => tracing::warn!(
                container = %self.name,
                error = %e,
                "forced container removal failed"
            ),
        }
    }
}
