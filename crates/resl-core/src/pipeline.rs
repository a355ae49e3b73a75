//! Pipeline orchestration
//!
//! `Idle → Setup → Installing → Compiling → Running → Cleanup → Done`.
//! Install and compile are skipped when the language does not configure
//! them. A failing stage short-circuits the rest, and cleanup runs on
//! every path that got past setup.

use crate::{
    ExecutionOutcome, ExecutionReport, ReslError, Result, SandboxConfig, StageResult,
    executor::SandboxExecutor,
    language::LanguageRegistry,
    supervisor::Supervisor,
    workspace::{Execution, WorkspaceManager},
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Install,
    Compile,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Compile => "compile",
            Self::Run => "run",
        })
    }
}

/// Multi-stage execution of submitted code, one independent run per call
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<LanguageRegistry>,
    workspace: WorkspaceManager,
    supervisor: Supervisor,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(config: SandboxConfig, registry: LanguageRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            workspace: WorkspaceManager::new(&config.workspace_root),
            timeout: config.timeout,
            supervisor: Supervisor::new(SandboxExecutor::new(config)),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn executor(&self) -> &SandboxExecutor {
        self.supervisor.executor()
    }

    /// Pull every registered image; call once before serving requests
    pub async fn prime(&self) -> Result<()> {
        self.executor().prime_images(&self.registry).await
    }

    /// Execute `source_code` as `language` and report the terminal outcome
    pub async fn execute(&self, language: &str, source_code: &str) -> ExecutionReport {
        let started = Instant::now();

        let config = match self.registry.resolve(language) {
            Ok(config) => config,
            Err(_) => {
                tracing::info!(language, "rejected unsupported language");
                let outcome = ExecutionOutcome::UnsupportedLanguage(language.to_owned());
                return ExecutionReport::new(None, &outcome, started.elapsed());
            }
        };

        let execution = match self.workspace.setup(config, source_code) {
            Ok(execution) => execution,
            Err(e) => {
                tracing::error!(language, error = %e, "workspace setup failed");
                let outcome = ExecutionOutcome::InfrastructureError(e.to_string());
                return ExecutionReport::new(None, &outcome, started.elapsed());
            }
        };

        let id = execution.id().to_owned();
        tracing::info!(
            execution_id = %id,
            language,
            code_len = source_code.len(),
            "execution started"
        );

        let outcome = self.run_stages(&execution, started).await;

        // Cleanup
        self.workspace.teardown(execution);

        let report = ExecutionReport::new(Some(id), &outcome, started.elapsed());
        tracing::info!(
            execution_id = report.id.as_deref().unwrap_or_default(),
            language,
            outcome = %report.kind,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "execution finished"
        );
        report
    }

    async fn run_stages(&self, execution: &Execution, started: Instant) -> ExecutionOutcome {
        let config = execution.config();
        let id = execution.id();

        if let Some(line) = config.install_line() {
            match self.stage(execution, Stage::Install, &line, started).await {
                Ok(result) if result.is_success() => {}
                Ok(result) => return ExecutionOutcome::RuntimeFailure(result.output_str()),
                Err(e) => return outcome_for_error(e),
            }
        }

        if let Some(line) = config.compile_line(id) {
            match self.stage(execution, Stage::Compile, &line, started).await {
                Ok(result) if result.is_success() => {
                    let missing = missing_artifacts(execution);
                    if !missing.is_empty() {
                        let output = result.output_str();
                        return ExecutionOutcome::CompileFailure(if output.trim().is_empty() {
                            format!("compilation produced no {}", missing.join(", "))
                        } else {
                            output
                        });
                    }
                }
                Ok(result) => return ExecutionOutcome::CompileFailure(result.output_str()),
                Err(e) => return outcome_for_error(e),
            }
        }

        let line = config.run_line(id);
        match self.stage(execution, Stage::Run, &line, started).await {
            Ok(result) if result.is_success() => ExecutionOutcome::Success(result.output_str()),
            Ok(result) => ExecutionOutcome::RuntimeFailure(result.output_str()),
            Err(e) => outcome_for_error(e),
        }
    }

    /// Run one stage with whatever is left of the end-to-end deadline
    async fn stage(
        &self,
        execution: &Execution,
        stage: Stage,
        command_line: &str,
        started: Instant,
    ) -> Result<StageResult> {
        let remaining = self.timeout.saturating_sub(started.elapsed());
        tracing::debug!(
            execution_id = execution.id(),
            stage = %stage,
            command = command_line,
            remaining_ms = remaining.as_millis() as u64,
            "stage starting"
        );
        self.supervisor
            .invoke(execution, stage, command_line, remaining)
            .await
    }
}

fn missing_artifacts(execution: &Execution) -> Vec<String> {
    execution
        .config()
        .expected_outputs(execution.id())
        .into_iter()
        .filter(|file| !execution.workspace_dir().join(file).exists())
        .collect()
}

/// Keep the code-caused/infrastructure split intact across the boundary
fn outcome_for_error(error: ReslError) -> ExecutionOutcome {
    if error.is_infrastructure() {
        tracing::error!(error = %error, "sandbox infrastructure failure");
        return ExecutionOutcome::InfrastructureError(error.to_string());
    }
    match error {
        ReslError::UnsupportedLanguage(key) => ExecutionOutcome::UnsupportedLanguage(key),
        _ => ExecutionOutcome::TimedOut,
    }
}
