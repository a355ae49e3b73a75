//! Timeout and cleanup supervision
//!
//! A stage races its container against a wall-clock deadline. When the
//! deadline wins, the local runtime process is killed first and the
//! container is then removed by name in a separate command: killing the
//! `docker run` client does not stop the container it started.

use crate::{
    ReslError, Result, StageResult, executor::SandboxExecutor, pipeline::Stage,
    workspace::Execution,
};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Supervisor {
    executor: SandboxExecutor,
}

impl Supervisor {
    pub const fn new(executor: SandboxExecutor) -> Self {
        Self { executor }
    }

    #[must_use]
    pub const fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    /// Run one stage, bounded by `deadline`.
    ///
    /// Spawn failures are returned before any deadline applies. On expiry
    /// this returns [`ReslError::Timeout`] after both cleanup steps ran.
    pub async fn invoke(
        &self,
        execution: &Execution,
        stage: Stage,
        command_line: &str,
        deadline: Duration,
    ) -> Result<StageResult> {
        if deadline.is_zero() {
            return Err(ReslError::Timeout(deadline));
        }

        let started = Instant::now();
        let mut running = self.executor.spawn(execution, command_line)?;

        match tokio::time::timeout(deadline, running.wait()).await {
            Ok(result) => {
                let result = result?;
                tracing::debug!(
                    execution_id = execution.id(),
                    stage = %stage,
                    exit_code = ?result.exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stage finished"
                );
                Ok(result)
            }
            Err(_) => {
                tracing::warn!(
                    execution_id = execution.id(),
                    stage = %stage,
                    deadline_ms = deadline.as_millis() as u64,
                    "stage timed out, tearing down container"
                );
                if let Err(e) = running.terminate().await {
                    tracing::warn!(
                        container = running.name(),
                        error = %e,
                        "forced container removal failed"
                    );
                }
                Err(ReslError::Timeout(deadline))
            }
        }
    }
}
