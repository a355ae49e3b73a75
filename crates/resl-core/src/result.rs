//! Stage and execution result types

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Text reported for a timed-out execution; partial output is discarded
pub const TIMED_OUT_TEXT: &str = "Execution timed out";

/// Output of one sandbox invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResult {
    /// stdout and stderr, interleaved in arrival order
    pub combined_output: Vec<u8>,

    /// `None` when the process was not observed to exit normally
    pub exit_code: Option<i32>,
}

impl StageResult {
    #[must_use]
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.combined_output).into_owned()
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Terminal result of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success(String),
    CompileFailure(String),
    RuntimeFailure(String),
    InfrastructureError(String),
    TimedOut,
    UnsupportedLanguage(String),
}

impl ExecutionOutcome {
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::CompileFailure(_) => OutcomeKind::CompileFailure,
            Self::RuntimeFailure(_) => OutcomeKind::RuntimeFailure,
            Self::InfrastructureError(_) => OutcomeKind::InfrastructureError,
            Self::TimedOut => OutcomeKind::TimedOut,
            Self::UnsupportedLanguage(_) => OutcomeKind::UnsupportedLanguage,
        }
    }

    /// Caller-facing text: program output, or the reason for the failure
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Self::Success(text)
            | Self::CompileFailure(text)
            | Self::RuntimeFailure(text)
            | Self::InfrastructureError(text) => Cow::Borrowed(text),
            Self::TimedOut => Cow::Borrowed(TIMED_OUT_TEXT),
            Self::UnsupportedLanguage(key) => Cow::Owned(format!("language not supported: {key}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    CompileFailure,
    RuntimeFailure,
    InfrastructureError,
    TimedOut,
    UnsupportedLanguage,
}

impl OutcomeKind {
    /// Process exit code used by the CLI
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::RuntimeFailure => 1,
            Self::CompileFailure => 2,
            Self::TimedOut => 3,
            Self::UnsupportedLanguage => 4,
            Self::InfrastructureError => 5,
        }
    }

    /// Whether the sandbox environment, not the submitted code, failed
    #[must_use]
    pub const fn is_infrastructure(self) -> bool {
        matches!(self, Self::InfrastructureError)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::CompileFailure => "compile failure",
            Self::RuntimeFailure => "runtime failure",
            Self::InfrastructureError => "infrastructure error",
            Self::TimedOut => "timed out",
            Self::UnsupportedLanguage => "unsupported language",
        };
        f.write_str(s)
    }
}

/// What the caller of the pipeline receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Execution id, absent when no workspace was ever allocated
    pub id: Option<String>,

    pub kind: OutcomeKind,

    pub text: String,

    /// Wall-clock time spent in the pipeline
    pub elapsed: Duration,
}

impl ExecutionReport {
    #[must_use]
    pub fn new(id: Option<String>, outcome: &ExecutionOutcome, elapsed: Duration) -> Self {
        Self {
            id,
            kind: outcome.kind(),
            text: outcome.text().into_owned(),
            elapsed,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}
