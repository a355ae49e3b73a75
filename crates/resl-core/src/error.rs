//! Error types for resl-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReslError {
    #[error("language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("failed to spawn container runtime {runtime:?}: {source}")]
    Spawn {
        runtime: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("timeout after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("invalid language table: {0}")]
    Registry(String),

    #[error("failed to pull image {image}: {output}")]
    ImagePull { image: String, output: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReslError {
    /// Whether the sandbox mechanism itself is at fault, as opposed to the
    /// submitted code or the caller's choice of language.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::UnsupportedLanguage(_) | Self::Timeout(_))
    }
}
