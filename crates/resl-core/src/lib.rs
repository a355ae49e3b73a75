//! # resl-core
//!
//! Containerized execution of untrusted source code.
//!
//! This crate provides the execution sandbox:
//! - Language registry mapping keys to images and stage commands
//! - Per-execution workspaces, removed on every exit path
//! - Container invocation with networking disabled and a unique name
//! - Wall-clock deadlines with forced container removal
//! - The install → compile → run pipeline producing a typed outcome

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod executor;
pub mod input;
pub mod language;
pub mod pipeline;
pub mod protocol;
pub mod result;
pub mod supervisor;
pub mod template;
pub mod workspace;

pub use config::SandboxConfig;
pub use error::ReslError;
pub use language::{LanguageConfig, LanguageRegistry};
pub use pipeline::Pipeline;
pub use result::{ExecutionOutcome, ExecutionReport, OutcomeKind, StageResult};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, ReslError>;
