//! Per-execution workspaces
//!
//! Every execution gets its own directory under the workspace root, named
//! after the execution id. The directory holds exactly one source file
//! when the sandbox is first invoked and is mounted read-write into every
//! stage's container. Dropping the [`Execution`] deletes it.

use crate::{ReslError, Result, language::LanguageConfig, template::Template};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Prefix keeping ids valid as container names and C/Java identifiers
const ID_PREFIX: &str = "resl_";

/// Fresh, time-ordered execution id
#[must_use]
pub fn new_execution_id() -> String {
    format!("{ID_PREFIX}{}", Uuid::now_v7().simple())
}

/// One run request's workspace, source file and language
#[derive(Debug)]
pub struct Execution {
    id: String,
    workspace_dir: PathBuf,
    source_file: PathBuf,
    config: LanguageConfig,
}

impl Execution {
    /// Unique id: container name, directory name and file stem
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    #[must_use]
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    #[must_use]
    pub fn config(&self) -> &LanguageConfig {
        &self.config
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        remove_workspace(&self.id, &self.workspace_dir);
    }
}

fn remove_workspace(id: &str, dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!(execution_id = id, dir = %dir.display(), "workspace removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            execution_id = id,
            dir = %dir.display(),
            error = %e,
            "failed to remove workspace"
        ),
    }
}

/// Creates and tears down execution workspaces under one root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the workspace and write the (template-wrapped) source file
    pub fn setup(&self, config: &LanguageConfig, source_code: &str) -> Result<Execution> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            ReslError::Workspace(format!(
                "failed to create workspace root {}: {e}",
                self.root.display()
            ))
        })?;
        // The runtime daemon resolves bind mounts itself, so hand it an absolute path
        let root = self.root.canonicalize().map_err(|e| {
            ReslError::Workspace(format!("failed to resolve {}: {e}", self.root.display()))
        })?;

        let id = new_execution_id();
        let workspace_dir = root.join(&id);
        std::fs::create_dir(&workspace_dir).map_err(|e| {
            ReslError::Workspace(format!(
                "failed to create {}: {e}",
                workspace_dir.display()
            ))
        })?;

        // From here on, dropping `execution` removes the directory on any error
        let source_file = workspace_dir.join(config.source_file_name(&id));
        let execution = Execution {
            id,
            workspace_dir,
            source_file,
            config: config.clone(),
        };

        open_permissions(&execution.workspace_dir)?;

        let code = match config.template {
            Some(template) => template.apply(source_code, &execution.id),
            None => source_code.to_owned(),
        };

        std::fs::write(&execution.source_file, code).map_err(|e| {
            ReslError::Workspace(format!(
                "failed to write {}: {e}",
                execution.source_file.display()
            ))
        })?;

        tracing::debug!(
            execution_id = %execution.id,
            language = %config.key,
            template = config.template.map(Template::name),
            file = %execution.source_file.display(),
            "workspace ready"
        );

        Ok(execution)
    }

    /// Remove the workspace; failures are logged, never returned
    pub fn teardown(&self, execution: Execution) {
        drop(execution);
    }
}

// Images that run as an unprivileged user still need to write build
// artifacts into the mounted directory.
fn open_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).map_err(|e| {
        ReslError::Workspace(format!("failed to set permissions on {}: {e}", dir.display()))
    })
}
