//! Fake container runtime for pipeline tests
//!
//! A shell script standing in for `docker`: it appends every invocation
//! to a log and, for `run`, executes the requested command on the host
//! inside the mounted workspace directory.

#![allow(dead_code)]

use resl_core::{LanguageConfig, LanguageRegistry, Pipeline, SandboxConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCRIPT: &str = r#"#!/bin/sh
printf '%s\n' "$*" >> "__LOG__"
cmd="$1"
shift
case "$cmd" in
  run)
    mount=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --rm) shift ;;
        -v) mount="$2"; shift 2 ;;
        --stop-timeout|--name|--network|--memory|--memory-swap|--pids-limit|--cpus|-w) shift 2 ;;
        *) break ;;
      esac
    done
    shift
    cd "${mount%%:*}" || exit 125
    exec "$@"
    ;;
  rm)
    exit 0
    ;;
  pull)
    case "$1" in
      broken/*) echo "pull access denied for $1" >&2; exit 1 ;;
    esac
    echo "pulled $1"
    ;;
  *)
    echo "unknown command $cmd" >&2
    exit 125
    ;;
esac
"#;

pub struct FakeRuntime {
    dir: tempfile::TempDir,
    script: PathBuf,
    log: PathBuf,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("runtime.sh");
        let log = dir.path().join("invocations.log");
        std::fs::write(&script, SCRIPT.replace("__LOG__", log.to_str().unwrap())).unwrap();
        Self { dir, script, log }
    }

    /// Workspace root inside the fake's scratch directory
    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    /// Sandbox config routing every runtime call through the script.
    ///
    /// The script is interpreted by `/bin/sh` rather than executed, so a
    /// concurrently forked test process can never hold it open for writing.
    pub fn config(&self, timeout: Duration) -> SandboxConfig {
        SandboxConfig::builder()
            .runtime("/bin/sh")
            .runtime_arg(self.script.to_str().unwrap())
            .workspace_root(self.workspace_root())
            .timeout(timeout)
            .removal_timeout(Duration::from_secs(5))
            .build()
    }

    pub fn pipeline(&self, languages: Vec<LanguageConfig>, timeout: Duration) -> Pipeline {
        Pipeline::new(
            self.config(timeout),
            LanguageRegistry::from_configs(languages).unwrap(),
        )
    }

    pub fn invocations(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.log) {
            Ok(log) => log.lines().map(str::to_owned).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Shell command lines handed to `run`, in order
    pub fn run_commands(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .filter(|line| line.starts_with("run "))
            .filter_map(|line| line.split_once(" sh -c ").map(|(_, cmd)| cmd.to_owned()))
            .collect()
    }

    /// Container names passed to `run --name`
    pub fn container_names(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .filter(|line| line.starts_with("run "))
            .filter_map(|line| {
                let mut words = line.split(' ');
                words.find(|w| *w == "--name")?;
                words.next().map(str::to_owned)
            })
            .collect()
    }

    pub fn removals(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.starts_with("rm "))
            .collect()
    }

    /// Poll the log until `count` removals show up or `limit` passes
    pub async fn wait_for_removals(&self, count: usize, limit: Duration) -> Vec<String> {
        let started = std::time::Instant::now();
        loop {
            let removals = self.removals();
            if removals.len() >= count || started.elapsed() > limit {
                return removals;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn pulls(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.starts_with("pull "))
            .collect()
    }
}

/// The workspace root holds no execution directories
pub fn assert_no_workspaces(root: &Path) {
    if let Ok(entries) = std::fs::read_dir(root) {
        let left: Vec<_> = entries.map(|e| e.unwrap().path()).collect();
        assert!(left.is_empty(), "leaked workspaces: {left:?}");
    }
}

pub fn shell() -> LanguageConfig {
    LanguageConfig::interpreted("sh", "alpine:3", "sh", "sh")
}
