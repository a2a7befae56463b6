//! Read-only version-control queries.
//!
//! The pipeline needs four things from the VCS: the HEAD commit, the current
//! branch, the staged file list and the staged diff (plus a short log for the
//! reviewer prompt). Nothing here ever mutates the repository.

use crate::error::{LoopgateError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Placeholder stored when HEAD cannot be resolved (no repository, no commits).
pub const UNKNOWN_COMMIT: &str = "unknown";

pub trait Vcs: Send + Sync {
    fn head_commit(&self) -> Option<String>;
    fn branch(&self) -> Option<String>;
    /// Staged paths (added, copied or modified), relative to the project root.
    /// Files staged outside a nested project root start with `../`.
    fn staged_files(&self) -> Result<Vec<String>>;
    fn staged_diff(&self) -> Result<String>;
    fn recent_commits(&self, count: usize) -> Result<String>;
}

/// True when a state recorded at `saved` no longer describes `live`.
///
/// Both sides fall back to [`UNKNOWN_COMMIT`], so outside a repository a state
/// written and read in the same place stays fresh.
pub fn is_stale(saved: &str, live: Option<&str>) -> bool {
    saved != live.unwrap_or(UNKNOWN_COMMIT)
}

/// `git` binary implementation.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        tracing::debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| LoopgateError::Git(format!("failed to spawn git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoopgateError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vcs for GitCli {
    fn head_commit(&self) -> Option<String> {
        self.git(&["rev-parse", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn branch(&self) -> Option<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn staged_files(&self) -> Result<Vec<String>> {
        // Names come back relative to the repository top level, which is not
        // the project root when `.claude/` sits in a subdirectory.
        let prefix = self.git(&["rev-parse", "--show-prefix"])?;
        let prefix = prefix.trim();
        let out = self.git(&["diff", "--cached", "--name-only", "--diff-filter=ACM"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| relative_to_prefix(l, prefix))
            .collect())
    }

    fn staged_diff(&self) -> Result<String> {
        self.git(&["diff", "--cached", "--no-color", "--diff-filter=d"])
    }

    fn recent_commits(&self, count: usize) -> Result<String> {
        let n = format!("-{count}");
        self.git(&["log", &n, "--oneline", "--no-color"])
    }
}

/// Re-root a top-level-relative `path` at the subdirectory `prefix`
/// (`git rev-parse --show-prefix` output, e.g. `packages/app/`).
fn relative_to_prefix(path: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    if let Some(inside) = path.strip_prefix(prefix) {
        return inside.to_string();
    }
    let depth = prefix.split('/').filter(|c| !c.is_empty()).count();
    format!("{}{path}", "../".repeat(depth))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory VCS for unit tests.
    #[derive(Debug, Default)]
    pub struct FakeVcs {
        pub head: Mutex<Option<String>>,
        pub branch: Option<String>,
        pub staged: Vec<String>,
        pub diff: String,
        pub commits: String,
    }

    impl FakeVcs {
        pub fn at(head: &str) -> Self {
            Self {
                head: Mutex::new(Some(head.to_string())),
                branch: Some("main".to_string()),
                ..Default::default()
            }
        }

        pub fn set_head(&self, head: &str) {
            *self.head.lock().unwrap() = Some(head.to_string());
        }
    }

    impl Vcs for FakeVcs {
        fn head_commit(&self) -> Option<String> {
            self.head.lock().unwrap().clone()
        }

        fn branch(&self) -> Option<String> {
            self.branch.clone()
        }

        fn staged_files(&self) -> Result<Vec<String>> {
            Ok(self.staged.clone())
        }

        fn staged_diff(&self) -> Result<String> {
            Ok(self.diff.clone())
        }

        fn recent_commits(&self, _count: usize) -> Result<String> {
            Ok(self.commits.clone())
        }
    }
}
