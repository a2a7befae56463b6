use crate::error::{LoopgateError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CLAUDE_DIR: &str = ".claude";
pub const STATE_DIR: &str = ".claude/state";
pub const SPECS_DIR: &str = "specs";

pub const CONFIG_FILE: &str = ".claude/loop-config.yaml";
pub const LOOP_STATE_FILE: &str = "loop-state.json";
pub const RATE_LIMIT_FILE: &str = "rate-limit-state.json";
pub const REVIEW_RESULTS_FILE: &str = "claude-review-results.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn loop_state_path(root: &Path) -> PathBuf {
    state_dir(root).join(LOOP_STATE_FILE)
}

pub fn rate_limit_path(root: &Path) -> PathBuf {
    state_dir(root).join(RATE_LIMIT_FILE)
}

pub fn review_results_path(root: &Path) -> PathBuf {
    state_dir(root).join(REVIEW_RESULTS_FILE)
}

pub fn specs_dir(root: &Path) -> PathBuf {
    root.join(SPECS_DIR)
}

/// `{command}-checkpoint.json` without a feature, `{command}-{feature}.json` with one.
pub fn checkpoint_filename(command: &str, feature: Option<&str>) -> String {
    match feature {
        Some(f) => format!("{command}-{f}.json"),
        None => format!("{command}-checkpoint.json"),
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-][A-Za-z0-9._\-]*$").unwrap())
}

/// Command and feature names become file names, so they must not contain
/// separators or start with a dot.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 || !name_re().is_match(name) {
        return Err(LoopgateError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
