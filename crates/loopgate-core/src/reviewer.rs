//! Loop 2 adapter: builds the reviewer prompt and ingests its JSON output.
//!
//! The model is never called from here. The controller hands the prompt to
//! whoever runs the review and later feeds the raw response back through
//! [`parse_output`].

use crate::error::Result;
use crate::io;
use crate::loop_state::Finding;
use crate::paths;
use crate::vcs::Vcs;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const MAX_DIFF_LINES: usize = 10_000;
const TRUNCATION_MARKER: &str = "\n\n[... diff truncated ...]";
const RECENT_COMMITS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewContext {
    pub diff: String,
    pub files: Vec<String>,
    pub commits: String,
    /// Spec documents for the current branch, relative to the project root.
    pub specs: Vec<String>,
    pub tech_stack: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResults {
    pub timestamp: DateTime<Utc>,
    pub findings: Vec<Finding>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub fn load_review_context(root: &Path, vcs: &dyn Vcs) -> ReviewContext {
    let diff = vcs.staged_diff().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to read staged diff");
        String::new()
    });
    let files = vcs.staged_files().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to list staged files");
        Vec::new()
    });
    let commits = vcs.recent_commits(RECENT_COMMITS).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to read recent commits");
        String::new()
    });
    let specs = vcs
        .branch()
        .map(|b| find_specs(root, &b))
        .unwrap_or_default();

    ReviewContext {
        diff: truncate_diff(&diff),
        files,
        commits,
        specs,
        tech_stack: detect_tech_stack(root),
    }
}

pub fn truncate_diff(diff: &str) -> String {
    let lines: Vec<&str> = diff.split('\n').collect();
    if lines.len() <= MAX_DIFF_LINES {
        return diff.to_string();
    }
    let mut out = lines[..MAX_DIFF_LINES].join("\n");
    out.push_str(TRUNCATION_MARKER);
    out
}

fn normalize_branch_token(s: &str) -> String {
    s.to_lowercase().replace('_', "-")
}

/// Markdown files under the first `specs/<dir>` whose name contains the
/// branch name. `feature/` is ignored and `-`/`_` are interchangeable.
pub fn find_specs(root: &Path, branch: &str) -> Vec<String> {
    let needle = normalize_branch_token(branch.strip_prefix("feature/").unwrap_or(branch));
    if needle.is_empty() {
        return Vec::new();
    }
    let specs_dir = paths::specs_dir(root);
    let Ok(entries) = std::fs::read_dir(&specs_dir) else {
        return Vec::new();
    };

    let mut dirs: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    dirs.sort();

    let Some(dir) = dirs
        .into_iter()
        .find(|d| normalize_branch_token(d).contains(&needle))
    else {
        return Vec::new();
    };

    let Ok(files) = std::fs::read_dir(specs_dir.join(&dir)) else {
        return Vec::new();
    };
    let mut specs: Vec<String> = files
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(".md"))
        .map(|name| format!("{}/{dir}/{name}", paths::SPECS_DIR))
        .collect();
    specs.sort();
    specs
}

const PACKAGE_TAGS: [(&str, &str); 8] = [
    ("next", "Next.js"),
    ("react", "React"),
    ("vue", "Vue"),
    ("@angular/core", "Angular"),
    ("typescript", "TypeScript"),
    ("vitest", "Vitest"),
    ("jest", "Jest"),
    ("playwright", "Playwright"),
];

/// Comma-separated stack tags derived from the manifests present at `root`.
pub fn detect_tech_stack(root: &Path) -> String {
    let mut tags: Vec<&str> = Vec::new();

    if let Ok(data) = std::fs::read_to_string(root.join("package.json")) {
        tags.push("JavaScript");
        match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(pkg) => {
                let has = |name: &str| {
                    ["dependencies", "devDependencies"]
                        .iter()
                        .any(|section| pkg.get(section).and_then(|d| d.get(name)).is_some())
                };
                tags.extend(PACKAGE_TAGS.iter().filter(|(dep, _)| has(dep)).map(|(_, tag)| *tag));
            }
            Err(e) => tracing::warn!(error = %e, "failed to parse package.json"),
        }
    }
    if root.join("Cargo.toml").exists() {
        tags.push("Rust");
    }
    if root.join("go.mod").exists() {
        tags.push("Go");
    }
    if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
        tags.push("Python");
    }

    if tags.is_empty() {
        tags.push("JavaScript");
    }
    tags.join(", ")
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

pub fn build_review_prompt(ctx: &ReviewContext) -> String {
    let files = if ctx.files.is_empty() {
        "No files changed".to_string()
    } else {
        ctx.files.join("\n")
    };
    let commits = if ctx.commits.trim().is_empty() {
        "No recent commits"
    } else {
        ctx.commits.trim_end()
    };
    let specs = if ctx.specs.is_empty() {
        "No specs found".to_string()
    } else {
        format!("Found {} spec file(s)", ctx.specs.len())
    };
    let diff = if ctx.diff.trim().is_empty() {
        "No diff available"
    } else {
        ctx.diff.trim_end()
    };

    format!(
        r#"You are a senior code reviewer with expertise in {tech}.

Review the following staged changes thoroughly.

## Review Areas

Cover all 5 areas:

1. **Code Quality**: complexity, readability, maintainability, naming
2. **Architecture**: design patterns, separation of concerns, modularity
3. **Security**: input validation, authentication, authorization, data exposure, injection
4. **Testing**: coverage, edge cases, integration tests, test quality
5. **Documentation**: doc comments, README updates, inline comments, API docs

## Blocking Rules

- **CRITICAL** findings block the ship (security issues, major bugs, data loss risks)
- **MAJOR** findings produce warnings (tech debt, missing tests, poor patterns)
- **MINOR** findings are informational (style, small improvements)

## Context

### Changed Files
{files}

### Recent Commits
{commits}

### Specifications
{specs}

### Code Changes
```diff
{diff}
```

## Output Format

Respond with ONLY valid JSON in exactly this shape:

{{
  "findings": [
    {{
      "severity": "critical",
      "category": "security",
      "file": "path/to/file.ts",
      "line": 42,
      "message": "Clear description of the issue",
      "fix": "Actionable suggestion for fixing it"
    }}
  ]
}}

### Field Requirements

- **severity**: one of "critical", "major", "minor"
- **category**: one of "quality", "architecture", "security", "testing", "docs"
- **file**: path relative to the repository root
- **line**: line number of the issue (0 if general)
- **message**: specific description of the issue
- **fix**: concrete, actionable suggestion

If there are no issues, return: {{"findings": []}}
"#,
        tech = ctx.tech_stack,
    )
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

static FENCED_JSON: OnceLock<Regex> = OnceLock::new();
static BARE_OBJECT: OnceLock<Regex> = OnceLock::new();

fn fenced_json() -> &'static Regex {
    FENCED_JSON.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap())
}

fn bare_object() -> &'static Regex {
    BARE_OBJECT.get_or_init(|| Regex::new(r#"(?s)\{.*"findings".*\}"#).unwrap())
}

/// The first JSON object found in `raw`: the whole text, then a fenced `json`
/// code block, then an embedded `{ ... "findings" ... }` span.
fn extract_json(raw: &str) -> Option<serde_json::Value> {
    fn object(text: &str, what: &str) -> Option<serde_json::Value> {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(v) if v.is_object() => Some(v),
            Ok(_) => {
                tracing::debug!(what, "JSON is not an object, trying next strategy");
                None
            }
            Err(e) => {
                tracing::debug!(what, error = %e, "not valid JSON");
                None
            }
        }
    }

    if let Some(v) = object(raw.trim(), "whole output") {
        return Some(v);
    }
    if let Some(block) = fenced_json().captures(raw).and_then(|c| c.get(1)) {
        if let Some(v) = object(block.as_str(), "fenced block") {
            return Some(v);
        }
        tracing::warn!("failed to parse fenced JSON block");
    }
    if let Some(span) = bare_object().find(raw) {
        if let Some(v) = object(span.as_str(), "embedded object") {
            return Some(v);
        }
        tracing::warn!("failed to parse embedded JSON object");
    }
    None
}

/// Parse reviewer output leniently. Unparseable output yields no findings;
/// individual malformed findings are dropped.
pub fn parse_output(raw: &str) -> ReviewOutput {
    let Some(value) = extract_json(raw) else {
        if !raw.trim().is_empty() {
            tracing::warn!("could not parse reviewer output, treating as no findings");
        }
        return ReviewOutput::default();
    };

    let Some(items) = value.get("findings").and_then(|f| f.as_array()) else {
        return ReviewOutput::default();
    };

    let findings = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match serde_json::from_value::<Finding>(item.clone()) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "dropping malformed finding");
                None
            }
        })
        .collect();
    ReviewOutput { findings }
}

pub fn save_results(root: &Path, findings: &[Finding]) -> Result<()> {
    let results = ReviewResults {
        timestamp: Utc::now(),
        findings: findings.to_vec(),
    };
    io::write_json(&paths::review_results_path(root), &results)
}

pub fn load_results(root: &Path) -> Result<Option<ReviewResults>> {
    match io::read_optional(&paths::review_results_path(root))? {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
