//! Credential detection over staged files.
//!
//! Each non-comment line of every non-excluded file is matched against a
//! fixed detector list. Matches carry a redacted preview only; the matched
//! text itself is never stored or logged.

use crate::loop_state::IssueSeverity;
use crate::runner::CheckStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

const PREVIEW_MAX: usize = 60;

struct SecretPattern {
    name: &'static str,
    regex: Regex,
    severity: IssueSeverity,
}

impl SecretPattern {
    fn new(name: &'static str, pattern: &str, severity: IssueSeverity) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid secret pattern"),
            severity,
        }
    }
}

static SECRET_PATTERNS: LazyLock<Vec<SecretPattern>> = LazyLock::new(|| {
    use IssueSeverity::{Critical, Important};
    vec![
        SecretPattern::new(
            "Generic API Key",
            r#"(?i)(?:api[_-]?key|apikey|api[_-]?secret)\s*[=:]["']?([a-zA-Z0-9_\-]{20,})"#,
            Important,
        ),
        SecretPattern::new(
            "Private Key",
            r"(?i)-----BEGIN\s+(?:RSA|EC|OPENSSH|DSA)\s+PRIVATE\s+KEY-----",
            Critical,
        ),
        SecretPattern::new("AWS Access Key", r"AKIA[0-9A-Z]{16}", Critical),
        SecretPattern::new("GitHub Token", r"gh[oprsu]_[A-Za-z0-9_]{36,}", Critical),
        SecretPattern::new(
            "Database URL",
            r#"(?i)(?:postgres|mysql|mongodb)://[^\s"']+"#,
            Important,
        ),
        SecretPattern::new(
            "JWT Secret",
            r#"(?i)jwt[_-]?secret\s*[=:]["']?([a-zA-Z0-9_\-]{20,})"#,
            Important,
        ),
        SecretPattern::new(
            "OAuth Secret",
            r#"(?i)(?:client[_-]?secret|oauth[_-]?secret)\s*[=:]["']?([a-zA-Z0-9_\-]{20,})"#,
            Important,
        ),
    ]
});

static EXCLUDED_PATHS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\.env\.(?:example|sample|template)$",
        r"(?i)\.test\.[jt]sx?$",
        r"(?i)\.spec\.[jt]sx?$",
        r"(?i)test/",
        r"(?i)__tests__/",
        r"(?i)\.test/",
        r"(?i)fixtures?/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid exclusion pattern"))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretMatch {
    pub file: String,
    pub line: usize,
    pub pattern: String,
    pub severity: IssueSeverity,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub status: CheckStatus,
    pub matches: Vec<SecretMatch>,
}

impl ScanReport {
    fn from_matches(matches: Vec<SecretMatch>) -> Self {
        let status = if matches.is_empty() {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        Self { status, matches }
    }
}

pub fn is_excluded(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    EXCLUDED_PATHS.iter().any(|re| re.is_match(&normalized))
}

fn is_comment_only(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//") || t.starts_with("/*") || t.starts_with('*') || t.starts_with('#')
}

/// First four characters followed by `****`; short values are fully masked.
pub fn redact(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        return "****".to_string();
    }
    let head: String = secret.chars().take(4).collect();
    format!("{head}****")
}

/// The line with its first occurrence of `matched` redacted, cut to at most
/// 60 characters around the redaction.
pub fn preview(line: &str, matched: &str) -> String {
    let redacted = redact(matched);
    let replaced = line.replacen(matched, &redacted, 1);
    let mut chars: Vec<char> = replaced.chars().collect();

    if chars.len() > PREVIEW_MAX {
        let at = replaced
            .find(&redacted)
            .map(|byte| replaced[..byte].chars().count())
            .unwrap_or(0);
        if at > 20 {
            let mut tail = vec!['.', '.', '.'];
            tail.extend_from_slice(&chars[at - 17..]);
            chars = tail;
        }
        if chars.len() > PREVIEW_MAX {
            chars.truncate(PREVIEW_MAX - 3);
            chars.extend(['.', '.', '.']);
        }
    }

    chars.into_iter().collect::<String>().trim().to_string()
}

/// Scan file content already in memory. `file` is used for exclusion and
/// reporting only.
pub fn scan_content(file: &str, content: &str) -> Vec<SecretMatch> {
    if is_excluded(file) {
        return Vec::new();
    }
    let mut matches = Vec::new();
    for (idx, line) in content.split('\n').enumerate() {
        if is_comment_only(line) {
            continue;
        }
        for pattern in SECRET_PATTERNS.iter() {
            for m in pattern.regex.find_iter(line) {
                matches.push(SecretMatch {
                    file: file.to_string(),
                    line: idx + 1,
                    pattern: pattern.name.to_string(),
                    severity: pattern.severity,
                    preview: preview(line, m.as_str()),
                });
            }
        }
    }
    matches
}

async fn scan_file(root: &Path, file: &str) -> Vec<SecretMatch> {
    if is_excluded(file) {
        return Vec::new();
    }
    match tokio::fs::read_to_string(root.join(file)).await {
        Ok(content) => scan_content(file, &content),
        Err(e) => {
            // Binary, deleted or unreadable files are not findings.
            tracing::debug!(file, error = %e, "skipping unreadable file");
            Vec::new()
        }
    }
}

/// Scan `files` (relative to `root`, or absolute) concurrently.
pub async fn scan_files(root: &Path, files: &[String]) -> ScanReport {
    let scans = files.iter().map(|f| scan_file(root, f));
    let matches: Vec<SecretMatch> = futures::future::join_all(scans)
        .await
        .into_iter()
        .flatten()
        .collect();
    if !matches.is_empty() {
        tracing::warn!(count = matches.len(), "potential secrets detected");
    }
    ScanReport::from_matches(matches)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
