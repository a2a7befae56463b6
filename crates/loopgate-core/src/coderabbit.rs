//! Loop 3 output parsing.
//!
//! The external reviewer prints markdown: one `## <file>` section per file,
//! each with numbered `### N. Lines X[-Y]: description` suggestions. Tools
//! that print plain `ERROR:`/`WARNING:` lines are handled by
//! [`parse_log_lines`].

use crate::loop_state::{Finding, IssueSeverity, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub file: String,
    /// Line or inclusive range as printed, e.g. `45` or `67-69`.
    pub line: String,
    pub description: String,
    pub severity: IssueSeverity,
    #[serde(default)]
    pub suggestion: String,
}

impl Issue {
    pub fn to_finding(&self) -> Finding {
        Finding {
            file: Some(self.file.clone()),
            line: self.line.split('-').next().and_then(|n| n.parse().ok()),
            fix: (!self.suggestion.is_empty()).then(|| self.suggestion.clone()),
            ..Finding::new(Severity::from(self.severity), self.description.clone())
        }
    }
}

const CRITICAL_KEYWORDS: &[&str] = &[
    "security",
    "sql injection",
    "xss",
    "csrf",
    "auth",
    "token",
    "hardcoded",
    "secret",
    "password",
    "crash",
    "data loss",
    "vulnerability",
    "exploit",
    "unsafe",
    "dangerous",
    "null pointer",
    "undefined",
    "memory leak",
];

const IMPORTANT_KEYWORDS: &[&str] = &[
    "performance",
    "race condition",
    "deadlock",
    "infinite loop",
    "missing validation",
    "error handling",
    "edge case",
    "boundary",
    "exception",
    "timeout",
    "async",
    "promise",
    "memory",
    "optimization",
    "inefficient",
    "n+1",
];

/// Keyword classification; critical keywords win over important ones.
pub fn categorize_severity(description: &str) -> IssueSeverity {
    let lower = description.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        IssueSeverity::Critical
    } else if IMPORTANT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        IssueSeverity::Important
    } else {
        IssueSeverity::Minor
    }
}

static SUGGESTION_RE: OnceLock<Regex> = OnceLock::new();
static ERROR_RE: OnceLock<Regex> = OnceLock::new();
static WARNING_RE: OnceLock<Regex> = OnceLock::new();

fn suggestion_re() -> &'static Regex {
    SUGGESTION_RE
        .get_or_init(|| Regex::new(r"^### \d+\.\s+Lines?\s+(\d+(?:-\d+)?):?\s*(.+)$").unwrap())
}

fn error_re() -> &'static Regex {
    ERROR_RE.get_or_init(|| Regex::new(r"(?i)ERROR:\s*(.+)").unwrap())
}

fn warning_re() -> &'static Regex {
    WARNING_RE.get_or_init(|| Regex::new(r"(?i)WARNING:\s*(.+)").unwrap())
}

pub fn parse_issues(output: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut file: Option<String> = None;
    // Index into `issues` of the suggestion currently collecting body text.
    let mut open: Option<usize> = None;

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            let header = header.trim();
            file = (!header.is_empty() && !header.contains("**")).then(|| header.to_string());
            open = None;
            continue;
        }
        let Some(current) = &file else {
            continue;
        };
        if let Some(caps) = suggestion_re().captures(line) {
            let description = caps[2].trim().to_string();
            issues.push(Issue {
                file: current.clone(),
                line: caps[1].to_string(),
                severity: categorize_severity(&description),
                description,
                suggestion: String::new(),
            });
            open = Some(issues.len() - 1);
            continue;
        }
        if line.starts_with('#') {
            open = None;
            continue;
        }
        if let Some(idx) = open {
            let text = line.trim();
            if !text.is_empty() {
                let s = &mut issues[idx].suggestion;
                if !s.is_empty() {
                    s.push(' ');
                }
                s.push_str(text);
            }
        }
    }
    issues
}

/// `ERROR:` lines become critical findings, `WARNING:` lines major ones.
pub fn parse_log_lines(output: &str) -> Vec<Finding> {
    output
        .lines()
        .filter_map(|line| {
            if let Some(c) = error_re().captures(line) {
                Some(Finding::new(Severity::Critical, c[1].trim()))
            } else {
                warning_re()
                    .captures(line)
                    .map(|c| Finding::new(Severity::Major, c[1].trim()))
            }
        })
        .collect()
}

/// Findings from external reviewer output: markdown issues when present,
/// otherwise log-style lines.
pub fn parse_findings(output: &str) -> Vec<Finding> {
    let issues = parse_issues(output);
    if issues.is_empty() {
        return parse_log_lines(output);
    }
    issues.iter().map(Issue::to_finding).collect()
}

pub fn format_issues(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "No issues found.".to_string();
    }
    let mut out: Vec<String> = Vec::new();
    for severity in [
        IssueSeverity::Critical,
        IssueSeverity::Important,
        IssueSeverity::Minor,
    ] {
        let group: Vec<&Issue> = issues.iter().filter(|i| i.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(String::new());
        }
        out.push(format!("{} ({}):", severity.label(), group.len()));
        for issue in group {
            if severity == IssueSeverity::Minor {
                out.push(format!("  • {}:{} - {}", issue.file, issue.line, issue.description));
            } else {
                out.push(format!("  • {}:{}", issue.file, issue.line));
                out.push(format!("    {}", issue.description));
            }
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Review summary

## src/api/auth.ts

**3 suggestion(s)**

### 1. Lines 45: SQL injection - use parameterized queries

Bind the user id instead of concatenating it.

### 2. Lines 67-69: Missing validation on user ID

### 3. Line 80 Rename helper for clarity

## **Summary**

### 1. Lines 1: should be ignored
";

    #[test]
    fn parses_markdown_sections() {
        let issues = parse_issues(SAMPLE);
        assert_eq!(issues.len(), 3);

        assert_eq!(issues[0].file, "src/api/auth.ts");
        assert_eq!(issues[0].line, "45");
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
        assert_eq!(
            issues[0].suggestion,
            "Bind the user id instead of concatenating it."
        );

        assert_eq!(issues[1].line, "67-69");
        assert_eq!(issues[1].severity, IssueSeverity::Important);
        assert_eq!(issues[2].line, "80");
        assert_eq!(issues[2].severity, IssueSeverity::Minor);
    }

    #[test]
    fn keyword_classification() {
        assert_eq!(categorize_severity("Possible XSS here"), IssueSeverity::Critical);
        assert_eq!(categorize_severity("N+1 query in loop"), IssueSeverity::Important);
        assert_eq!(categorize_severity("Typo in comment"), IssueSeverity::Minor);
        // Critical keywords are checked first.
        assert_eq!(
            categorize_severity("async token refresh"),
            IssueSeverity::Critical
        );
    }

    #[test]
    fn issues_convert_to_findings() {
        let findings: Vec<_> = parse_issues(SAMPLE).iter().map(Issue::to_finding).collect();
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].severity, Severity::Major);
        assert_eq!(findings[1].line, Some(67));
        assert_eq!(findings[1].file.as_deref(), Some("src/api/auth.ts"));
        assert!(findings[1].fix.is_none());
    }

    #[test]
    fn log_lines_fallback() {
        let out = "INFO: scanning\nERROR: Security issue in file.js:42\nwarning: code smell in a.js:10\n";
        let findings = parse_findings(out);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].message, "Security issue in file.js:42");
        assert_eq!(findings[1].severity, Severity::Major);
    }

    #[test]
    fn markdown_wins_over_log_lines() {
        let findings = parse_findings(SAMPLE);
        assert_eq!(findings.len(), 3);
    }

    #[test]
    fn format_groups_by_severity() {
        let text = format_issues(&parse_issues(SAMPLE));
        let expected = "\
CRITICAL (1):
  • src/api/auth.ts:45
    SQL injection - use parameterized queries

IMPORTANT (1):
  • src/api/auth.ts:67-69
    Missing validation on user ID

MINOR (1):
  • src/api/auth.ts:80 - Rename helper for clarity";
        assert_eq!(text, expected);
        assert_eq!(format_issues(&[]), "No issues found.");
    }
}
