//! Persisted pipeline state and the result shape shared by every loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const STATE_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// LoopStatus / SkipReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Pass,
    Fail,
    Skip,
    /// Loop 2 prompt is prepared and waiting for reviewer output.
    Ready,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopStatus::Pass => "pass",
            LoopStatus::Fail => "fail",
            LoopStatus::Skip => "skip",
            LoopStatus::Ready => "ready",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RateLimitExceeded,
    FlagSkip,
    DisabledInConfig,
    NoStagedChanges,
    ExternalToolMissing,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::RateLimitExceeded => "rate_limit_exceeded",
            SkipReason::FlagSkip => "flag_skip",
            SkipReason::DisabledInConfig => "disabled_in_config",
            SkipReason::NoStagedChanges => "no_staged_changes",
            SkipReason::ExternalToolMissing => "external_tool_missing",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

/// Severity scale used by the external reviewer and the secret scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Important,
    Minor,
}

impl IssueSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            IssueSeverity::Critical => "CRITICAL",
            IssueSeverity::Important => "IMPORTANT",
            IssueSeverity::Minor => "MINOR",
        }
    }
}

impl From<IssueSeverity> for Severity {
    fn from(s: IssueSeverity) -> Self {
        match s {
            IssueSeverity::Critical => Severity::Critical,
            IssueSeverity::Important => Severity::Major,
            IssueSeverity::Minor => Severity::Minor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Quality,
    Architecture,
    Security,
    Testing,
    Docs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: Category::Quality,
            file: None,
            line: None,
            message: message.into(),
            fix: None,
        }
    }
}

pub fn count_severity(findings: &[Finding], severity: Severity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

// ---------------------------------------------------------------------------
// LoopResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResult {
    pub status: LoopStatus,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<Finding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_quota: Option<u32>,
}

impl LoopResult {
    pub fn new(status: LoopStatus, elapsed_ms: u64) -> Self {
        Self {
            status,
            elapsed_ms,
            reason: None,
            findings: None,
            details: None,
            remaining_quota: None,
        }
    }

    pub fn skip(reason: SkipReason, elapsed_ms: u64) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(LoopStatus::Skip, elapsed_ms)
        }
    }

    /// `fail` when any finding is critical, otherwise `pass`.
    pub fn from_findings(findings: Vec<Finding>, elapsed_ms: u64) -> Self {
        let status = if findings.iter().any(|f| f.severity == Severity::Critical) {
            LoopStatus::Fail
        } else {
            LoopStatus::Pass
        };
        Self {
            findings: Some(findings),
            ..Self::new(status, elapsed_ms)
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_remaining_quota(mut self, remaining: u32) -> Self {
        self.remaining_quota = Some(remaining);
        self
    }

    pub fn findings(&self) -> &[Finding] {
        self.findings.as_deref().unwrap_or(&[])
    }

    pub fn count(&self, severity: Severity) -> usize {
        count_severity(self.findings(), severity)
    }

    /// One-line status for summaries, e.g. `skip (rate_limit_exceeded)`.
    pub fn label(&self) -> String {
        match (&self.reason, self.findings.as_ref()) {
            (Some(reason), _) => format!("{} ({reason})", self.status),
            (None, Some(f)) if !f.is_empty() => format!("{} ({} finding(s))", self.status, f.len()),
            _ => self.status.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Loops {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop1_tier1: Option<LoopResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop1_tier2: Option<LoopResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop2_claude: Option<LoopResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop3_coderabbit: Option<LoopResult>,
}

impl Loops {
    /// Executed loops in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &LoopResult)> {
        [
            ("loop1_tier1", &self.loop1_tier1),
            ("loop1_tier2", &self.loop1_tier2),
            ("loop2_claude", &self.loop2_claude),
            ("loop3_coderabbit", &self.loop3_coderabbit),
        ]
        .into_iter()
        .filter_map(|(name, r)| r.as_ref().map(|r| (name, r)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.iter()
            .map(|(name, r)| format!("{name}: {}", r.label()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// LoopState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub version: String,
    pub branch: String,
    pub head_commit: String,
    pub timestamp: DateTime<Utc>,
    pub loops: Loops,
    pub ship_allowed: bool,
    #[serde(default)]
    pub blockers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skip_result_serializes_reason() {
        let r = LoopResult::skip(SkipReason::RateLimitExceeded, 3).with_remaining_quota(0);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            json!({"status": "skip", "elapsed_ms": 3, "reason": "rate_limit_exceeded", "remaining_quota": 0})
        );
    }

    #[test]
    fn from_findings_fails_only_on_critical() {
        let minor = vec![Finding::new(Severity::Major, "naming")];
        assert_eq!(LoopResult::from_findings(minor, 0).status, LoopStatus::Pass);

        let critical = vec![
            Finding::new(Severity::Minor, "typo"),
            Finding::new(Severity::Critical, "sql injection"),
        ];
        let r = LoopResult::from_findings(critical, 0);
        assert_eq!(r.status, LoopStatus::Fail);
        assert_eq!(r.count(Severity::Critical), 1);
    }

    #[test]
    fn important_issues_become_major_findings() {
        assert_eq!(Severity::from(IssueSeverity::Important), Severity::Major);
        assert_eq!(Severity::from(IssueSeverity::Critical), Severity::Critical);
    }

    #[test]
    fn finding_category_defaults_to_quality() {
        let f: Finding = serde_json::from_value(json!({
            "severity": "minor",
            "message": "rename variable"
        }))
        .unwrap();
        assert_eq!(f.category, Category::Quality);
        assert!(f.file.is_none());
    }

    #[test]
    fn loops_iterate_in_pipeline_order() {
        let loops = Loops {
            loop3_coderabbit: Some(LoopResult::skip(SkipReason::FlagSkip, 0)),
            loop1_tier1: Some(LoopResult::new(LoopStatus::Pass, 10)),
            ..Default::default()
        };
        let names: Vec<_> = loops.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["loop1_tier1", "loop3_coderabbit"]);
        assert_eq!(
            loops.summary_lines(),
            ["loop1_tier1: pass", "loop3_coderabbit: skip (flag_skip)"]
        );
    }

    #[test]
    fn absent_loops_are_not_serialized() {
        let v = serde_json::to_value(Loops::default()).unwrap();
        assert_eq!(v, json!({}));
        assert!(Loops::default().is_empty());
    }
}
