//! Ship decision and the ship gate that enforces it.
//!
//! [`ship_decision`] is a pure function of the loop results and the blocking
//! rules; the controller stores its output in the state file. [`evaluate`]
//! reads that file back when someone tries to ship.

use crate::config::BlockingConfig;
use crate::io;
use crate::loop_state::{LoopState, LoopStatus, Loops, Severity};
use crate::paths;
use crate::vcs::{self, Vcs};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipDecision {
    pub ship_allowed: bool,
    pub blockers: Vec<String>,
}

pub fn ship_decision(loops: &Loops, blocking: &BlockingConfig) -> ShipDecision {
    let mut blockers = Vec::new();

    if matches!(&loops.loop1_tier1, Some(r) if r.status == LoopStatus::Fail) {
        blockers.push("Loop1-T1 failed: Fast checks did not pass".to_string());
    }
    if matches!(&loops.loop1_tier2, Some(r) if r.status == LoopStatus::Fail) {
        blockers.push("Loop1-T2 failed: Comprehensive checks did not pass".to_string());
    }

    // Findings count regardless of status: a `pass` with major findings still
    // blocks when majors are configured to.
    if let Some(r) = &loops.loop2_claude {
        let critical = r.count(Severity::Critical);
        let major = r.count(Severity::Major);
        if critical > 0 && blocking.critical_blocks_ship {
            blockers.push(format!("Loop2 found {critical} critical issue(s)"));
        }
        if major > 0 && blocking.major_blocks_ship {
            blockers.push(format!("Loop2 found {major} major issue(s)"));
        }
    }

    if let Some(r) = &loops.loop3_coderabbit {
        let critical = r.count(Severity::Critical);
        if critical > 0 {
            blockers.push(format!("Loop3 (CodeRabbit) found {critical} critical issue(s)"));
        }
    }

    ShipDecision {
        ship_allowed: blockers.is_empty(),
        blockers,
    }
}

// ---------------------------------------------------------------------------
// Ship gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    NoState,
    Corrupted { error: String },
    Stale { reviewed: String, current: String },
    Blocked,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NoState => f.write_str("no review state found"),
            BlockReason::Corrupted { error } => write!(f, "corrupted state: {error}"),
            BlockReason::Stale { reviewed, current } => write!(
                f,
                "stale state, commit mismatch (reviewed {}, HEAD is {})",
                short(reviewed),
                short(current)
            ),
            BlockReason::Blocked => f.write_str("review found blocking issues"),
        }
    }
}

fn short(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ShipVerdict {
    Allow {
        bypassed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        head_commit: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    Block {
        reason: BlockReason,
        message: String,
        blockers: Vec<String>,
        loop_status: Vec<String>,
        remediation: Vec<String>,
    },
}

impl ShipVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ShipVerdict::Allow { .. })
    }

    fn block(reason: BlockReason, remediation: Vec<String>) -> Self {
        ShipVerdict::Block {
            message: reason.to_string(),
            reason,
            blockers: Vec::new(),
            loop_status: Vec::new(),
            remediation,
        }
    }
}

/// Decide whether shipping may proceed for the current HEAD.
pub fn evaluate(root: &Path, vcs: &dyn Vcs, force: bool) -> ShipVerdict {
    if force {
        tracing::warn!("ship gate bypassed with --force; review state not checked");
        return ShipVerdict::Allow {
            bypassed: true,
            head_commit: None,
            timestamp: None,
        };
    }

    let path = paths::loop_state_path(root);
    let rerun = "loopgate run".to_string();

    let data = match io::read_optional(&path) {
        Ok(Some(data)) if !data.trim().is_empty() => data,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "ship gate: no review state found");
            return ShipVerdict::block(BlockReason::NoState, vec![rerun]);
        }
        Err(e) => {
            return ShipVerdict::block(
                BlockReason::Corrupted {
                    error: e.to_string(),
                },
                vec![format!("rm {}", path.display()), rerun],
            );
        }
    };

    let state: LoopState = match serde_json::from_str(&data) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "ship gate: review state is corrupted");
            return ShipVerdict::block(
                BlockReason::Corrupted {
                    error: e.to_string(),
                },
                vec![format!("rm {}", path.display()), rerun],
            );
        }
    };

    let live = vcs.head_commit();
    if vcs::is_stale(&state.head_commit, live.as_deref()) {
        tracing::warn!(reviewed = %state.head_commit, "ship gate: review state is stale");
        return ShipVerdict::block(
            BlockReason::Stale {
                reviewed: state.head_commit,
                current: live.unwrap_or_else(|| vcs::UNKNOWN_COMMIT.to_string()),
            },
            vec![rerun],
        );
    }

    if !state.ship_allowed {
        let blockers = if state.blockers.is_empty() {
            vec![format!("see {} for details", path.display())]
        } else {
            state.blockers
        };
        return ShipVerdict::Block {
            message: BlockReason::Blocked.to_string(),
            reason: BlockReason::Blocked,
            blockers,
            loop_status: state.loops.summary_lines(),
            remediation: vec![
                format!("fix the issues, then {rerun}"),
                "loopgate ship --force".to_string(),
            ],
        };
    }

    tracing::info!(commit = %short(&state.head_commit), "ship gate approved");
    ShipVerdict::Allow {
        bypassed: false,
        head_commit: Some(state.head_commit),
        timestamp: Some(state.timestamp),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_state::{Finding, LoopResult, SkipReason, STATE_VERSION};
    use crate::vcs::testing::FakeVcs;
    use tempfile::TempDir;

    fn pass() -> Option<LoopResult> {
        Some(LoopResult::new(LoopStatus::Pass, 1))
    }

    fn fail() -> Option<LoopResult> {
        Some(LoopResult::new(LoopStatus::Fail, 1))
    }

    fn with(findings: &[Severity]) -> Option<LoopResult> {
        let findings = findings
            .iter()
            .map(|s| Finding::new(*s, "issue"))
            .collect();
        Some(LoopResult::from_findings(findings, 1))
    }

    #[test]
    fn all_passing_loops_allow_ship() {
        let loops = Loops {
            loop1_tier1: pass(),
            loop1_tier2: pass(),
            loop2_claude: with(&[Severity::Minor]),
            loop3_coderabbit: Some(LoopResult::skip(SkipReason::RateLimitExceeded, 0)),
        };
        let d = ship_decision(&loops, &BlockingConfig::default());
        assert!(d.ship_allowed);
        assert!(d.blockers.is_empty());
    }

    #[test]
    fn tier_failures_always_block() {
        let loops = Loops {
            loop1_tier1: fail(),
            ..Default::default()
        };
        let d = ship_decision(&loops, &BlockingConfig::default());
        assert_eq!(d.blockers, ["Loop1-T1 failed: Fast checks did not pass"]);

        let loops = Loops {
            loop1_tier1: pass(),
            loop1_tier2: fail(),
            ..Default::default()
        };
        let d = ship_decision(&loops, &BlockingConfig::default());
        assert_eq!(d.blockers, ["Loop1-T2 failed: Comprehensive checks did not pass"]);
    }

    #[test]
    fn loop2_blocking_follows_config() {
        let loops = Loops {
            loop2_claude: with(&[Severity::Critical, Severity::Major, Severity::Major]),
            ..Default::default()
        };
        let d = ship_decision(&loops, &BlockingConfig::default());
        assert_eq!(d.blockers, ["Loop2 found 1 critical issue(s)"]);

        let strict = BlockingConfig {
            critical_blocks_ship: true,
            major_blocks_ship: true,
        };
        let d = ship_decision(&loops, &strict);
        assert_eq!(
            d.blockers,
            ["Loop2 found 1 critical issue(s)", "Loop2 found 2 major issue(s)"]
        );

        let lax = BlockingConfig {
            critical_blocks_ship: false,
            major_blocks_ship: false,
        };
        assert!(ship_decision(&loops, &lax).ship_allowed);
    }

    #[test]
    fn major_findings_on_passing_loop2_block_when_configured() {
        let loops = Loops {
            loop2_claude: with(&[Severity::Major]),
            ..Default::default()
        };
        assert_eq!(loops.loop2_claude.as_ref().unwrap().status, LoopStatus::Pass);
        let strict = BlockingConfig {
            critical_blocks_ship: true,
            major_blocks_ship: true,
        };
        assert!(!ship_decision(&loops, &strict).ship_allowed);
    }

    #[test]
    fn loop3_blocks_only_on_critical() {
        let loops = Loops {
            loop3_coderabbit: Some(LoopResult {
                details: Some(serde_json::json!({"error": "exit 1"})),
                ..LoopResult::new(LoopStatus::Fail, 1)
            }),
            ..Default::default()
        };
        assert!(ship_decision(&loops, &BlockingConfig::default()).ship_allowed);

        let loops = Loops {
            loop3_coderabbit: with(&[Severity::Critical, Severity::Critical]),
            ..Default::default()
        };
        let d = ship_decision(&loops, &BlockingConfig::default());
        assert_eq!(d.blockers, ["Loop3 (CodeRabbit) found 2 critical issue(s)"]);
    }

    #[test]
    fn decision_is_deterministic() {
        let loops = Loops {
            loop1_tier1: pass(),
            loop2_claude: with(&[Severity::Critical]),
            ..Default::default()
        };
        let cfg = BlockingConfig::default();
        assert_eq!(ship_decision(&loops, &cfg), ship_decision(&loops, &cfg));
    }

    // -- gate --

    fn write_state(dir: &TempDir, head: &str, loops: Loops) {
        let decision = ship_decision(&loops, &BlockingConfig::default());
        let state = LoopState {
            version: STATE_VERSION.to_string(),
            branch: "main".to_string(),
            head_commit: head.to_string(),
            timestamp: Utc::now(),
            loops,
            ship_allowed: decision.ship_allowed,
            blockers: decision.blockers,
        };
        io::write_json(&paths::loop_state_path(dir.path()), &state).unwrap();
    }

    #[test]
    fn force_bypasses_everything() {
        let dir = TempDir::new().unwrap();
        let v = evaluate(dir.path(), &FakeVcs::at("abc"), true);
        assert!(matches!(v, ShipVerdict::Allow { bypassed: true, .. }));
    }

    #[test]
    fn missing_state_blocks() {
        let dir = TempDir::new().unwrap();
        let v = evaluate(dir.path(), &FakeVcs::at("abc"), false);
        match v {
            ShipVerdict::Block {
                reason,
                remediation,
                ..
            } => {
                assert_eq!(reason, BlockReason::NoState);
                assert_eq!(remediation, ["loopgate run"]);
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn corrupted_state_blocks_with_rm_remediation() {
        let dir = TempDir::new().unwrap();
        let path = paths::loop_state_path(dir.path());
        io::atomic_write(&path, b"{not json").unwrap();
        match evaluate(dir.path(), &FakeVcs::at("abc"), false) {
            ShipVerdict::Block {
                reason: BlockReason::Corrupted { .. },
                remediation,
                ..
            } => assert!(remediation[0].starts_with("rm ")),
            other => panic!("expected corrupted block, got {other:?}"),
        }
    }

    #[test]
    fn stale_state_blocks() {
        let dir = TempDir::new().unwrap();
        write_state(&dir, "aaaaaaaaaa", Loops::default());
        match evaluate(dir.path(), &FakeVcs::at("bbbbbbbbbb"), false) {
            ShipVerdict::Block { reason, message, .. } => {
                assert!(matches!(reason, BlockReason::Stale { .. }));
                assert!(message.contains("stale state, commit mismatch"));
                assert!(message.contains("aaaaaaa"));
            }
            other => panic!("expected stale block, got {other:?}"),
        }
    }

    #[test]
    fn blocked_state_reports_blockers_verbatim() {
        let dir = TempDir::new().unwrap();
        write_state(
            &dir,
            "abc",
            Loops {
                loop1_tier1: fail(),
                ..Default::default()
            },
        );
        match evaluate(dir.path(), &FakeVcs::at("abc"), false) {
            ShipVerdict::Block {
                reason,
                blockers,
                loop_status,
                remediation,
                ..
            } => {
                assert_eq!(reason, BlockReason::Blocked);
                assert_eq!(blockers, ["Loop1-T1 failed: Fast checks did not pass"]);
                assert_eq!(loop_status, ["loop1_tier1: fail"]);
                assert!(remediation.iter().any(|r| r == "loopgate ship --force"));
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn fresh_passing_state_allows() {
        let dir = TempDir::new().unwrap();
        write_state(
            &dir,
            "abc",
            Loops {
                loop1_tier1: pass(),
                loop1_tier2: pass(),
                ..Default::default()
            },
        );
        let v = evaluate(dir.path(), &FakeVcs::at("abc"), false);
        assert!(v.is_allowed());
        assert!(matches!(
            v,
            ShipVerdict::Allow { bypassed: false, head_commit: Some(ref h), .. } if h == "abc"
        ));
    }
}
