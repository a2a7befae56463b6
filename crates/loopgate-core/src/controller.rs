//! Pipeline orchestration: runs the loops for a scope, gates each step on
//! the previous one and persists the resulting [`LoopState`].

use crate::checks::FreeChecks;
use crate::coderabbit;
use crate::config::Config;
use crate::error::{LoopgateError, Result};
use crate::io;
use crate::loop_state::{LoopResult, LoopState, LoopStatus, Loops, Severity, SkipReason, STATE_VERSION};
use crate::paths;
use crate::rate_limit::RateLimitTracker;
use crate::reviewer;
use crate::runner::{self, CheckStatus};
use crate::ship::{self, ShipDecision};
use crate::vcs::{self, Vcs};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Tier 1 and Tier 2 only.
    Free,
    /// Free checks plus the reviewer loop; the external loop is skipped.
    Reviewer,
    /// Same loops as `Reviewer`.
    SkipExternal,
    #[default]
    All,
}

impl Scope {
    /// Resolve mutually exclusive flags. Precedence: free, skip-external,
    /// reviewer, all.
    pub fn from_flags(free: bool, reviewer: bool, skip_external: bool) -> Self {
        if free {
            Scope::Free
        } else if skip_external {
            Scope::SkipExternal
        } else if reviewer {
            Scope::Reviewer
        } else {
            Scope::All
        }
    }

    fn runs_reviewer(self) -> bool {
        self != Scope::Free
    }

    fn runs_external(self) -> bool {
        self == Scope::All
    }
}

impl FromStr for Scope {
    type Err = LoopgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(Scope::Free),
            "claude" | "reviewer" => Ok(Scope::Reviewer),
            "skip-external" | "skip-cr" => Ok(Scope::SkipExternal),
            "all" => Ok(Scope::All),
            other => Err(LoopgateError::InvalidScope(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scope: Scope,
    pub state: LoopState,
    /// Non-fatal problems, e.g. a state file that could not be written.
    pub warnings: Vec<String>,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// LoopController
// ---------------------------------------------------------------------------

pub struct LoopController<'a> {
    root: PathBuf,
    config: Config,
    vcs: &'a dyn Vcs,
    rate_limiter: RateLimitTracker,
}

impl<'a> LoopController<'a> {
    pub fn new(root: &Path, config: Config, vcs: &'a dyn Vcs) -> Self {
        let rate_limiter = RateLimitTracker::new(
            &paths::rate_limit_path(root),
            config.loop3.rate_limit_per_hour,
        );
        Self {
            root: root.to_path_buf(),
            config,
            vcs,
            rate_limiter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimitTracker {
        &self.rate_limiter
    }

    /// Run every loop the scope includes, stopping at the first gate that
    /// fails, then persist the state. `review_output` is raw reviewer output
    /// to ingest in place of preparing a prompt.
    pub async fn run(&self, scope: Scope, review_output: Option<&str>) -> RunReport {
        let mut warnings = Vec::new();
        let loops = self.execute(scope, review_output, &mut warnings).await;
        let state = self.build_state(loops);
        if let Err(e) = self.write_state(&state) {
            tracing::warn!(error = %e, "failed to save loop state");
            warnings.push(format!("failed to save loop state: {e}"));
        }
        RunReport {
            scope,
            state,
            warnings,
        }
    }

    async fn execute(
        &self,
        scope: Scope,
        review_output: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> Loops {
        let mut loops = Loops::default();
        let checks = FreeChecks::new(&self.root, &self.config.checks);

        tracing::info!("loop1 tier1: running fast checks");
        let t1 = self.execute_tier1(&checks).await;
        let t1_passed = t1.status == LoopStatus::Pass;
        loops.loop1_tier1 = Some(t1);
        if !t1_passed {
            tracing::info!("loop1 tier1 failed, stopping");
            return loops;
        }

        tracing::info!("loop1 tier2: running comprehensive checks");
        let t2 = self.execute_tier2(&checks).await;
        let t2_passed = t2.status == LoopStatus::Pass;
        loops.loop1_tier2 = Some(t2);
        if !t2_passed {
            tracing::info!("loop1 tier2 failed, stopping");
            return loops;
        }

        if !scope.runs_reviewer() {
            return loops;
        }

        tracing::info!("loop2: preparing review");
        let l2 = self.execute_loop2(review_output, warnings);
        let halt = l2.count(Severity::Critical) > 0 && self.config.blocking.critical_blocks_ship;
        loops.loop2_claude = Some(l2);
        if halt {
            tracing::info!("loop2 found critical issues, blocking ship");
            return loops;
        }

        loops.loop3_coderabbit = Some(if scope.runs_external() {
            tracing::info!("loop3: checking external reviewer");
            self.execute_loop3(warnings).await
        } else {
            LoopResult::skip(SkipReason::FlagSkip, 0)
        });
        loops
    }

    async fn execute_tier1(&self, checks: &FreeChecks) -> LoopResult {
        let report = checks.run_tier1().await;
        let status = match report.status {
            CheckStatus::Pass => LoopStatus::Pass,
            CheckStatus::Fail => LoopStatus::Fail,
        };
        let mut result = LoopResult::new(status, report.elapsed_ms);
        result.details = serde_json::to_value(&report).ok();
        result
    }

    async fn execute_tier2(&self, checks: &FreeChecks) -> LoopResult {
        let report = checks.run_tier2(self.vcs).await;
        let status = match report.status {
            CheckStatus::Pass => LoopStatus::Pass,
            CheckStatus::Fail => LoopStatus::Fail,
        };
        let mut result = LoopResult::new(status, report.elapsed_ms);
        result.details = serde_json::to_value(&report).ok();
        result
    }

    fn execute_loop2(&self, review_output: Option<&str>, warnings: &mut Vec<String>) -> LoopResult {
        let started = Instant::now();
        if !self.config.loop2.enabled {
            return LoopResult::skip(SkipReason::DisabledInConfig, elapsed_ms(started));
        }

        if let Some(raw) = review_output {
            let findings = reviewer::parse_output(raw).findings;
            if let Err(e) = reviewer::save_results(&self.root, &findings) {
                tracing::warn!(error = %e, "failed to save review results");
                warnings.push(format!("failed to save review results: {e}"));
            }
            return LoopResult::from_findings(findings, elapsed_ms(started))
                .with_details(json!({ "model": self.config.loop2.model }));
        }

        let context = reviewer::load_review_context(&self.root, self.vcs);
        let prompt = reviewer::build_review_prompt(&context);
        LoopResult::new(LoopStatus::Ready, elapsed_ms(started)).with_details(json!({
            "prompt": prompt,
            "model": self.config.loop2.model,
            "message": "Ready for reviewer execution. Run the prompt, then pass the output to `loopgate record-review`.",
            "context": {
                "files": context.files,
                "specs": context.specs,
                "tech_stack": context.tech_stack,
                "diff_lines": context.diff.lines().count(),
            },
        }))
    }

    async fn execute_loop3(&self, warnings: &mut Vec<String>) -> LoopResult {
        let started = Instant::now();
        let cfg = &self.config.loop3;

        if !cfg.enabled {
            return LoopResult::skip(SkipReason::DisabledInConfig, elapsed_ms(started));
        }

        let remaining = self.rate_limiter.remaining_quota();
        if remaining == 0 {
            tracing::info!("loop3: rate limit exceeded");
            return LoopResult::skip(SkipReason::RateLimitExceeded, elapsed_ms(started))
                .with_remaining_quota(0);
        }

        let installed = cfg.program().is_some_and(|p| which::which(p).is_ok());
        if !installed {
            tracing::info!(command = %cfg.command, "loop3: external reviewer not installed");
            return LoopResult::skip(SkipReason::ExternalToolMissing, elapsed_ms(started));
        }

        let diff = self.vcs.staged_diff().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read staged diff");
            String::new()
        });
        if diff.trim().is_empty() {
            return LoopResult::skip(SkipReason::NoStagedChanges, elapsed_ms(started));
        }

        tracing::info!(remaining = remaining - 1, "loop3: running external reviewer");
        let output = runner::run_command(
            &cfg.command,
            &self.root,
            Some(&diff),
            Duration::from_secs(cfg.timeout_secs),
        )
        .await;

        if let Err(e) = self.rate_limiter.record_execution() {
            tracing::warn!(error = %e, "failed to record rate limit execution");
            warnings.push(format!("failed to record rate limit execution: {e}"));
        }

        let findings = coderabbit::parse_findings(&output.stdout);
        let remaining = self.rate_limiter.remaining_quota();
        let mut result = LoopResult::from_findings(findings, elapsed_ms(started))
            .with_remaining_quota(remaining);
        if !output.passed() {
            result.status = LoopStatus::Fail;
            result.details = Some(json!({ "error": output.outcome().error }));
        }
        result
    }

    // -----------------------------------------------------------------------
    // State persistence
    // -----------------------------------------------------------------------

    pub fn decision(&self, loops: &Loops) -> ShipDecision {
        ship::ship_decision(loops, &self.config.blocking)
    }

    /// Stamp `loops` with the current branch and HEAD and derive the ship
    /// decision from them.
    pub fn build_state(&self, loops: Loops) -> LoopState {
        let decision = self.decision(&loops);
        LoopState {
            version: STATE_VERSION.to_string(),
            branch: self.vcs.branch().unwrap_or_else(|| "unknown".to_string()),
            head_commit: self
                .vcs
                .head_commit()
                .unwrap_or_else(|| vcs::UNKNOWN_COMMIT.to_string()),
            timestamp: Utc::now(),
            loops,
            ship_allowed: decision.ship_allowed,
            blockers: decision.blockers,
        }
    }

    fn write_state(&self, state: &LoopState) -> Result<()> {
        let path = paths::loop_state_path(&self.root);
        io::write_json(&path, state)?;
        tracing::info!(path = %path.display(), ship_allowed = state.ship_allowed, "saved loop state");
        Ok(())
    }

    pub fn save_state(&self, loops: Loops) -> Result<LoopState> {
        let state = self.build_state(loops);
        self.write_state(&state)?;
        Ok(state)
    }

    /// The persisted state if it is well formed and matches HEAD. Stale state
    /// is deleted.
    pub fn load_state(&self) -> Option<LoopState> {
        let path = paths::loop_state_path(&self.root);
        let data = match io::read_optional(&path) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read loop state");
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "loop state is not valid JSON, ignoring");
                return None;
            }
        };
        let shape_ok = value
            .get("version")
            .and_then(|v| v.as_str())
            .is_some_and(|v| !v.is_empty())
            && value.get("loops").is_some_and(|l| l.is_object())
            && value.get("ship_allowed").is_some_and(|s| s.is_boolean());
        if !shape_ok {
            tracing::warn!("loop state has an invalid schema, ignoring");
            return None;
        }
        let state: LoopState = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "loop state has an invalid schema, ignoring");
                return None;
            }
        };

        if vcs::is_stale(&state.head_commit, self.vcs.head_commit().as_deref()) {
            tracing::info!(saved = %state.head_commit, "HEAD changed, invalidating loop state");
            if let Err(e) = self.invalidate_state() {
                tracing::warn!(error = %e, "failed to invalidate loop state");
            }
            return None;
        }
        Some(state)
    }

    /// Delete the persisted state. Returns whether a file was removed.
    pub fn invalidate_state(&self) -> Result<bool> {
        let removed = io::remove_if_exists(&paths::loop_state_path(&self.root))?;
        if removed {
            tracing::info!("invalidated loop state");
        }
        Ok(removed)
    }

    /// Ingest reviewer output for a state whose reviewer loop is `ready` and
    /// re-derive the ship decision.
    pub fn record_review(&self, raw: &str) -> Result<LoopState> {
        let mut state = self.load_state().ok_or(LoopgateError::NoReviewState)?;
        match &state.loops.loop2_claude {
            Some(r) if r.status == LoopStatus::Ready => {}
            Some(r) => return Err(LoopgateError::ReviewNotPending(r.label())),
            None => return Err(LoopgateError::ReviewNotPending("not run".to_string())),
        }
        let findings = reviewer::parse_output(raw).findings;
        reviewer::save_results(&self.root, &findings)?;

        let elapsed = state
            .loops
            .loop2_claude
            .as_ref()
            .map(|r| r.elapsed_ms)
            .unwrap_or(0);
        tracing::info!(findings = findings.len(), "recording reviewer output");
        state.loops.loop2_claude = Some(
            LoopResult::from_findings(findings, elapsed)
                .with_details(json!({ "model": self.config.loop2.model })),
        );
        self.save_state(state.loops)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::testing::FakeVcs;
    use tempfile::TempDir;

    fn passing_config() -> Config {
        let mut cfg = Config::default();
        cfg.checks.lint = Some("true".to_string());
        cfg.checks.typecheck = Some("true".to_string());
        cfg.checks.build = Some("true".to_string());
        cfg.checks.test = Some("true".to_string());
        cfg
    }

    fn staged_vcs(diff: &str) -> FakeVcs {
        FakeVcs {
            diff: diff.to_string(),
            ..FakeVcs::at("abc123")
        }
    }

    #[test]
    fn scope_precedence() {
        assert_eq!(Scope::from_flags(true, true, true), Scope::Free);
        assert_eq!(Scope::from_flags(false, true, true), Scope::SkipExternal);
        assert_eq!(Scope::from_flags(false, true, false), Scope::Reviewer);
        assert_eq!(Scope::from_flags(false, false, false), Scope::All);
        assert_eq!("claude".parse::<Scope>().unwrap(), Scope::Reviewer);
        assert!("everything".parse::<Scope>().is_err());
    }

    #[tokio::test]
    async fn lint_failure_stops_after_tier1() {
        let dir = TempDir::new().unwrap();
        let mut cfg = passing_config();
        cfg.checks.lint = Some("echo 'error no-unused-vars' >&2; exit 1".to_string());
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), cfg, &vcs);

        let report = ctl.run(Scope::All, None).await;
        let state = &report.state;
        assert_eq!(state.loops.loop1_tier1.as_ref().unwrap().status, LoopStatus::Fail);
        assert!(state.loops.loop1_tier2.is_none());
        assert!(state.loops.loop2_claude.is_none());
        assert!(!state.ship_allowed);
        assert_eq!(state.blockers, ["Loop1-T1 failed: Fast checks did not pass"]);
        assert!(report.warnings.is_empty());

        let saved = ctl.load_state().unwrap();
        assert_eq!(saved.blockers, state.blockers);
        assert_eq!(saved.head_commit, "abc123");
    }

    #[tokio::test]
    async fn free_scope_ends_after_tier2() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let state = ctl.run(Scope::Free, None).await.state;
        assert!(state.loops.loop1_tier2.is_some());
        assert!(state.loops.loop2_claude.is_none());
        assert!(state.loops.loop3_coderabbit.is_none());
        assert!(state.ship_allowed);
    }

    #[tokio::test]
    async fn reviewer_scope_prepares_prompt_and_skips_external() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+const x = 1;");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let state = ctl.run(Scope::Reviewer, None).await.state;

        let l2 = state.loops.loop2_claude.as_ref().unwrap();
        assert_eq!(l2.status, LoopStatus::Ready);
        let details = l2.details.as_ref().unwrap();
        assert!(details["prompt"].as_str().unwrap().contains("+const x = 1;"));
        assert_eq!(details["model"], "opus");

        let l3 = state.loops.loop3_coderabbit.as_ref().unwrap();
        assert_eq!(l3.reason, Some(SkipReason::FlagSkip));
        assert!(state.ship_allowed);
    }

    #[tokio::test]
    async fn disabled_reviewer_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut cfg = passing_config();
        cfg.loop2.enabled = false;
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), cfg, &vcs);
        let state = ctl.run(Scope::SkipExternal, None).await.state;
        assert_eq!(
            state.loops.loop2_claude.unwrap().reason,
            Some(SkipReason::DisabledInConfig)
        );
    }

    #[tokio::test]
    async fn critical_review_output_halts_before_loop3() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let raw = r#"{"findings":[{"severity":"critical","category":"security","message":"token logged"}]}"#;
        let state = ctl.run(Scope::All, Some(raw)).await.state;

        assert_eq!(state.loops.loop2_claude.as_ref().unwrap().status, LoopStatus::Fail);
        assert!(state.loops.loop3_coderabbit.is_none());
        assert_eq!(state.blockers, ["Loop2 found 1 critical issue(s)"]);
        assert!(reviewer::load_results(dir.path()).unwrap().is_some());
    }

    #[tokio::test]
    async fn exhausted_quota_skips_loop3_and_ship_is_allowed() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let mut cfg = passing_config();
        cfg.loop3.rate_limit_per_hour = 2;
        let ctl = LoopController::new(dir.path(), cfg, &vcs);
        ctl.rate_limiter().record_execution().unwrap();
        ctl.rate_limiter().record_execution().unwrap();

        let state = ctl.run(Scope::All, None).await.state;
        let l3 = state.loops.loop3_coderabbit.as_ref().unwrap();
        assert_eq!(l3.status, LoopStatus::Skip);
        assert_eq!(l3.reason, Some(SkipReason::RateLimitExceeded));
        assert_eq!(l3.remaining_quota, Some(0));
        assert!(state.ship_allowed);
    }

    #[tokio::test]
    async fn missing_external_tool_is_skipped() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let mut cfg = passing_config();
        cfg.loop3.command = "loopgate-no-such-reviewer review --stdin".to_string();
        let ctl = LoopController::new(dir.path(), cfg, &vcs);
        let state = ctl.run(Scope::All, None).await.state;
        assert_eq!(
            state.loops.loop3_coderabbit.unwrap().reason,
            Some(SkipReason::ExternalToolMissing)
        );
        assert_eq!(ctl.rate_limiter().remaining_quota(), 8);
    }

    #[tokio::test]
    async fn empty_diff_skips_loop3_without_spending_quota() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("  \n");
        let mut cfg = passing_config();
        cfg.loop3.command = "cat".to_string();
        let ctl = LoopController::new(dir.path(), cfg, &vcs);
        let state = ctl.run(Scope::All, None).await.state;
        assert_eq!(
            state.loops.loop3_coderabbit.unwrap().reason,
            Some(SkipReason::NoStagedChanges)
        );
        assert_eq!(ctl.rate_limiter().remaining_quota(), 8);
    }

    #[tokio::test]
    async fn external_critical_findings_block_and_spend_quota() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+password = 'hunter2'");
        let mut cfg = passing_config();
        cfg.loop3.command = "cat >/dev/null; echo 'ERROR: hardcoded password'".to_string();
        let ctl = LoopController::new(dir.path(), cfg, &vcs);
        let state = ctl.run(Scope::All, None).await.state;

        let l3 = state.loops.loop3_coderabbit.as_ref().unwrap();
        assert_eq!(l3.status, LoopStatus::Fail);
        assert_eq!(l3.count(Severity::Critical), 1);
        assert_eq!(l3.remaining_quota, Some(7));
        assert_eq!(state.blockers, ["Loop3 (CodeRabbit) found 1 critical issue(s)"]);
        assert_eq!(ctl.rate_limiter().remaining_quota(), 7);
    }

    #[tokio::test]
    async fn failing_external_tool_without_critical_does_not_block() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let mut cfg = passing_config();
        cfg.loop3.command = "cat >/dev/null; echo 'WARNING: smell'; exit 2".to_string();
        let ctl = LoopController::new(dir.path(), cfg, &vcs);
        let state = ctl.run(Scope::All, None).await.state;
        let l3 = state.loops.loop3_coderabbit.as_ref().unwrap();
        assert_eq!(l3.status, LoopStatus::Fail);
        assert_eq!(l3.count(Severity::Major), 1);
        assert!(state.ship_allowed);
    }

    #[tokio::test]
    async fn stale_state_is_discarded_and_deleted() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        ctl.run(Scope::Free, None).await;
        assert!(ctl.load_state().is_some());

        vcs.set_head("def456");
        assert!(ctl.load_state().is_none());
        assert!(!paths::loop_state_path(dir.path()).exists());
    }

    #[test]
    fn invalid_schema_is_ignored() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let path = paths::loop_state_path(dir.path());
        io::atomic_write(&path, br#"{"version":"1.0","loops":{},"ship_allowed":"yes"}"#).unwrap();
        assert!(ctl.load_state().is_none());
        io::atomic_write(&path, b"garbage").unwrap();
        assert!(ctl.load_state().is_none());
    }

    #[test]
    fn saved_decision_is_recomputed_from_loops() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let loops = Loops {
            loop1_tier2: Some(LoopResult::new(LoopStatus::Fail, 5)),
            ..Default::default()
        };
        let state = ctl.save_state(loops).unwrap();
        assert!(!state.ship_allowed);
        assert_eq!(ctl.load_state().unwrap().blockers.len(), 1);
    }

    #[tokio::test]
    async fn record_review_updates_ready_state() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let state = ctl.run(Scope::Reviewer, None).await.state;
        assert!(state.ship_allowed);

        let raw = "```json\n{\"findings\":[{\"severity\":\"critical\",\"message\":\"data loss\"}]}\n```";
        let state = ctl.record_review(raw).unwrap();
        assert_eq!(state.loops.loop2_claude.as_ref().unwrap().status, LoopStatus::Fail);
        assert!(!state.ship_allowed);
        assert!(!ctl.load_state().unwrap().ship_allowed);
    }

    #[test]
    fn record_review_without_state_errors() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        assert!(matches!(
            ctl.record_review("{\"findings\":[]}"),
            Err(LoopgateError::NoReviewState)
        ));
    }

    #[tokio::test]
    async fn record_review_rejects_state_without_pending_review() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        let state = ctl.run(Scope::Free, None).await.state;
        assert!(state.loops.loop2_claude.is_none());

        let raw = "{\"findings\":[{\"severity\":\"critical\",\"message\":\"data loss\"}]}";
        assert!(matches!(
            ctl.record_review(raw),
            Err(LoopgateError::ReviewNotPending(_))
        ));
        let kept = ctl.load_state().unwrap();
        assert!(kept.loops.loop2_claude.is_none());
        assert!(kept.ship_allowed);
    }

    #[tokio::test]
    async fn record_review_is_accepted_once() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("+x");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        ctl.run(Scope::Reviewer, None).await;
        ctl.record_review("{\"findings\":[]}").unwrap();
        assert!(matches!(
            ctl.record_review("{\"findings\":[]}"),
            Err(LoopgateError::ReviewNotPending(_))
        ));
    }

    #[test]
    fn invalidate_reports_removal() {
        let dir = TempDir::new().unwrap();
        let vcs = staged_vcs("");
        let ctl = LoopController::new(dir.path(), passing_config(), &vcs);
        assert!(!ctl.invalidate_state().unwrap());
        ctl.save_state(Loops::default()).unwrap();
        assert!(ctl.invalidate_state().unwrap());
    }
}
