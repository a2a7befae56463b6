//! Loop 1: the free local checks.
//!
//! Tier 1 runs lint, typecheck and (when available) the format check
//! concurrently. Tier 2 runs the secret scan, build and tests one after the
//! other under a shared time budget and stops at the first failure.

use crate::config::{ChecksConfig, ResolvedChecks};
use crate::runner::{self, CheckStatus, CommandResult};
use crate::secrets::{self, SecretMatch};
use crate::vcs::Vcs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoppedAt {
    Secrets,
    Build,
    Test,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier1Report {
    pub status: CheckStatus,
    pub elapsed_ms: u64,
    pub details: BTreeMap<String, CommandResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretStage {
    pub status: CheckStatus,
    pub matches: Vec<SecretMatch>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier2Report {
    pub status: CheckStatus,
    pub elapsed_ms: u64,
    pub stopped_at: Option<StoppedAt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Tier2Report {
    fn new() -> Self {
        Self {
            status: CheckStatus::Fail,
            elapsed_ms: 0,
            stopped_at: None,
            secrets: None,
            build: None,
            test: None,
            error: None,
        }
    }

    fn stop(mut self, at: StoppedAt, started: Instant) -> Self {
        self.status = CheckStatus::Fail;
        self.stopped_at = Some(at);
        self.elapsed_ms = elapsed_ms(started);
        self
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct FreeChecks {
    root: PathBuf,
    commands: ResolvedChecks,
    tier1_timeout: Duration,
    tier2_budget: Duration,
    stage_cap: Duration,
}

impl FreeChecks {
    pub fn new(root: &Path, config: &ChecksConfig) -> Self {
        Self::with_commands(root, config.resolve(root), config)
    }

    pub fn with_commands(root: &Path, commands: ResolvedChecks, config: &ChecksConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            commands,
            tier1_timeout: Duration::from_secs(config.tier1_timeout_secs),
            tier2_budget: Duration::from_secs(config.tier2_timeout_secs),
            stage_cap: Duration::from_secs(config.stage_cap_secs),
        }
    }

    #[cfg(test)]
    fn with_timings(mut self, tier1: Duration, budget: Duration, cap: Duration) -> Self {
        self.tier1_timeout = tier1;
        self.tier2_budget = budget;
        self.stage_cap = cap;
        self
    }

    pub async fn run_tier1(&self) -> Tier1Report {
        let started = Instant::now();
        let mut checks = vec![
            ("lint", self.commands.lint.as_str()),
            ("typecheck", self.commands.typecheck.as_str()),
        ];
        if let Some(format) = &self.commands.format {
            checks.push(("format", format.as_str()));
        }
        tracing::info!(checks = checks.len(), "running tier 1 checks");

        let runs = checks.iter().map(|(name, cmd)| async move {
            let result = runner::run_with_timeout(cmd, &self.root, self.tier1_timeout).await;
            (name.to_string(), result)
        });
        let details: BTreeMap<String, CommandResult> =
            futures::future::join_all(runs).await.into_iter().collect();

        let status = if details.values().all(CommandResult::passed) {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        Tier1Report {
            status,
            elapsed_ms: elapsed_ms(started),
            details,
        }
    }

    pub async fn run_tier2(&self, vcs: &dyn Vcs) -> Tier2Report {
        let started = Instant::now();
        let mut report = Tier2Report::new();
        tracing::info!("running tier 2 checks");

        // Sampled once; later stages do not see files staged mid-run.
        let staged = vcs.staged_files().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not list staged files, scanning nothing");
            Vec::new()
        });

        let scan_started = Instant::now();
        let root = self.root.clone();
        let scan = match tokio::spawn(async move { secrets::scan_files(&root, &staged).await }).await
        {
            Ok(scan) => scan,
            Err(e) => {
                report.error = Some(format!("secret scan failed: {e}"));
                return report.stop(StoppedAt::Error, started);
            }
        };
        let secrets_failed = scan.status == CheckStatus::Fail;
        report.secrets = Some(SecretStage {
            status: scan.status,
            matches: scan.matches,
            elapsed_ms: elapsed_ms(scan_started),
        });
        if secrets_failed {
            return report.stop(StoppedAt::Secrets, started);
        }

        let Some(timeout) = self.stage_timeout(started) else {
            return report.stop(StoppedAt::Timeout, started);
        };
        let build = runner::run_with_timeout(&self.commands.build, &self.root, timeout).await;
        let build_failed = !build.passed();
        report.build = Some(build);
        if build_failed {
            return report.stop(StoppedAt::Build, started);
        }

        let Some(timeout) = self.stage_timeout(started) else {
            return report.stop(StoppedAt::Timeout, started);
        };
        let test = runner::run_with_timeout(&self.commands.test, &self.root, timeout).await;
        let test_failed = !test.passed();
        report.test = Some(test);
        if test_failed {
            return report.stop(StoppedAt::Test, started);
        }

        report.status = CheckStatus::Pass;
        report.elapsed_ms = elapsed_ms(started);
        report
    }

    /// `min(stage_cap, remaining budget)`, or `None` once the budget is spent.
    fn stage_timeout(&self, started: Instant) -> Option<Duration> {
        let remaining = self.tier2_budget.checked_sub(started.elapsed())?;
        if remaining.is_zero() {
            return None;
        }
        Some(remaining.min(self.stage_cap))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
