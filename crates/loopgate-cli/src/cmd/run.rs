use crate::output::{print_json, print_state};
use anyhow::Context;
use clap::Args;
use loopgate_core::{
    config::ConfigCache,
    controller::{LoopController, Scope},
    vcs::GitCli,
};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct RunArgs {
    /// Tier 1 and Tier 2 checks only
    #[arg(long, conflicts_with_all = ["claude", "skip_external", "all"])]
    free: bool,

    /// Free checks plus the reviewer loop
    #[arg(long, conflicts_with_all = ["skip_external", "all"])]
    claude: bool,

    /// Everything except the external review
    #[arg(long, conflicts_with = "all")]
    skip_external: bool,

    /// Every loop (default)
    #[arg(long)]
    all: bool,

    /// Reviewer output to ingest instead of preparing a prompt
    #[arg(long, value_name = "FILE")]
    review_output: Option<PathBuf>,
}

impl RunArgs {
    fn scope(&self) -> Scope {
        if self.all {
            return Scope::All;
        }
        Scope::from_flags(self.free, self.claude, self.skip_external)
    }
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let mut configs = ConfigCache::new(root);
    let config = configs
        .get()
        .context("failed to load .claude/loop-config.yaml")?
        .clone();
    let review_output = args
        .review_output
        .as_deref()
        .map(|p| {
            std::fs::read_to_string(p)
                .with_context(|| format!("failed to read reviewer output {}", p.display()))
        })
        .transpose()?;

    let vcs = GitCli::new(root);
    let controller = LoopController::new(root, config, &vcs);
    let scope = args.scope();
    let report = super::block_on(controller.run(scope, review_output.as_deref()))?;

    if json {
        return print_json(&report);
    }

    print_state(&report.state);
    for w in &report.warnings {
        eprintln!("warning: {w}");
    }
    if let Some(loop2) = &report.state.loops.loop2_claude {
        if loop2.status == loopgate_core::loop_state::LoopStatus::Ready {
            println!();
            println!("Reviewer prompt prepared. Print it with `loopgate prompt`, then");
            println!("feed the output back with `loopgate record-review <file>`.");
        }
    }
    Ok(())
}
