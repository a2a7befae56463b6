use crate::output::{print_json, print_state};
use anyhow::Context;
use loopgate_core::{config::Config, controller::LoopController, reviewer, vcs::GitCli};
use serde_json::json;
use std::io::Read;
use std::path::Path;

pub fn record(root: &Path, input: &str, json: bool) -> anyhow::Result<()> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read reviewer output from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read reviewer output {input}"))?
    };

    let config = Config::load(root).context("failed to load .claude/loop-config.yaml")?;
    let vcs = GitCli::new(root);
    let controller = LoopController::new(root, config, &vcs);
    let state = controller
        .record_review(&raw)
        .context("failed to record review")?;

    if json {
        return print_json(&state);
    }
    print_state(&state);
    Ok(())
}

pub fn prompt(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load .claude/loop-config.yaml")?;
    let vcs = GitCli::new(root);
    let ctx = reviewer::load_review_context(root, &vcs);
    let prompt = reviewer::build_review_prompt(&ctx);

    if json {
        return print_json(&json!({
            "model": config.loop2.model,
            "files": ctx.files,
            "specs": ctx.specs,
            "tech_stack": ctx.tech_stack,
            "prompt": prompt,
        }));
    }
    println!("{prompt}");
    Ok(())
}
