use crate::output::{print_json, print_state};
use anyhow::Context;
use loopgate_core::{config::Config, controller::LoopController, vcs::GitCli};
use serde_json::Value;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load .claude/loop-config.yaml")?;
    let vcs = GitCli::new(root);
    let controller = LoopController::new(root, config, &vcs);

    match controller.load_state() {
        Some(state) if json => print_json(&state),
        Some(state) => {
            print_state(&state);
            Ok(())
        }
        None if json => print_json(&Value::Null),
        None => {
            println!("No current review state. Run `loopgate run`.");
            Ok(())
        }
    }
}
