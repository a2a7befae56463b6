use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::Local;
use loopgate_core::{config::Config, paths, rate_limit::RateLimitTracker};
use serde_json::json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load .claude/loop-config.yaml")?;
    let tracker = RateLimitTracker::new(
        &paths::rate_limit_path(root),
        config.loop3.rate_limit_per_hour,
    );
    let now = Local::now();
    let state = tracker.snapshot_at(now);
    let used = state.usage(now);
    let remaining = tracker.remaining_quota_at(now);

    if json {
        return print_json(&json!({
            "limit_per_hour": tracker.limit_per_hour(),
            "used": used,
            "remaining": remaining,
            "total_executions": state.total_executions,
            "last_execution": state.last_execution,
        }));
    }

    println!(
        "External review quota: {remaining}/{} remaining this hour",
        tracker.limit_per_hour()
    );
    if !state.buckets.is_empty() {
        println!();
        let rows = state
            .buckets
            .iter()
            .map(|(bucket, count)| vec![bucket.clone(), count.to_string()])
            .collect();
        print_table(&["HOUR", "RUNS"], rows);
    }
    Ok(())
}
