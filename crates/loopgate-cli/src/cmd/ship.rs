use crate::output::print_json;
use loopgate_core::{ship::{self, ShipVerdict}, vcs::GitCli};
use std::path::Path;

pub fn run(root: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    let vcs = GitCli::new(root);
    let verdict = ship::evaluate(root, &vcs, force);

    if json {
        print_json(&verdict)?;
    } else {
        print_verdict(&verdict);
    }

    match verdict {
        ShipVerdict::Allow { .. } => Ok(()),
        ShipVerdict::Block { message, .. } => anyhow::bail!("ship blocked: {message}"),
    }
}

fn print_verdict(verdict: &ShipVerdict) {
    match verdict {
        ShipVerdict::Allow { bypassed: true, .. } => {
            println!("Ship allowed (gate bypassed with --force)");
        }
        ShipVerdict::Allow {
            head_commit,
            timestamp,
            ..
        } => {
            print!("Ship allowed");
            if let Some(commit) = head_commit {
                print!(" for {}", commit.get(..7).unwrap_or(commit));
            }
            if let Some(ts) = timestamp {
                print!(" (reviewed {})", ts.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!();
        }
        ShipVerdict::Block {
            message,
            blockers,
            loop_status,
            remediation,
            ..
        } => {
            println!("Ship blocked: {message}");
            if !blockers.is_empty() {
                println!();
                println!("Blockers:");
                for b in blockers {
                    println!("  - {b}");
                }
            }
            if !loop_status.is_empty() {
                println!();
                println!("Loops:");
                for line in loop_status {
                    println!("  {line}");
                }
            }
            if !remediation.is_empty() {
                println!();
                println!("To fix:");
                for cmd in remediation {
                    println!("  {cmd}");
                }
            }
        }
    }
}
