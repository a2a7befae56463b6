use crate::output::{print_json, print_table};
use anyhow::{anyhow, Context};
use clap::Subcommand;
use loopgate_core::{
    checkpoint::{CheckpointManager, PhaseStatus, PhaseUpdate},
    tokens,
    vcs::GitCli,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum CheckpointSubcommand {
    /// Show a checkpoint
    Show {
        command: String,
        #[arg(long)]
        feature: Option<String>,
    },

    /// Update one phase, creating the checkpoint if needed
    Update {
        command: String,
        #[arg(long)]
        feature: Option<String>,
        /// Phase name
        #[arg(long)]
        phase: String,
        /// pending, in_progress, complete or failed
        #[arg(long)]
        status: Option<String>,
        /// Context summary for the phase (at most 500 tokens)
        #[arg(long)]
        summary: Option<String>,
    },

    /// Mark a checkpoint complete
    Complete {
        command: String,
        #[arg(long)]
        feature: Option<String>,
    },

    /// Show where to resume
    Resume {
        command: String,
        #[arg(long)]
        feature: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: CheckpointSubcommand, json: bool) -> anyhow::Result<()> {
    let vcs = GitCli::new(root);
    let manager = CheckpointManager::new(root, &vcs);

    match subcmd {
        CheckpointSubcommand::Show { command, feature } => {
            show(&manager, &command, feature.as_deref(), json)
        }
        CheckpointSubcommand::Update {
            command,
            feature,
            phase,
            status,
            summary,
        } => update(
            &manager,
            &command,
            feature.as_deref(),
            &phase,
            status.as_deref(),
            summary,
            json,
        ),
        CheckpointSubcommand::Complete { command, feature } => {
            if !manager.complete(&command, feature.as_deref()) {
                anyhow::bail!("failed to complete checkpoint '{command}'");
            }
            if json {
                print_json(&serde_json::json!({ "command": command, "completed": true }))
            } else {
                println!("Checkpoint '{command}' complete.");
                Ok(())
            }
        }
        CheckpointSubcommand::Resume { command, feature } => {
            let point = manager.resume_point(&command, feature.as_deref());
            if json {
                return print_json(&point);
            }
            match &point.phase {
                Some(phase) => println!("Resume at phase: {phase}"),
                None => println!("Nothing to resume for '{command}'."),
            }
            if let Some(summary) = &point.summary {
                println!();
                println!("{summary}");
            }
            Ok(())
        }
    }
}

fn show(
    manager: &CheckpointManager<'_>,
    command: &str,
    feature: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let checkpoint = manager.require(command, feature)?;

    if json {
        return print_json(&checkpoint);
    }

    println!("Command: {}", checkpoint.command);
    if let Some(f) = &checkpoint.feature {
        println!("Feature: {f}");
    }
    if let Some(current) = &checkpoint.state.current_phase {
        println!("Current: {current}");
    }
    if checkpoint.completed_at.is_some() {
        println!("Completed");
    }
    println!();

    let rows = checkpoint
        .phases
        .iter()
        .map(|(name, phase)| {
            vec![
                name.clone(),
                phase.status.map(|s| s.to_string()).unwrap_or_default(),
                phase
                    .context_summary
                    .as_deref()
                    .map(|s| tokens::count_tokens(s).to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["PHASE", "STATUS", "SUMMARY TOKENS"], rows);
    Ok(())
}

fn update(
    manager: &CheckpointManager<'_>,
    command: &str,
    feature: Option<&str>,
    phase: &str,
    status: Option<&str>,
    summary: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let status = status
        .map(|s| s.parse::<PhaseStatus>().map_err(|e| anyhow!(e)))
        .transpose()
        .context("invalid --status")?;

    if let Some(s) = &summary {
        if let Some(err) = tokens::validate_context_summary(s).error() {
            anyhow::bail!("{err}");
        }
    }

    let update = PhaseUpdate {
        status,
        context_summary: summary,
        ..PhaseUpdate::default()
    };
    if !manager.update_phase(command, phase, update, feature) {
        anyhow::bail!("failed to save checkpoint '{command}'");
    }

    if json {
        let checkpoint = manager.load(command, feature);
        return print_json(&checkpoint);
    }
    println!("Updated phase '{phase}' of '{command}'.");
    Ok(())
}
