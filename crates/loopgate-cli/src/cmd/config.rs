use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use loopgate_core::config::{Config, PackageManager, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective config and the resolved check commands
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let resolved = config.checks.resolve(root);
    let pm = PackageManager::detect(root);

    if json {
        let value = serde_json::json!({
            "config": config,
            "package_manager": pm,
            "resolved_checks": resolved,
        });
        return print_json(&value);
    }

    let yaml = serde_yaml::to_string(&config).context("failed to render config")?;
    print!("{yaml}");
    println!();
    println!("# package manager: {pm}");
    println!("# lint:      {}", resolved.lint);
    println!("# typecheck: {}", resolved.typecheck);
    if let Some(format) = &resolved.format {
        println!("# format:    {format}");
    }
    println!("# build:     {}", resolved.build);
    println!("# test:      {}", resolved.test);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
