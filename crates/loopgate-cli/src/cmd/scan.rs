use crate::output::{print_json, print_table};
use anyhow::Context;
use loopgate_core::{secrets, vcs::{GitCli, Vcs}};
use std::path::Path;

pub fn run(root: &Path, files: Vec<String>, json: bool) -> anyhow::Result<()> {
    let files = if files.is_empty() {
        GitCli::new(root)
            .staged_files()
            .context("failed to list staged files (pass paths explicitly outside a git repo)")?
    } else {
        files
    };

    let report = super::block_on(secrets::scan_files(root, &files))?;

    if json {
        print_json(&report)?;
    } else if report.matches.is_empty() {
        println!("No secrets found in {} file(s).", files.len());
    } else {
        let rows = report
            .matches
            .iter()
            .map(|m| {
                vec![
                    format!("{}:{}", m.file, m.line),
                    m.severity.label().to_string(),
                    m.pattern.clone(),
                    m.preview.clone(),
                ]
            })
            .collect();
        print_table(&["LOCATION", "SEVERITY", "PATTERN", "PREVIEW"], rows);
    }

    if !report.matches.is_empty() {
        anyhow::bail!("{} potential secret(s) found", report.matches.len());
    }
    Ok(())
}
