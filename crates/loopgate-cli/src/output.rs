use loopgate_core::loop_state::{Loops, LoopState};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

pub fn print_loops(loops: &Loops) {
    let rows = loops
        .iter()
        .map(|(name, r)| {
            vec![
                name.to_string(),
                r.status.to_string(),
                format!("{}ms", r.elapsed_ms),
                r.reason.map(|s| s.to_string()).unwrap_or_default(),
                r.findings
                    .as_ref()
                    .map(|f| f.len().to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["LOOP", "STATUS", "ELAPSED", "REASON", "FINDINGS"], rows);
}

/// Human summary of a loop state: per-loop table, decision and blockers.
pub fn print_state(state: &LoopState) {
    println!(
        "Branch: {}  Commit: {}",
        state.branch,
        state.head_commit.get(..7).unwrap_or(&state.head_commit)
    );
    println!();
    print_loops(&state.loops);
    println!();
    if state.ship_allowed {
        println!("Ship: allowed");
    } else {
        println!("Ship: blocked");
        for b in &state.blockers {
            println!("  - {b}");
        }
    }
}
