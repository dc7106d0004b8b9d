//! Formatted output helpers for CLI commands.

use std::fmt::Write;
use std::path::PathBuf;

use filemon_core::parse::{DependencySummary, LogHeader};

/// Renders a summary as indented plain-text sections.
///
/// Empty sections are left out.
#[must_use]
pub fn render_summary(
    header: Option<&LogHeader>,
    records: usize,
    summary: &DependencySummary,
) -> String {
    let mut out = String::new();
    match header.and_then(|h| h.target_pid) {
        Some(pid) => {
            let _ = writeln!(out, "Target pid {pid}, {records} record(s)");
        }
        None => {
            let _ = writeln!(out, "{records} record(s)");
        }
    }
    if let Some(start) = header.and_then(|h| h.start) {
        let _ = writeln!(out, "Started {}", start.to_rfc3339());
    }
    let pids: Vec<String> = summary.processes.iter().map(ToString::to_string).collect();
    section(&mut out, "Processes", &pids);
    section(&mut out, "Executed", &display_paths(&summary.executed));
    section(&mut out, "Read", &display_paths(&summary.read));
    section(&mut out, "Written", &display_paths(&summary.written));
    section(&mut out, "Removed", &display_paths(&summary.removed));
    section(&mut out, "Renamed", &display_pairs(&summary.renamed, "->"));
    section(&mut out, "Linked", &display_pairs(&summary.linked, "=>"));
    section(&mut out, "Directories", &display_paths(&summary.directories));
    if summary.failed > 0 {
        let _ = writeln!(out, "{} failed operation(s)", summary.failed);
    }
    out
}

fn section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title} ({}):", items.len());
    for item in items {
        let _ = writeln!(out, "  {item}");
    }
}

fn display_paths<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
    paths
        .into_iter()
        .map(|path| path.display().to_string())
        .collect()
}

fn display_pairs(pairs: &[(PathBuf, PathBuf)], arrow: &str) -> Vec<String> {
    pairs
        .iter()
        .map(|(from, to)| format!("{} {arrow} {}", from.display(), to.display()))
        .collect()
}
