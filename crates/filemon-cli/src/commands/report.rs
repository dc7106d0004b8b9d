//! `filemon report`: Summarise a recorded log.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use filemon_core::parse::{DependencySummary, LogHeader, parse_log};
use serde::Serialize;

use crate::output;

/// Arguments for the `report` command.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Path to the filemon log.
    pub log: PathBuf,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// List paths of failed operations too.
    #[arg(long)]
    pub include_failed: bool,
}

/// JSON form of a report.
#[derive(Debug, Serialize)]
struct Report<'a> {
    header: Option<&'a LogHeader>,
    records: usize,
    summary: &'a DependencySummary,
}

/// Executes the `report` command.
///
/// Parses the log and prints the files and processes it mentions.
///
/// # Errors
///
/// Returns an error if the log can not be read or parsed.
pub fn execute(args: ReportArgs) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&args.log)
        .with_context(|| format!("reading {}", args.log.display()))?;
    let log = parse_log(&content)?;
    let summary = log.summary(args.include_failed);
    tracing::info!(log = %args.log.display(), records = log.records.len(), "summarised log");

    if args.json {
        let report = Report {
            header: log.header.as_ref(),
            records: log.records.len(),
            summary: &summary,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!(
            "{}",
            output::render_summary(log.header.as_ref(), log.records.len(), &summary)
        );
    }
    Ok(())
}
