//! CLI command definitions and dispatch.

pub mod replay;
pub mod report;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use filemon_common::config::FilemonConfig;

/// filemon: record and inspect file-access logs.
#[derive(Parser, Debug)]
#[command(name = "filemon", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true, env = filemon_common::constants::CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Format of diagnostic output on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Diagnostic output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarise the files and processes recorded in a log.
    Report(report::ReportArgs),
    /// Run a plan of file operations under a monitor and write the log.
    Replay(replay::ReplayArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration can not be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => FilemonConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => FilemonConfig::default(),
    };
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Command::Report(args) => report::execute(args),
        Command::Replay(args) => replay::execute(args, config),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "filemon",
            "report",
            "build.log",
            "--json",
            "--log-format",
            "json",
        ])
        .expect("parse");
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Report(args) => {
                assert!(args.json);
                assert!(!args.include_failed);
                assert_eq!(args.log, PathBuf::from("build.log"));
            }
            Command::Replay(_) => panic!("expected report"),
        }
    }

    #[test]
    fn replay_requires_output() {
        assert!(Cli::try_parse_from(["filemon", "replay", "plan.json"]).is_err());
    }
}
