//! `filemon replay`: Run a plan of file operations under a monitor.
//!
//! The plan is a JSON array of steps. The CLI binds a monitor to its own
//! pid, performs every step through the monitored filesystem, and leaves
//! the resulting log at `--output`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use filemon_common::config::FilemonConfig;
use filemon_common::types::Pid;
use filemon_core::dispatch::Dispatcher;
use filemon_core::fs::MonitoredFs;
use filemon_core::lifecycle::Filemon;
use filemon_core::process::host_resolver;
use filemon_core::sink::create_file;
use serde::Deserialize;

/// Arguments for the `replay` command.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Path to the JSON plan.
    pub plan: PathBuf,

    /// Where to write the filemon log.
    #[arg(short, long)]
    pub output: PathBuf,
}

/// One step of a replay plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Read a whole file.
    Read {
        /// File to read.
        path: PathBuf,
    },
    /// Create or truncate a file and write `contents` to it.
    Write {
        /// File to write.
        path: PathBuf,
        /// New contents.
        #[serde(default)]
        contents: String,
    },
    /// Rename a file.
    Rename {
        /// Existing name.
        from: PathBuf,
        /// New name.
        to: PathBuf,
    },
    /// Create a hard link.
    Link {
        /// Existing file.
        source: PathBuf,
        /// New link.
        target: PathBuf,
    },
    /// Create a symbolic link.
    Symlink {
        /// Link contents.
        source: PathBuf,
        /// New link.
        target: PathBuf,
    },
    /// Remove a file.
    Unlink {
        /// File to remove.
        path: PathBuf,
    },
    /// Change the working directory.
    Chdir {
        /// New working directory.
        path: PathBuf,
    },
    /// Run a program and wait for it.
    Run {
        /// Program to execute.
        program: PathBuf,
        /// Arguments passed to it.
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Result of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Steps attempted.
    pub steps: usize,
    /// Steps whose operation failed.
    pub failed: usize,
}

/// Executes the `replay` command.
///
/// # Errors
///
/// Returns an error if the plan can not be loaded or the monitor can not
/// be set up. Failing steps are logged and counted, not returned.
pub fn execute(args: ReplayArgs, config: FilemonConfig) -> anyhow::Result<()> {
    let steps = load_plan(&args.plan)?;
    let outcome = replay(&steps, &args.output, config)?;
    println!(
        "Replayed {} step(s), {} failed. Log written to {}",
        outcome.steps,
        outcome.failed,
        args.output.display()
    );
    Ok(())
}

/// Reads a plan file.
///
/// # Errors
///
/// Returns an error if the file can not be read or is not a valid plan.
pub fn load_plan(path: &Path) -> anyhow::Result<Vec<Step>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing plan {}", path.display()))
}

/// Runs `steps` under a monitor bound to this process, logging to `output`.
///
/// # Errors
///
/// Returns an error if the monitor can not be loaded, bound or unloaded.
pub fn replay(steps: &[Step], output: &Path, config: FilemonConfig) -> anyhow::Result<ReplayOutcome> {
    let dispatcher = Arc::new(Dispatcher::new());
    let filemon = Filemon::load(config, Arc::clone(&dispatcher) as _, host_resolver())?;
    let me = Pid::current();
    let id = filemon.open(me)?;
    filemon.set_target(id, me)?;
    let _ = filemon.set_output(id, create_file(output)?)?;

    let fs = MonitoredFs::with_pid(dispatcher, me);
    let mut failed = 0;
    for (index, step) in steps.iter().enumerate() {
        if let Err(e) = run_step(&fs, step) {
            failed += 1;
            tracing::warn!(step = index + 1, ?step, error = %e, "step failed");
        }
    }

    filemon.close(id)?;
    filemon.unload()?;
    Ok(ReplayOutcome {
        steps: steps.len(),
        failed,
    })
}

fn run_step(fs: &MonitoredFs, step: &Step) -> io::Result<()> {
    match step {
        Step::Read { path } => fs.read_to_string(path).map(drop),
        Step::Write { path, contents } => fs.write(path, contents),
        Step::Rename { from, to } => fs.rename(from, to),
        Step::Link { source, target } => fs.hard_link(source, target),
        #[cfg(unix)]
        Step::Symlink { source, target } => fs.symlink(source, target),
        #[cfg(not(unix))]
        Step::Symlink { .. } => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        )),
        Step::Unlink { path } => fs.remove_file(path),
        Step::Chdir { path } => fs.set_current_dir(path),
        Step::Run { program, args } => {
            let mut child = fs.spawn(Command::new(program).args(args))?;
            let status = fs.wait(&mut child)?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::other(format!("{} exited with {status}", program.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use filemon_common::types::OpCode;
    use filemon_core::parse::parse_log;

    use super::*;

    #[test]
    fn plan_steps_are_tagged_by_op() {
        let steps: Vec<Step> = serde_json::from_str(
            r#"[
                {"op": "write", "path": "a.txt", "contents": "hi"},
                {"op": "rename", "from": "a.txt", "to": "b.txt"},
                {"op": "run", "program": "true"},
                {"op": "unlink", "path": "b.txt"}
            ]"#,
        )
        .expect("plan");
        assert_eq!(
            steps[0],
            Step::Write {
                path: "a.txt".into(),
                contents: "hi".into(),
            }
        );
        assert_eq!(
            steps[2],
            Step::Run {
                program: "true".into(),
                args: Vec::new(),
            }
        );
        assert_eq!(steps.len(), 4);
    }

    #[test]
    fn unknown_ops_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plan.json");
        std::fs::write(&path, r#"[{"op": "truncate", "path": "x"}]"#).expect("write");
        assert!(load_plan(&path).is_err());
    }

    #[test]
    fn replay_records_every_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        let log_path = dir.path().join("replay.log");
        let steps = vec![
            Step::Write {
                path: a.clone(),
                contents: "data".into(),
            },
            Step::Read { path: a.clone() },
            Step::Rename {
                from: a,
                to: b.clone(),
            },
            Step::Link {
                source: b.clone(),
                target: c,
            },
            Step::Unlink { path: b.clone() },
            Step::Unlink { path: b },
        ];

        let outcome = replay(&steps, &log_path, FilemonConfig::default()).expect("replay");
        assert_eq!(outcome, ReplayOutcome { steps: 6, failed: 1 });

        let log = parse_log(&std::fs::read_to_string(&log_path).expect("log")).expect("parse");
        assert_eq!(
            log.header.and_then(|h| h.target_pid),
            Some(Pid::current())
        );
        let codes: Vec<OpCode> = log.records.iter().map(|r| r.op).collect();
        assert_eq!(
            codes,
            vec![
                OpCode::Write,
                OpCode::Read,
                OpCode::Rename,
                OpCode::Link,
                OpCode::Unlink,
                OpCode::Unlink
            ]
        );
        assert!(log.records[5].is_failure());
    }
}
