//! Reader for filemon v4 logs using `nom`.
//!
//! Turns a log written by a monitor handle back into typed records and
//! derives a dependency summary from them: which files a process tree
//! read, wrote, executed and removed.
//!
//! The format is not escaped, so paths holding a newline, or `' '` inside a
//! quoted pair, do not survive the round trip.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use filemon_common::constants::FILEMON_VERSION;
use filemon_common::error::{FilemonError, Result};
use filemon_common::types::{OpCode, Pid};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{anychar, char, i64 as signed, u32 as unsigned},
    combinator::{all_consuming, map, map_opt, rest, verify},
    sequence::{delimited, preceded, separated_pair},
};
use serde::Serialize;

/// Session header of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    /// Format version.
    pub version: u32,
    /// Pid the session was started for.
    pub target_pid: Option<Pid>,
    /// Time the sink was bound.
    pub start: Option<DateTime<Utc>>,
}

/// One parsed event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Operation letter.
    pub op: OpCode,
    /// Pid that performed the operation.
    pub pid: Pid,
    /// Zero, one or two paths depending on `op`.
    pub paths: Vec<PathBuf>,
    /// Result of the operation: child pid, exit status, or negated errno.
    pub status: i64,
}

impl EventRecord {
    /// Whether the operation failed. Exit statuses never count as failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status < 0 && self.op != OpCode::Exit
    }
}

/// A parsed log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilemonLog {
    /// Header, if the log carried one.
    pub header: Option<LogHeader>,
    /// Records in log order.
    pub records: Vec<EventRecord>,
}

/// Files and processes touched by a monitored process tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencySummary {
    /// Every pid that appeared, including created children.
    pub processes: BTreeSet<Pid>,
    /// Programs executed.
    pub executed: BTreeSet<PathBuf>,
    /// Files opened for reading.
    pub read: BTreeSet<PathBuf>,
    /// Files opened for writing.
    pub written: BTreeSet<PathBuf>,
    /// Files removed.
    pub removed: BTreeSet<PathBuf>,
    /// Renames, in log order.
    pub renamed: Vec<(PathBuf, PathBuf)>,
    /// Links created, source then target.
    pub linked: Vec<(PathBuf, PathBuf)>,
    /// Directories changed into.
    pub directories: BTreeSet<PathBuf>,
    /// Number of failed operations.
    pub failed: usize,
}

enum Line {
    Version(u32),
    Target(Pid),
    Start(DateTime<Utc>),
    Comment,
    FormatVersion(u32),
    Record(EventRecord),
}

fn pid(input: &str) -> IResult<&str, Pid> {
    map(unsigned, Pid::new).parse(input)
}

fn op_code(input: &str) -> IResult<&str, OpCode> {
    map_opt(anychar, OpCode::from_char).parse(input)
}

fn start_time(input: &str) -> IResult<&str, DateTime<Utc>> {
    map_opt(separated_pair(signed, char('.'), unsigned), |(secs, micros)| {
        let nanos = micros.checked_mul(1_000)?;
        Utc.timestamp_opt(secs, nanos).single()
    })
    .parse(input)
}

/// `'first' 'second'`
fn quoted_pair(input: &str) -> IResult<&str, Vec<PathBuf>> {
    let (input, first) = delimited(char('\''), take_until("' '"), tag("' '")).parse(input)?;
    let (input, second) = map_opt(rest, |s: &str| s.strip_suffix('\'')).parse(input)?;
    Ok((input, vec![PathBuf::from(first), PathBuf::from(second)]))
}

fn single_path(input: &str) -> IResult<&str, Vec<PathBuf>> {
    map(verify(rest, |s: &str| !s.is_empty()), |s: &str| {
        vec![PathBuf::from(s)]
    })
    .parse(input)
}

fn record(input: &str) -> IResult<&str, EventRecord> {
    let (input, (op, pid)) = separated_pair(op_code, char(' '), pid).parse(input)?;
    let (input, _) = char(' ').parse(input)?;
    if op.is_pathless() {
        let (input, status) = all_consuming(signed).parse(input)?;
        return Ok((
            input,
            EventRecord {
                op,
                pid,
                paths: Vec::new(),
                status,
            },
        ));
    }
    // Paths may contain spaces; the status is always the last field.
    let Some((fields, status)) = input.rsplit_once(' ') else {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Space,
        )));
    };
    let (_, status) = all_consuming(signed).parse(status)?;
    let (_, paths) = if op.has_path_pair() {
        all_consuming(quoted_pair).parse(fields)?
    } else {
        all_consuming(single_path).parse(fields)?
    };
    Ok((
        "",
        EventRecord {
            op,
            pid,
            paths,
            status,
        },
    ))
}

fn line(input: &str) -> IResult<&str, Line> {
    all_consuming(alt((
        map(preceded(tag("# filemon version "), unsigned), Line::Version),
        map(preceded(tag("# Target pid "), pid), Line::Target),
        map(preceded(tag("# Start "), start_time), Line::Start),
        map(preceded(char('#'), rest), |_| Line::Comment),
        map(preceded(tag("V "), unsigned), Line::FormatVersion),
        map(record, Line::Record),
    )))
    .parse(input)
}

fn check_version(version: u32, line: usize) -> Result<()> {
    if version == FILEMON_VERSION {
        Ok(())
    } else {
        Err(FilemonError::Parse {
            line,
            message: format!("unsupported log version {version}, expected {FILEMON_VERSION}"),
        })
    }
}

/// Parses a complete log.
///
/// Blank lines and `#` comments other than the header are skipped.
///
/// # Errors
///
/// Returns `Parse` with the one-based line number of the first malformed
/// line, or of a version other than the supported one.
pub fn parse_log(input: &str) -> Result<FilemonLog> {
    let mut log = FilemonLog::default();
    for (index, text) in input.lines().enumerate() {
        let number = index + 1;
        if text.trim().is_empty() {
            continue;
        }
        let (_, parsed) = line(text).map_err(|e| FilemonError::Parse {
            line: number,
            message: format!(
                "malformed record \"{}\" ({e})",
                text.chars().take(40).collect::<String>()
            ),
        })?;
        match parsed {
            Line::Version(version) => {
                check_version(version, number)?;
                log.header = Some(LogHeader {
                    version,
                    target_pid: None,
                    start: None,
                });
            }
            Line::Target(pid) => header_mut(&mut log).target_pid = Some(pid),
            Line::Start(start) => header_mut(&mut log).start = Some(start),
            Line::FormatVersion(version) => check_version(version, number)?,
            Line::Comment => {}
            Line::Record(record) => log.records.push(record),
        }
    }
    tracing::debug!(records = log.records.len(), "parsed filemon log");
    Ok(log)
}

fn header_mut(log: &mut FilemonLog) -> &mut LogHeader {
    log.header.get_or_insert(LogHeader {
        version: FILEMON_VERSION,
        target_pid: None,
        start: None,
    })
}

fn resolve(cwd: &HashMap<Pid, PathBuf>, pid: Pid, path: &Path) -> PathBuf {
    match cwd.get(&pid) {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

impl FilemonLog {
    /// Summarises the files and processes the log mentions.
    ///
    /// Relative paths are resolved against the last directory the pid
    /// changed into, which children inherit from their creator. Failed
    /// operations are counted but only listed when `include_failed` is set.
    ///
    /// An exec is logged before it runs; when it then fails, a second exec
    /// record carries the error and the first one is not counted.
    #[must_use]
    pub fn summary(&self, include_failed: bool) -> DependencySummary {
        let mut summary = DependencySummary::default();
        let mut cwd: HashMap<Pid, PathBuf> = HashMap::new();
        let retracted = self.retracted_execs();
        for (index, record) in self.records.iter().enumerate() {
            let pid = record.pid;
            let _ = summary.processes.insert(pid);
            if retracted.contains(&index) {
                continue;
            }
            let failed = record.is_failure();
            if failed {
                summary.failed += 1;
                if !include_failed {
                    continue;
                }
            }
            let resolved: Vec<PathBuf> = record
                .paths
                .iter()
                .map(|path| resolve(&cwd, pid, path))
                .collect();
            let mut paths = resolved.into_iter();
            match record.op {
                OpCode::Fork => {
                    if let Ok(child) = u32::try_from(record.status) {
                        let child = Pid::new(child);
                        let _ = summary.processes.insert(child);
                        if let Some(dir) = cwd.get(&pid).cloned() {
                            let _ = cwd.insert(child, dir);
                        }
                    }
                }
                OpCode::Exit => {
                    let _ = cwd.remove(&pid);
                }
                OpCode::Chdir => {
                    if let Some(dir) = paths.next() {
                        let _ = summary.directories.insert(dir.clone());
                        if !failed {
                            let _ = cwd.insert(pid, dir);
                        }
                    }
                }
                OpCode::Exec => summary.executed.extend(paths),
                OpCode::Read => summary.read.extend(paths),
                OpCode::Write => summary.written.extend(paths),
                OpCode::Unlink => summary.removed.extend(paths),
                OpCode::Rename => {
                    if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                        summary.renamed.push((from, to));
                    }
                }
                OpCode::Link => {
                    if let (Some(source), Some(target)) = (paths.next(), paths.next()) {
                        summary.linked.push((source, target));
                    }
                }
            }
        }
        summary
    }

    /// Indices of exec records that a following failed exec of the same
    /// pid and path shows never took effect.
    fn retracted_execs(&self) -> BTreeSet<usize> {
        let mut pending: HashMap<Pid, usize> = HashMap::new();
        let mut retracted = BTreeSet::new();
        for (index, record) in self.records.iter().enumerate() {
            let previous = pending.remove(&record.pid);
            if record.op != OpCode::Exec {
                continue;
            }
            if !record.is_failure() {
                let _ = pending.insert(record.pid, index);
            } else if let Some(previous) = previous {
                if self.records[previous].paths == record.paths {
                    let _ = retracted.insert(previous);
                }
            }
        }
        retracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Access, Operation, Scratch};

    const SAMPLE: &str = "\
# filemon version 4
# Target pid 1234
# Start 1700000000.000042
V 4
C 1234 /src 0
R 1234 main.c 3
F 1234 1240
E 1240 /usr/bin/cc 0
W 1240 main.o 4
R 1240 /missing -2
M 1240 'main.o' 'obj dir/main.o' 0
X 1240 0
D 1234 /src/tmp 0
";

    #[test]
    fn parses_header_and_records() {
        let log = parse_log(SAMPLE).expect("parse");
        let header = log.header.expect("header");
        assert_eq!(header.version, 4);
        assert_eq!(header.target_pid, Some(Pid::new(1234)));
        let start = header.start.expect("start");
        assert_eq!(start.timestamp(), 1_700_000_000);
        assert_eq!(start.timestamp_subsec_micros(), 42);

        assert_eq!(log.records.len(), 9);
        assert_eq!(
            log.records[6],
            EventRecord {
                op: OpCode::Rename,
                pid: Pid::new(1240),
                paths: vec![PathBuf::from("main.o"), PathBuf::from("obj dir/main.o")],
                status: 0,
            }
        );
        assert!(log.records[5].is_failure());
        assert!(!log.records[7].is_failure());
    }

    #[test]
    fn summary_resolves_relative_paths_through_inherited_cwd() {
        let summary = parse_log(SAMPLE).expect("parse").summary(false);
        assert_eq!(
            summary.processes,
            [Pid::new(1234), Pid::new(1240)].into_iter().collect()
        );
        assert!(summary.read.contains(Path::new("/src/main.c")));
        assert!(!summary.read.contains(Path::new("/missing")));
        assert!(summary.written.contains(Path::new("/src/main.o")));
        assert!(summary.executed.contains(Path::new("/usr/bin/cc")));
        assert!(summary.removed.contains(Path::new("/src/tmp")));
        assert_eq!(
            summary.renamed,
            vec![(PathBuf::from("/src/main.o"), PathBuf::from("/src/obj dir/main.o"))]
        );
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn failed_exec_is_not_listed_as_executed() {
        let log = parse_log("E 5 /no/such/prog 0\nE 5 /no/such/prog -2\nE 5 /bin/sh 0\n")
            .expect("parse");
        let summary = log.summary(false);
        assert_eq!(
            summary.executed,
            [PathBuf::from("/bin/sh")].into_iter().collect()
        );
        assert_eq!(summary.failed, 1);

        let summary = log.summary(true);
        assert!(summary.executed.contains(Path::new("/no/such/prog")));
    }

    #[test]
    fn summary_can_include_failures() {
        let summary = parse_log(SAMPLE).expect("parse").summary(true);
        assert!(summary.read.contains(Path::new("/missing")));
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn reads_everything_the_writer_produces() {
        let mut scratch = Scratch::with_capacity(8, 32);
        let mut text = scratch.format_header(Pid::new(77), Utc::now()).to_string();
        let ops = [
            Operation::Fork,
            Operation::Exec {
                path: Path::new("/bin/sh"),
            },
            Operation::Open {
                path: Path::new("/etc/hosts"),
                access: Access::Read,
            },
            Operation::Open {
                path: Path::new("out file"),
                access: Access::Write,
            },
            Operation::Rename {
                from: Path::new("a"),
                to: Path::new("b"),
            },
            Operation::Link {
                source: Path::new("b"),
                target: Path::new("c"),
                symbolic: true,
            },
            Operation::Unlink {
                path: Path::new("a"),
            },
            Operation::Chdir {
                path: Path::new("/tmp"),
            },
            Operation::Exit { status: 2 },
        ];
        for op in &ops {
            text.push_str(scratch.format_event(Pid::new(77), op, 9));
        }

        let log = parse_log(&text).expect("parse");
        let codes: Vec<OpCode> = log.records.iter().map(|r| r.op).collect();
        let expected: Vec<OpCode> = ops.iter().map(Operation::op_code).collect();
        assert_eq!(codes, expected);
        assert_eq!(log.records[3].paths, vec![PathBuf::from("out file")]);
        assert!(log.records.iter().all(|r| r.status == 9));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = parse_log("V 4\nR 1 /a 0\nQ 1 /b 0\n").unwrap_err();
        assert!(matches!(err, FilemonError::Parse { line: 3, .. }));

        let err = parse_log("M 1 'a' 0\n").unwrap_err();
        assert!(matches!(err, FilemonError::Parse { line: 1, .. }));

        let err = parse_log("F 1 x\n").unwrap_err();
        assert!(matches!(err, FilemonError::Parse { line: 1, .. }));
    }

    #[test]
    fn newline_in_path_breaks_the_record() {
        let mut scratch = Scratch::with_capacity(8, 32);
        let op = Operation::Unlink {
            path: Path::new("/tmp/a\nb"),
        };
        let text = scratch.format_event(Pid::new(3), &op, 0).to_string();
        assert!(matches!(
            parse_log(&text),
            Err(FilemonError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn other_versions_are_rejected() {
        let err = parse_log("# filemon version 3\n").unwrap_err();
        assert!(matches!(err, FilemonError::Parse { line: 1, .. }));
        assert!(parse_log("V 5\n").is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let log = parse_log("# generated by make\n\nX 10 0\n").expect("parse");
        assert!(log.header.is_none());
        assert_eq!(log.records.len(), 1);
    }
}
