//! Event records and their line format.
//!
//! Every intercepted operation becomes one newline-terminated record:
//!
//! ```text
//! <op-code> <pid> <fields...> <status>
//! ```
//!
//! Rename and link records quote both paths (`'from' 'to'`); process
//! creation and exit carry no path, the status being the child pid and the
//! exit status respectively. A session starts with a header naming the log
//! format version, the target pid and the start time.
//!
//! Paths are written verbatim, as the v4 format has no escaping. Bytes that
//! are not valid UTF-8 are replaced with U+FFFD. A path containing a newline
//! splits its record, and a quoted path containing `' '` can not be told
//! apart from the separator when the log is read back.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use filemon_common::constants::FILEMON_VERSION;
use filemon_common::types::{OpCode, Pid};

use crate::intercept::OperationCategory;

/// Access mode requested by an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only.
    Read,
    /// Write, read-write, append, or create.
    Write,
}

/// A monitored operation and the arguments it was called with.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// Creation of a child process.
    Fork,
    /// Replacement of the process image by `path`.
    Exec {
        /// Program being executed.
        path: &'a Path,
    },
    /// File open or create.
    Open {
        /// File being opened.
        path: &'a Path,
        /// Requested access.
        access: Access,
    },
    /// Rename of `from` to `to`.
    Rename {
        /// Existing path.
        from: &'a Path,
        /// New path.
        to: &'a Path,
    },
    /// Hard or symbolic link creation.
    Link {
        /// Path the link points at.
        source: &'a Path,
        /// Path of the new link.
        target: &'a Path,
        /// Whether the link is symbolic.
        symbolic: bool,
    },
    /// File removal.
    Unlink {
        /// File being removed.
        path: &'a Path,
    },
    /// Working directory change.
    Chdir {
        /// New working directory.
        path: &'a Path,
    },
    /// Process termination with `status`.
    Exit {
        /// Exit status.
        status: i32,
    },
}

impl Operation<'_> {
    /// Category this operation is dispatched under.
    #[must_use]
    pub const fn category(&self) -> OperationCategory {
        match self {
            Self::Fork => OperationCategory::ProcessCreate,
            Self::Exec { .. } => OperationCategory::Exec,
            Self::Open { .. } => OperationCategory::Open,
            Self::Rename { .. } => OperationCategory::Rename,
            Self::Link { .. } => OperationCategory::Link,
            Self::Unlink { .. } => OperationCategory::Unlink,
            Self::Chdir { .. } => OperationCategory::Chdir,
            Self::Exit { .. } => OperationCategory::Exit,
        }
    }

    /// Letter this operation is logged under.
    #[must_use]
    pub const fn op_code(&self) -> OpCode {
        match self {
            Self::Fork => OpCode::Fork,
            Self::Exec { .. } => OpCode::Exec,
            Self::Open {
                access: Access::Read,
                ..
            } => OpCode::Read,
            Self::Open {
                access: Access::Write,
                ..
            } => OpCode::Write,
            Self::Rename { .. } => OpCode::Rename,
            Self::Link { .. } => OpCode::Link,
            Self::Unlink { .. } => OpCode::Unlink,
            Self::Chdir { .. } => OpCode::Chdir,
            Self::Exit { .. } => OpCode::Exit,
        }
    }
}

/// Per-handle buffers reused for every record the handle writes.
#[derive(Debug)]
pub struct Scratch {
    path1: String,
    path2: String,
    message: String,
}

impl Scratch {
    /// Allocates buffers with the given initial capacities.
    #[must_use]
    pub fn with_capacity(path_capacity: usize, message_capacity: usize) -> Self {
        Self {
            path1: String::with_capacity(path_capacity),
            path2: String::with_capacity(path_capacity),
            message: String::with_capacity(message_capacity),
        }
    }

    /// The most recently formatted record.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Formats the session header into the message buffer.
    pub fn format_header(&mut self, target: Pid, start: DateTime<Utc>) -> &str {
        self.message.clear();
        let _ = write!(
            self.message,
            "# filemon version {FILEMON_VERSION}\n# Target pid {target}\n# Start {}.{:06}\nV {FILEMON_VERSION}\n",
            start.timestamp(),
            start.timestamp_subsec_micros(),
        );
        &self.message
    }

    /// Formats one event record into the message buffer.
    pub fn format_event(&mut self, pid: Pid, op: &Operation<'_>, status: i64) -> &str {
        self.message.clear();
        let code = op.op_code();
        match *op {
            Operation::Fork | Operation::Exit { .. } => {
                let _ = writeln!(self.message, "{code} {pid} {status}");
            }
            Operation::Rename { from, to } => {
                copy_path(&mut self.path1, from);
                copy_path(&mut self.path2, to);
                let _ = writeln!(
                    self.message,
                    "{code} {pid} '{}' '{}' {status}",
                    self.path1, self.path2
                );
            }
            Operation::Link { source, target, .. } => {
                copy_path(&mut self.path1, source);
                copy_path(&mut self.path2, target);
                let _ = writeln!(
                    self.message,
                    "{code} {pid} '{}' '{}' {status}",
                    self.path1, self.path2
                );
            }
            Operation::Exec { path }
            | Operation::Open { path, .. }
            | Operation::Unlink { path }
            | Operation::Chdir { path } => {
                copy_path(&mut self.path1, path);
                let _ = writeln!(self.message, "{code} {pid} {} {status}", self.path1);
            }
        }
        &self.message
    }
}

/// Copies `path` into `buffer`, replacing invalid UTF-8.
fn copy_path(buffer: &mut String, path: &Path) {
    buffer.clear();
    buffer.push_str(&path.to_string_lossy());
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn scratch() -> Scratch {
        Scratch::with_capacity(16, 64)
    }

    #[test]
    fn header_matches_log_format() {
        let start = Utc
            .timestamp_opt(1_700_000_000, 42_000)
            .single()
            .expect("valid timestamp");
        let mut scratch = scratch();
        let header = scratch.format_header(Pid::new(1234), start);
        assert_eq!(
            header,
            "# filemon version 4\n# Target pid 1234\n# Start 1700000000.000042\nV 4\n"
        );
    }

    #[test]
    fn open_records_use_access_letter() {
        let mut scratch = scratch();
        let path = Path::new("/tmp/x");
        let read = Operation::Open {
            path,
            access: Access::Read,
        };
        assert_eq!(scratch.format_event(Pid::new(1234), &read, 3), "R 1234 /tmp/x 3\n");

        let write = Operation::Open {
            path,
            access: Access::Write,
        };
        assert_eq!(scratch.format_event(Pid::new(1234), &write, -13), "W 1234 /tmp/x -13\n");
    }

    #[test]
    fn path_pairs_are_quoted() {
        let mut scratch = scratch();
        let rename = Operation::Rename {
            from: Path::new("a.tmp"),
            to: Path::new("a.o"),
        };
        assert_eq!(scratch.format_event(Pid::new(9), &rename, 0), "M 9 'a.tmp' 'a.o' 0\n");

        let link = Operation::Link {
            source: Path::new("lib.so.1"),
            target: Path::new("lib.so"),
            symbolic: true,
        };
        assert_eq!(scratch.format_event(Pid::new(9), &link, 0), "L 9 'lib.so.1' 'lib.so' 0\n");
    }

    #[test]
    fn pathless_records_end_in_status() {
        let mut scratch = scratch();
        assert_eq!(scratch.format_event(Pid::new(9), &Operation::Fork, 10), "F 9 10\n");
        assert_eq!(
            scratch.format_event(Pid::new(10), &Operation::Exit { status: 2 }, 2),
            "X 10 2\n"
        );
    }

    #[test]
    fn buffers_grow_past_initial_capacity_and_are_reused() {
        let mut scratch = scratch();
        let long = "d/".repeat(200) + "file";
        let op = Operation::Unlink {
            path: Path::new(&long),
        };
        let line = scratch.format_event(Pid::new(1), &op, 0).to_owned();
        assert_eq!(line, format!("D 1 {long} 0\n"));

        let grown = scratch.path1.capacity();
        let _ = scratch.format_event(
            Pid::new(1),
            &Operation::Chdir {
                path: Path::new("/"),
            },
            0,
        );
        assert_eq!(scratch.path1.capacity(), grown);
        assert_eq!(scratch.message(), "C 1 / 0\n");
    }

    #[test]
    fn categories_follow_operations() {
        let op = Operation::Exec {
            path: Path::new("/bin/cc"),
        };
        assert_eq!(op.category(), OperationCategory::Exec);
        assert_eq!(op.op_code(), OpCode::Exec);
        assert_eq!(Operation::Fork.category(), OperationCategory::ProcessCreate);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_bytes_are_replaced() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut scratch = scratch();
        let op = Operation::Unlink {
            path: Path::new(OsStr::from_bytes(b"/tmp/a\xffb")),
        };
        assert_eq!(
            scratch.format_event(Pid::new(1), &op, 0),
            "D 1 /tmp/a\u{fffd}b 0\n"
        );
    }
}
