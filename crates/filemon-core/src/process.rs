//! Process identity resolution and permission checks.
//!
//! Binding a handle to a target goes through a [`ProcessResolver`], which
//! maps a pid to a live process the caller may observe. On Linux the host
//! resolver reads `/proc`; [`ProcessTable`] is an in-memory resolver for
//! hosts that manage their own process model.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use filemon_common::error::{FilemonError, Result};
use filemon_common::types::Pid;

/// A resolved, observable process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRef {
    /// Process identifier.
    pub pid: Pid,
    /// Real user id owning the process.
    pub uid: u32,
}

/// Maps a pid to a live process the caller has debug rights over.
pub trait ProcessResolver: Send + Sync + fmt::Debug {
    /// Resolves `pid`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchProcess` if the pid is unknown, `ProcessExiting` if the
    /// process is on its way out, and `PermissionDenied` if the caller may
    /// not observe it.
    fn resolve(&self, pid: Pid) -> Result<ProcessRef>;
}

/// Whether a caller with `caller_uid` may observe a process owned by the
/// given real, effective and saved uids.
fn can_debug(caller_uid: u32, uids: [u32; 3]) -> bool {
    caller_uid == 0 || uids.iter().all(|&uid| uid == caller_uid)
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    uid: u32,
    exiting: bool,
}

/// In-memory process model.
#[derive(Debug)]
pub struct ProcessTable {
    caller_uid: u32,
    entries: RwLock<HashMap<Pid, TableEntry>>,
}

impl ProcessTable {
    /// Creates an empty table whose lookups run as `caller_uid`.
    #[must_use]
    pub fn new(caller_uid: u32) -> Self {
        Self {
            caller_uid,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Adds (or replaces) a live process owned by `uid`.
    pub fn insert(&self, pid: Pid, uid: u32) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let _ = entries.insert(pid, TableEntry { uid, exiting: false });
    }

    /// Flags a process as exiting. Returns `false` if it is unknown.
    pub fn mark_exiting(&self, pid: Pid) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&pid) {
            Some(entry) => {
                entry.exiting = true;
                true
            }
            None => false,
        }
    }

    /// Removes a process that has been reaped.
    pub fn remove(&self, pid: Pid) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let _ = entries.remove(&pid);
    }
}

impl ProcessResolver for ProcessTable {
    fn resolve(&self, pid: Pid) -> Result<ProcessRef> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get(&pid)
            .ok_or(FilemonError::NoSuchProcess { pid: pid.as_raw() })?;
        if entry.exiting {
            return Err(FilemonError::ProcessExiting { pid: pid.as_raw() });
        }
        if !can_debug(self.caller_uid, [entry.uid; 3]) {
            return Err(FilemonError::PermissionDenied {
                message: format!("uid {} cannot observe pid {pid}", self.caller_uid),
            });
        }
        Ok(ProcessRef { pid, uid: entry.uid })
    }
}

#[cfg(target_os = "linux")]
pub use procfs::ProcfsResolver;

#[cfg(target_os = "linux")]
mod procfs {
    use std::path::{Path, PathBuf};

    use filemon_common::error::{FilemonError, Result};
    use filemon_common::types::Pid;

    use super::{ProcessRef, ProcessResolver, can_debug};

    /// Resolves processes through `/proc/<pid>/status`.
    #[derive(Debug, Clone)]
    pub struct ProcfsResolver {
        root: PathBuf,
        caller_uid: u32,
    }

    impl ProcfsResolver {
        /// Resolver for the live `/proc`, checking rights as the current
        /// effective uid.
        #[must_use]
        pub fn new() -> Self {
            Self {
                root: PathBuf::from("/proc"),
                caller_uid: nix::unistd::geteuid().as_raw(),
            }
        }

        /// Resolver over an alternate procfs tree.
        #[must_use]
        pub fn with_root(root: impl Into<PathBuf>, caller_uid: u32) -> Self {
            Self {
                root: root.into(),
                caller_uid,
            }
        }

        fn status_path(&self, pid: Pid) -> PathBuf {
            self.root.join(pid.as_raw().to_string()).join("status")
        }
    }

    impl Default for ProcfsResolver {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Fields of `/proc/<pid>/status` the resolver cares about.
    #[derive(Debug, PartialEq, Eq)]
    struct Status {
        state: char,
        uids: [u32; 3],
    }

    fn parse_status(content: &str) -> Option<Status> {
        let mut state = None;
        let mut uids = None;
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("State:") {
                state = rest.trim_start().chars().next();
            } else if let Some(rest) = line.strip_prefix("Uid:") {
                let mut fields = rest.split_whitespace().map(str::parse::<u32>);
                if let (Some(Ok(real)), Some(Ok(effective)), Some(Ok(saved))) =
                    (fields.next(), fields.next(), fields.next())
                {
                    uids = Some([real, effective, saved]);
                }
            }
        }
        Some(Status {
            state: state?,
            uids: uids?,
        })
    }

    fn read_status(path: &Path, pid: Pid) -> Result<Status> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FilemonError::NoSuchProcess { pid: pid.as_raw() });
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(FilemonError::PermissionDenied {
                    message: format!("cannot read {}", path.display()),
                });
            }
            Err(e) => {
                return Err(FilemonError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        parse_status(&content).ok_or(FilemonError::NoSuchProcess { pid: pid.as_raw() })
    }

    impl ProcessResolver for ProcfsResolver {
        fn resolve(&self, pid: Pid) -> Result<ProcessRef> {
            let status = read_status(&self.status_path(pid), pid)?;
            // Z: zombie, X: dead.
            if matches!(status.state, 'Z' | 'X' | 'x') {
                return Err(FilemonError::ProcessExiting { pid: pid.as_raw() });
            }
            if !can_debug(self.caller_uid, status.uids) {
                return Err(FilemonError::PermissionDenied {
                    message: format!("uid {} cannot observe pid {pid}", self.caller_uid),
                });
            }
            tracing::debug!(pid = pid.as_raw(), state = %status.state, "resolved process");
            Ok(ProcessRef {
                pid,
                uid: status.uids[0],
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const STATUS: &str = "Name:\tmake\nState:\tS (sleeping)\nTgid:\t1234\n\
                              Uid:\t1000\t1000\t1000\t1000\nGid:\t1000\t1000\t1000\t1000\n";

        fn fake_proc(pid: u32, status: &str) -> tempfile::TempDir {
            let dir = tempfile::tempdir().expect("tempdir");
            let proc_dir = dir.path().join(pid.to_string());
            std::fs::create_dir_all(&proc_dir).expect("mkdir");
            std::fs::write(proc_dir.join("status"), status).expect("write status");
            dir
        }

        #[test]
        fn parse_status_reads_state_and_uids() {
            let status = parse_status(STATUS).expect("parse");
            assert_eq!(status.state, 'S');
            assert_eq!(status.uids, [1000, 1000, 1000]);
        }

        #[test]
        fn resolves_process_owned_by_caller() {
            let root = fake_proc(1234, STATUS);
            let resolver = ProcfsResolver::with_root(root.path(), 1000);
            let process = resolver.resolve(Pid::new(1234)).expect("resolve");
            assert_eq!(process.pid, Pid::new(1234));
            assert_eq!(process.uid, 1000);
        }

        #[test]
        fn zombie_is_exiting() {
            let root = fake_proc(77, &STATUS.replace("S (sleeping)", "Z (zombie)"));
            let resolver = ProcfsResolver::with_root(root.path(), 0);
            let err = resolver.resolve(Pid::new(77)).unwrap_err();
            assert!(matches!(err, FilemonError::ProcessExiting { pid: 77 }));
        }

        #[test]
        fn foreign_process_is_denied_unless_root() {
            let root = fake_proc(1234, STATUS);
            let stranger = ProcfsResolver::with_root(root.path(), 1001);
            assert!(matches!(
                stranger.resolve(Pid::new(1234)),
                Err(FilemonError::PermissionDenied { .. })
            ));

            let superuser = ProcfsResolver::with_root(root.path(), 0);
            assert!(superuser.resolve(Pid::new(1234)).is_ok());
        }

        #[test]
        fn missing_pid_is_no_such_process() {
            let root = tempfile::tempdir().expect("tempdir");
            let resolver = ProcfsResolver::with_root(root.path(), 0);
            assert!(matches!(
                resolver.resolve(Pid::new(999_999)),
                Err(FilemonError::NoSuchProcess { pid: 999_999 })
            ));
        }

        #[test]
        fn live_resolver_sees_current_process() {
            let resolver = ProcfsResolver::new();
            let process = resolver.resolve(Pid::current()).expect("resolve self");
            assert_eq!(process.pid, Pid::current());
        }
    }
}

/// Returns the resolver for the current platform.
///
/// Linux uses `/proc`. Elsewhere the table only knows the calling process.
#[must_use]
pub fn host_resolver() -> Arc<dyn ProcessResolver> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcfsResolver::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        let table = ProcessTable::new(0);
        table.insert(Pid::current(), 0);
        Arc::new(table)
    }
}
