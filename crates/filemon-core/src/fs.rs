//! Filesystem and process operations routed through a [`Dispatcher`].
//!
//! Code that wants its own file accesses monitored performs them through a
//! [`MonitoredFs`] instead of calling `std::fs` directly. Each call is the
//! real operation; the dispatcher only lets the monitor watch it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::sync::Arc;

use filemon_common::types::Pid;

use crate::dispatch::Dispatcher;
use crate::record::{Access, Operation};

/// Monitored facade over `std::fs` and `std::process`.
#[derive(Debug, Clone)]
pub struct MonitoredFs {
    dispatcher: Arc<Dispatcher>,
    pid: Pid,
}

impl MonitoredFs {
    /// Operations are attributed to the current process.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_pid(dispatcher, Pid::current())
    }

    /// Operations are attributed to `pid`.
    #[must_use]
    pub const fn with_pid(dispatcher: Arc<Dispatcher>, pid: Pid) -> Self {
        Self { dispatcher, pid }
    }

    /// Pid operations are attributed to.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    fn open(&self, path: &Path, access: Access, options: &OpenOptions) -> io::Result<File> {
        let op = Operation::Open { path, access };
        self.dispatcher.dispatch(self.pid, &op, || options.open(path))
    }

    /// Opens a file read-only.
    ///
    /// # Errors
    ///
    /// Returns the error from the real open.
    pub fn open_read(&self, path: impl AsRef<Path>) -> io::Result<File> {
        self.open(path.as_ref(), Access::Read, OpenOptions::new().read(true))
    }

    /// Creates or truncates a file for writing.
    ///
    /// # Errors
    ///
    /// Returns the error from the real open.
    pub fn create(&self, path: impl AsRef<Path>) -> io::Result<File> {
        self.open(
            path.as_ref(),
            Access::Write,
            OpenOptions::new().write(true).create(true).truncate(true),
        )
    }

    /// Opens a file for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the error from the real open.
    pub fn open_append(&self, path: impl AsRef<Path>) -> io::Result<File> {
        self.open(
            path.as_ref(),
            Access::Write,
            OpenOptions::new().append(true).create(true),
        )
    }

    /// Reads a whole file.
    ///
    /// # Errors
    ///
    /// Returns the error from the open or the read.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> io::Result<String> {
        let mut contents = String::new();
        let _ = self.open_read(path)?.read_to_string(&mut contents)?;
        Ok(contents)
    }

    /// Writes a whole file, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns the error from the open or the write.
    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> io::Result<()> {
        self.create(path)?.write_all(contents.as_ref())
    }

    /// Renames `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns the error from the real rename.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        let op = Operation::Rename { from, to };
        self.dispatcher.dispatch(self.pid, &op, || std::fs::rename(from, to))
    }

    /// Creates a hard link `target` pointing at `source`.
    ///
    /// # Errors
    ///
    /// Returns the error from the real link.
    pub fn hard_link(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> io::Result<()> {
        let (source, target) = (source.as_ref(), target.as_ref());
        let op = Operation::Link {
            source,
            target,
            symbolic: false,
        };
        self.dispatcher
            .dispatch(self.pid, &op, || std::fs::hard_link(source, target))
    }

    /// Creates a symbolic link `target` pointing at `source`.
    ///
    /// # Errors
    ///
    /// Returns the error from the real symlink.
    #[cfg(unix)]
    pub fn symlink(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> io::Result<()> {
        let (source, target) = (source.as_ref(), target.as_ref());
        let op = Operation::Link {
            source,
            target,
            symbolic: true,
        };
        self.dispatcher.dispatch(self.pid, &op, || {
            std::os::unix::fs::symlink(source, target)
        })
    }

    /// Removes a file.
    ///
    /// # Errors
    ///
    /// Returns the error from the real unlink.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        let op = Operation::Unlink { path };
        self.dispatcher.dispatch(self.pid, &op, || std::fs::remove_file(path))
    }

    /// Changes the process working directory.
    ///
    /// # Errors
    ///
    /// Returns the error from the real chdir.
    pub fn set_current_dir(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        let op = Operation::Chdir { path };
        self.dispatcher
            .dispatch(self.pid, &op, || std::env::set_current_dir(path))
    }

    /// Spawns `command` as a monitored child.
    ///
    /// Logged as a process creation by this pid followed by an exec by the
    /// child, so the child is observed by the same handle.
    ///
    /// # Errors
    ///
    /// Returns the error from the real spawn.
    pub fn spawn(&self, command: &mut Command) -> io::Result<Child> {
        let program = PathBuf::from(command.get_program());
        let child = self
            .dispatcher
            .dispatch(self.pid, &Operation::Fork, || command.spawn())?;
        let exec = Operation::Exec { path: &program };
        self.dispatcher
            .dispatch(Pid::new(child.id()), &exec, || Ok(()))?;
        Ok(child)
    }

    /// Waits for a spawned child and logs its exit.
    ///
    /// # Errors
    ///
    /// Returns the error from the real wait.
    pub fn wait(&self, child: &mut Child) -> io::Result<ExitStatus> {
        let status = child.wait()?;
        let exit = Operation::Exit {
            status: status.code().unwrap_or(-1),
        };
        self.dispatcher
            .dispatch(Pid::new(child.id()), &exit, || Ok(()))?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::intercept::{InterceptHost, OperationCategory, OperationHook};

    #[derive(Default)]
    struct Seen {
        statuses: Mutex<Vec<(char, i64)>>,
    }

    impl OperationHook for Seen {
        fn before(&self, _caller: Pid, _op: &Operation<'_>) {}

        fn after(&self, _caller: Pid, op: &Operation<'_>, status: i64) {
            self.statuses
                .lock()
                .unwrap()
                .push((op.op_code().as_char(), status));
        }
    }

    fn hooked() -> (MonitoredFs, Arc<Seen>) {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = Arc::new(Seen::default());
        dispatcher
            .install_hooks(&OperationCategory::MONITORED, Arc::clone(&seen) as _)
            .expect("install");
        (MonitoredFs::with_pid(dispatcher, Pid::new(42)), seen)
    }

    #[test]
    fn file_operations_behave_like_std() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (fs, seen) = hooked();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");

        fs.write(&a, "hello").expect("write");
        assert_eq!(fs.read_to_string(&a).expect("read"), "hello");
        fs.rename(&a, &b).expect("rename");
        fs.hard_link(&b, &c).expect("link");
        fs.remove_file(&b).expect("unlink");

        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(std::fs::read_to_string(&c).expect("read c"), "hello");

        let letters: Vec<char> = seen.statuses.lock().unwrap().iter().map(|s| s.0).collect();
        assert_eq!(letters, vec!['W', 'R', 'M', 'L', 'D']);
    }

    #[test]
    fn failures_pass_through_with_negative_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (fs, seen) = hooked();
        let err = fs.open_read(dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let statuses = seen.statuses.lock().unwrap().clone();
        assert_eq!(statuses, vec![('R', -i64::from(libc::ENOENT))]);
    }

    #[cfg(unix)]
    #[test]
    fn opens_report_file_descriptor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (fs, seen) = hooked();
        let _file = fs.create(dir.path().join("out")).expect("create");
        let statuses = seen.statuses.lock().unwrap().clone();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].1 >= 0);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_logged_as_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (fs, seen) = hooked();
        fs.symlink("target", dir.path().join("link")).expect("symlink");
        assert_eq!(seen.statuses.lock().unwrap()[0], ('L', 0));
    }
}
