//! Interception layer.
//!
//! The host environment owns operation dispatch and exposes it through
//! [`InterceptHost`]: a registration of one [`OperationHook`] for a set of
//! [`OperationCategory`]s. The hook installed by [`Interceptor`] looks up
//! the caller in the pool's reverse table and, when the caller is observed,
//! appends a record to the handle's sink. It never changes the outcome of
//! the operation it observes.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use filemon_common::error::{FilemonError, Result};
use filemon_common::types::Pid;

use crate::pool::HandlePool;
use crate::record::Operation;

/// Category of operations a hook can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    /// fork, vfork, spawn.
    ProcessCreate,
    /// Program execution.
    Exec,
    /// File open or create.
    Open,
    /// Rename.
    Rename,
    /// Hard or symbolic link.
    Link,
    /// File removal.
    Unlink,
    /// Working directory change.
    Chdir,
    /// Process exit.
    Exit,
}

impl OperationCategory {
    /// Categories the monitor hooks.
    pub const MONITORED: [Self; 8] = [
        Self::ProcessCreate,
        Self::Exec,
        Self::Open,
        Self::Rename,
        Self::Link,
        Self::Unlink,
        Self::Chdir,
        Self::Exit,
    ];

    /// Whether the record is written before the operation runs.
    ///
    /// Exec and exit do not return to the caller when they succeed.
    #[must_use]
    pub const fn records_before(self) -> bool {
        matches!(self, Self::Exec | Self::Exit)
    }
}

/// Observer called around every dispatched operation of a hooked category.
pub trait OperationHook: Send + Sync {
    /// Called before the operation runs.
    fn before(&self, caller: Pid, op: &Operation<'_>);

    /// Called after the operation returned `status` (negative errno on
    /// failure).
    fn after(&self, caller: Pid, op: &Operation<'_>, status: i64);
}

impl fmt::Debug for dyn OperationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperationHook")
    }
}

/// Hook installation service provided by the host.
pub trait InterceptHost: Send + Sync + fmt::Debug {
    /// Routes the given categories through `hook`.
    ///
    /// # Errors
    ///
    /// Returns an error if hooks are already installed.
    fn install_hooks(
        &self,
        categories: &[OperationCategory],
        hook: Arc<dyn OperationHook>,
    ) -> Result<()>;

    /// Restores unmodified dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if no hooks are installed.
    fn remove_hooks(&self) -> Result<()>;
}

/// The hook that feeds observed operations into the pool's handles.
#[derive(Debug)]
struct MonitorHook {
    pool: Arc<HandlePool>,
    record_failures: bool,
}

impl MonitorHook {
    fn record(&self, caller: Pid, op: &Operation<'_>, status: i64) {
        // A negative exit status is a signal death, not a failed operation.
        let failed = status < 0 && !matches!(op, Operation::Exit { .. });
        if failed && !self.record_failures {
            return;
        }
        let _ = self.pool.with_target(caller, |state| state.record(caller, op, status));
    }
}

impl OperationHook for MonitorHook {
    fn before(&self, caller: Pid, op: &Operation<'_>) {
        match *op {
            Operation::Exec { .. } => self.record(caller, op, 0),
            Operation::Exit { status } => {
                self.record(caller, op, i64::from(status));
                self.pool.forget(caller);
            }
            _ => {}
        }
    }

    fn after(&self, caller: Pid, op: &Operation<'_>, status: i64) {
        // A successful exec never returns to its caller, so its record was
        // written up front. A failed one did return and gets a second record
        // carrying the real error.
        if matches!(op, Operation::Exec { .. }) && status < 0 {
            self.record(caller, op, status);
            return;
        }
        if op.category().records_before() {
            return;
        }
        if matches!(op, Operation::Fork) {
            if let Ok(child) = u32::try_from(status) {
                let _ = self.pool.inherit(caller, Pid::new(child));
            }
        }
        self.record(caller, op, status);
    }
}

/// Installs and removes the monitor hook on the host.
#[derive(Debug)]
pub struct Interceptor {
    pool: Arc<HandlePool>,
    host: Arc<dyn InterceptHost>,
    record_failures: bool,
    installed: Mutex<bool>,
}

impl Interceptor {
    /// Creates an interceptor for `pool` on `host`. Nothing is hooked yet.
    #[must_use]
    pub fn new(pool: Arc<HandlePool>, host: Arc<dyn InterceptHost>, record_failures: bool) -> Self {
        Self {
            pool,
            host,
            record_failures,
            installed: Mutex::new(false),
        }
    }

    /// Registers the monitor hook for every monitored category.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if already installed, or the host's error.
    pub fn install(&self) -> Result<()> {
        let mut installed = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
        if *installed {
            return Err(FilemonError::InvalidOperation {
                message: "hooks are already installed".into(),
            });
        }
        let hook = Arc::new(MonitorHook {
            pool: Arc::clone(&self.pool),
            record_failures: self.record_failures,
        });
        self.host.install_hooks(&OperationCategory::MONITORED, hook)?;
        *installed = true;
        tracing::info!(categories = OperationCategory::MONITORED.len(), "installed operation hooks");
        Ok(())
    }

    /// Removes the hooks, provided no handle is in use.
    ///
    /// The in-use check and the removal happen under the list lock so no
    /// handle can be opened in between.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while any handle is in use, `InvalidOperation` if not
    /// installed, or the host's error.
    pub fn deinstall(&self) -> Result<()> {
        let mut installed = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
        if !*installed {
            return Err(FilemonError::InvalidOperation {
                message: "hooks are not installed".into(),
            });
        }
        let lists = self.pool.read();
        if !lists.in_use.is_empty() {
            return Err(FilemonError::Busy {
                message: format!("{} handle(s) in use", lists.in_use.len()),
            });
        }
        self.host.remove_hooks()?;
        drop(lists);
        *installed = false;
        tracing::info!("removed operation hooks");
        Ok(())
    }

    /// Whether the hooks are currently installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        *self.installed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
