//! In-process operation dispatch.
//!
//! [`Dispatcher`] is an [`InterceptHost`] for code that routes its own
//! operations through it: every call to [`Dispatcher::dispatch`] runs the
//! installed hook around the real operation and hands the real result back
//! untouched.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, PoisonError, RwLock};

use filemon_common::error::{FilemonError, Result};
use filemon_common::types::Pid;

use crate::intercept::{InterceptHost, OperationCategory, OperationHook};
use crate::record::Operation;

/// Numeric status a successful operation reports to hooks.
pub trait Outcome {
    /// Status logged for this result.
    fn status(&self) -> i64;
}

impl Outcome for () {
    fn status(&self) -> i64 {
        0
    }
}

impl Outcome for File {
    #[cfg(unix)]
    fn status(&self) -> i64 {
        use std::os::fd::AsRawFd;
        i64::from(self.as_raw_fd())
    }

    #[cfg(not(unix))]
    fn status(&self) -> i64 {
        0
    }
}

impl Outcome for Child {
    fn status(&self) -> i64 {
        i64::from(self.id())
    }
}

impl Outcome for ExitStatus {
    fn status(&self) -> i64 {
        i64::from(self.code().unwrap_or(-1))
    }
}

/// Status reported for a dispatched result: the outcome on success, the
/// negated errno on failure.
pub fn status_of<T: Outcome>(result: &io::Result<T>) -> i64 {
    match result {
        Ok(value) => value.status(),
        Err(e) => -i64::from(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

#[derive(Debug)]
struct Installed {
    categories: HashSet<OperationCategory>,
    hook: Arc<dyn OperationHook>,
}

/// Dispatch point that runs installed hooks around real operations.
#[derive(Debug, Default)]
pub struct Dispatcher {
    installed: RwLock<Option<Installed>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether hooks are installed.
    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn hook_for(&self, category: OperationCategory) -> Option<Arc<dyn OperationHook>> {
        let installed = self.installed.read().unwrap_or_else(PoisonError::into_inner);
        installed
            .as_ref()
            .filter(|installed| installed.categories.contains(&category))
            .map(|installed| Arc::clone(&installed.hook))
    }

    /// Runs `real` on behalf of `caller`, with the hook (if any) observing.
    ///
    /// # Errors
    ///
    /// Returns exactly what `real` returns.
    pub fn dispatch<T: Outcome>(
        &self,
        caller: Pid,
        op: &Operation<'_>,
        real: impl FnOnce() -> io::Result<T>,
    ) -> io::Result<T> {
        let Some(hook) = self.hook_for(op.category()) else {
            return real();
        };
        hook.before(caller, op);
        let result = real();
        hook.after(caller, op, status_of(&result));
        result
    }
}

impl InterceptHost for Dispatcher {
    fn install_hooks(
        &self,
        categories: &[OperationCategory],
        hook: Arc<dyn OperationHook>,
    ) -> Result<()> {
        let mut installed = self.installed.write().unwrap_or_else(PoisonError::into_inner);
        if installed.is_some() {
            return Err(FilemonError::Busy {
                message: "dispatcher already has hooks installed".into(),
            });
        }
        *installed = Some(Installed {
            categories: categories.iter().copied().collect(),
            hook,
        });
        Ok(())
    }

    fn remove_hooks(&self) -> Result<()> {
        let mut installed = self.installed.write().unwrap_or_else(PoisonError::into_inner);
        if installed.take().is_none() {
            return Err(FilemonError::InvalidOperation {
                message: "dispatcher has no hooks installed".into(),
            });
        }
        Ok(())
    }
}
