//! Attachment registry: binds handles to a target process and a sink.

use std::sync::Arc;

use filemon_common::error::{FilemonError, Result};
use filemon_common::types::{HandleId, Pid};

use crate::pool::{HandlePool, Lists};
use crate::process::{ProcessRef, ProcessResolver};
use crate::sink::OutputSink;

/// Binds in-use handles to processes and output sinks.
#[derive(Debug)]
pub struct AttachmentRegistry {
    pool: Arc<HandlePool>,
    resolver: Arc<dyn ProcessResolver>,
}

impl AttachmentRegistry {
    /// Creates a registry over `pool`, resolving pids through `resolver`.
    #[must_use]
    pub fn new(pool: Arc<HandlePool>, resolver: Arc<dyn ProcessResolver>) -> Self {
        Self { pool, resolver }
    }

    /// Binds the handle to the live process `pid`.
    ///
    /// The pid is resolved without holding any pool lock. Registration then
    /// re-checks the handle and the reverse table under the list lock and
    /// the handle lock, so a failed bind leaves the handle untouched.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchProcess`, `ProcessExiting` or `PermissionDenied` from
    /// the resolver, `TargetInUse` if another handle already observes `pid`,
    /// and `InvalidOperation` if the handle is not open or already bound.
    pub fn bind_process(&self, id: HandleId, pid: Pid) -> Result<ProcessRef> {
        Self::check_bindable(&self.pool.read(), id, pid)?;
        let process = self.resolver.resolve(pid)?;

        let mut lists = self.pool.write();
        Self::check_bindable(&lists, id, pid)?;
        let handle = Arc::clone(lists.in_use(id)?);
        handle.lock().set_process(process.clone());
        let _ = lists.targets.insert(pid, handle);
        tracing::info!(handle = %id, pid = pid.as_raw(), "bound target process");
        Ok(process)
    }

    fn check_bindable(lists: &Lists, id: HandleId, pid: Pid) -> Result<()> {
        let handle = lists.in_use(id)?;
        if let Some(bound) = handle.lock().process() {
            return Err(FilemonError::InvalidOperation {
                message: format!("handle {id} is already bound to pid {}", bound.pid),
            });
        }
        if let Some(other) = lists.targets.get(&pid) {
            return Err(FilemonError::TargetInUse {
                pid: pid.as_raw(),
                handle: other.id(),
            });
        }
        Ok(())
    }

    /// Replaces the handle's sink and writes the session header to it.
    ///
    /// Returns the previously bound sink, if any, so the caller can reuse
    /// it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the handle is not open, and
    /// `SinkUnavailable` if the header can not be written. In that case the
    /// new sink is dropped and the handle is left without one.
    pub fn bind_sink(
        &self,
        id: HandleId,
        sink: Box<dyn OutputSink>,
    ) -> Result<Option<Box<dyn OutputSink>>> {
        self.pool.with_handle(id, |state| {
            let previous = state.replace_sink(Some(sink));
            if let Err(e) = state.write_header() {
                let _ = state.replace_sink(None);
                return Err(FilemonError::SinkUnavailable {
                    message: format!("header write failed: {e}"),
                });
            }
            tracing::info!(handle = %id, replaced = previous.is_some(), "bound output sink");
            Ok(previous)
        })
    }
}
