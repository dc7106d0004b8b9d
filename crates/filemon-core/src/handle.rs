//! Monitor handles: one attach of the subsystem to a target and a sink.
//!
//! A handle's bindings and scratch buffers sit behind its own lock. Code
//! that also needs the pool's list lock must take the list lock first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use filemon_common::types::{HandleId, Pid};

use crate::process::ProcessRef;
use crate::record::{Operation, Scratch};
use crate::sink::OutputSink;

/// Shared reference to a pooled handle.
pub type MonitorHandle = Arc<Handle>;

/// A pooled monitor handle.
#[derive(Debug)]
pub struct Handle {
    slot: u64,
    /// Bumped under the list write lock each time the handle is reopened.
    generation: AtomicU64,
    state: Mutex<HandleState>,
}

/// Mutable part of a handle, guarded by the handle lock.
#[derive(Debug)]
pub struct HandleState {
    owner: Option<Pid>,
    process: Option<ProcessRef>,
    sink: Option<Box<dyn OutputSink>>,
    scratch: Scratch,
}

impl Handle {
    pub(crate) fn new(slot: u64, scratch: Scratch) -> Self {
        Self {
            slot,
            generation: AtomicU64::new(1),
            state: Mutex::new(HandleState {
                owner: None,
                process: None,
                sink: None,
                scratch,
            }),
        }
    }

    /// Id of the current (or most recent) session on this handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        HandleId::new(self.slot, self.generation.load(Ordering::Acquire))
    }

    /// Pool slot of this handle, stable across recycling.
    #[must_use]
    pub const fn slot(&self) -> u64 {
        self.slot
    }

    /// Starts a new session on a recycled handle and returns its id.
    pub(crate) fn renew(&self) -> HandleId {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        HandleId::new(self.slot, generation)
    }

    /// Takes the handle lock.
    pub fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandleState {
    /// Process that opened the handle.
    #[must_use]
    pub const fn owner(&self) -> Option<Pid> {
        self.owner
    }

    /// Bound target process, if any.
    #[must_use]
    pub const fn process(&self) -> Option<&ProcessRef> {
        self.process.as_ref()
    }

    /// Whether an output sink is bound.
    #[must_use]
    pub const fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn set_owner(&mut self, owner: Pid) {
        self.owner = Some(owner);
    }

    pub(crate) fn set_process(&mut self, process: ProcessRef) {
        self.process = Some(process);
    }

    pub(crate) fn replace_sink(
        &mut self,
        sink: Option<Box<dyn OutputSink>>,
    ) -> Option<Box<dyn OutputSink>> {
        std::mem::replace(&mut self.sink, sink)
    }

    /// Clears every binding, returning the sink so it can be dropped
    /// outside the locks.
    pub(crate) fn detach(&mut self) -> Option<Box<dyn OutputSink>> {
        self.owner = None;
        self.process = None;
        self.sink.take()
    }

    /// Writes the session header to the bound sink.
    pub(crate) fn write_header(&mut self) -> std::io::Result<()> {
        let target = self
            .process
            .as_ref()
            .map(|process| process.pid)
            .or(self.owner)
            .unwrap_or_else(Pid::current);
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let header = self.scratch.format_header(target, Utc::now());
        sink.append(header.as_bytes())
    }

    /// Formats and appends one event. Failures are dropped.
    pub(crate) fn record(&mut self, pid: Pid, op: &Operation<'_>, status: i64) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let line = self.scratch.format_event(pid, op, status);
        if let Err(e) = sink.append(line.as_bytes()) {
            tracing::trace!(pid = pid.as_raw(), op = %op.op_code(), error = %e, "dropped event");
        }
    }
}
