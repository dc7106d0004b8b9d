//! Handle pool: free list, in-use list, and the pid reverse lookup.
//!
//! Every list mutation happens under the list lock. When a handle's own
//! lock is also needed it is taken after the list lock, never before, so
//! open/close can not deadlock against an in-flight event write.
//!
//! Handles are recycled through the free list and only dropped when the
//! pool is drained at unload.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use filemon_common::config::FilemonConfig;
use filemon_common::error::{FilemonError, Result};
use filemon_common::types::{HandleId, Pid};

use crate::handle::{Handle, HandleState, MonitorHandle};
use crate::record::Scratch;

/// State guarded by the list lock.
#[derive(Debug, Default)]
pub(crate) struct Lists {
    pub(crate) in_use: BTreeMap<HandleId, MonitorHandle>,
    pub(crate) free: VecDeque<MonitorHandle>,
    /// Every pid currently observed, mapped to the handle observing it.
    pub(crate) targets: HashMap<Pid, MonitorHandle>,
    next_slot: u64,
}

impl Lists {
    /// Handle of the open session `id`. Ids of closed sessions are
    /// rejected even when their slot has been reopened since.
    pub(crate) fn in_use(&self, id: HandleId) -> Result<&MonitorHandle> {
        self.in_use.get(&id).ok_or_else(|| FilemonError::InvalidOperation {
            message: format!("handle {id} is not open"),
        })
    }
}

/// Pool of monitor handles.
#[derive(Debug)]
pub struct HandlePool {
    lists: RwLock<Lists>,
    path_capacity: usize,
    message_capacity: usize,
}

impl HandlePool {
    /// Creates an empty pool sized from `config`.
    #[must_use]
    pub fn new(config: &FilemonConfig) -> Self {
        Self {
            lists: RwLock::new(Lists::default()),
            path_capacity: config.path_buffer_capacity,
            message_capacity: config.message_buffer_capacity,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Lists> {
        self.lists.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Lists> {
        self.lists.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the head of the free list, or allocates a new handle, and
    /// moves it onto the in-use list owned by `owner`.
    pub fn acquire(&self, owner: Pid) -> MonitorHandle {
        let mut lists = self.write();
        let handle = if let Some(handle) = lists.free.pop_front() {
            let id = handle.renew();
            tracing::debug!(handle = %id, "recycled handle from free list");
            handle
        } else {
            lists.next_slot += 1;
            let slot = lists.next_slot;
            tracing::debug!(slot, "allocated handle");
            Arc::new(Handle::new(
                slot,
                Scratch::with_capacity(self.path_capacity, self.message_capacity),
            ))
        };
        handle.lock().set_owner(owner);
        let _ = lists.in_use.insert(handle.id(), Arc::clone(&handle));
        handle
    }

    /// Detaches the handle and appends it to the free list.
    ///
    /// Clears its process and sink bindings and every reverse lookup entry
    /// that pointed at it. The released sink is dropped after both locks
    /// are given up.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `id` is not an open session.
    pub fn release(&self, id: HandleId) -> Result<()> {
        let sink = {
            let mut lists = self.write();
            let handle = lists
                .in_use
                .remove(&id)
                .ok_or_else(|| FilemonError::InvalidOperation {
                    message: format!("handle {id} is not open"),
                })?;
            let sink = handle.lock().detach();
            lists.targets.retain(|_, target| !Arc::ptr_eq(target, &handle));
            lists.free.push_back(handle);
            sink
        };
        tracing::debug!(handle = %id, had_sink = sink.is_some(), "released handle");
        drop(sink);
        Ok(())
    }

    /// Returns an in-use handle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the handle is not in use.
    pub fn get(&self, id: HandleId) -> Result<MonitorHandle> {
        self.read().in_use(id).cloned()
    }

    /// Runs `f` on an in-use handle's state with the handle lock held.
    ///
    /// The list lock is held only while the handle lock is being taken, so
    /// the handle can not be released in between.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the handle is not in use, or whatever
    /// `f` returns.
    pub fn with_handle<R>(
        &self,
        id: HandleId,
        f: impl FnOnce(&mut HandleState) -> Result<R>,
    ) -> Result<R> {
        let lists = self.read();
        let handle = Arc::clone(lists.in_use(id)?);
        let mut state = handle.lock();
        drop(lists);
        f(&mut state)
    }

    /// Runs `f` on the state of the handle observing `pid`, if any.
    pub fn with_target<R>(&self, pid: Pid, f: impl FnOnce(&mut HandleState) -> R) -> Option<R> {
        let lists = self.read();
        let handle = Arc::clone(lists.targets.get(&pid)?);
        let mut state = handle.lock();
        drop(lists);
        Some(f(&mut state))
    }

    /// Handle observing `pid`, if any.
    #[must_use]
    pub fn handle_for(&self, pid: Pid) -> Option<HandleId> {
        self.read().targets.get(&pid).map(|handle| handle.id())
    }

    /// Registers `child` under the handle observing `parent`.
    ///
    /// Returns `false` when the parent is not observed.
    pub fn inherit(&self, parent: Pid, child: Pid) -> bool {
        let mut lists = self.write();
        let Some(handle) = lists.targets.get(&parent).cloned() else {
            return false;
        };
        tracing::trace!(parent = parent.as_raw(), child = child.as_raw(), handle = %handle.id(), "child inherits monitor");
        let _ = lists.targets.insert(child, handle);
        true
    }

    /// Removes `pid` from the reverse lookup.
    pub fn forget(&self, pid: Pid) {
        let _ = self.write().targets.remove(&pid);
    }

    /// Number of handles on the in-use list.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.read().in_use.len()
    }

    /// Number of handles on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.read().free.len()
    }

    /// Ids on the free list, head first.
    #[must_use]
    pub fn free_ids(&self) -> Vec<HandleId> {
        self.read().free.iter().map(|handle| handle.id()).collect()
    }

    /// Destroys every handle on the free list. Returns how many were freed.
    pub(crate) fn drain(&self) -> usize {
        let mut lists = self.write();
        let drained = lists.free.len();
        lists.free.clear();
        drained
    }
}
