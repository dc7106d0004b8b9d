//! Subsystem lifecycle and the control surface.
//!
//! [`Filemon`] owns the handle pool, the attachment registry and the
//! interceptor. Callers talk to it through handle ids only, so a closed
//! handle can never be reached again through a stale reference.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filemon_common::config::FilemonConfig;
use filemon_common::error::{FilemonError, Result};
use filemon_common::types::{HandleId, Pid};

use crate::attach::AttachmentRegistry;
use crate::intercept::{InterceptHost, Interceptor};
use crate::pool::HandlePool;
use crate::process::ProcessResolver;
use crate::sink::OutputSink;

/// Lifecycle state of the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Nothing installed.
    Unloaded,
    /// Pool built, hooks not yet installed.
    Loaded,
    /// Hooks installed, handles may be opened.
    Active,
    /// Unload in progress; new opens are refused.
    Draining,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loaded => write!(f, "loaded"),
            Self::Active => write!(f, "active"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

/// Control request on an open handle.
#[derive(Debug)]
pub enum ControlRequest {
    /// Bind an output sink.
    SetOutput(Box<dyn OutputSink>),
    /// Bind the target process.
    SetTarget(Pid),
    /// Any other request code.
    Unknown(u32),
}

/// Snapshot of a handle's bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bindings {
    /// Bound target process.
    pub process: Option<Pid>,
    /// Whether an output sink is bound.
    pub has_sink: bool,
}

/// The filemon subsystem.
#[derive(Debug)]
pub struct Filemon {
    config: FilemonConfig,
    state: Mutex<LifecycleState>,
    pool: Arc<HandlePool>,
    registry: AttachmentRegistry,
    interceptor: Interceptor,
}

impl Filemon {
    /// Builds the pool and installs hooks on `host`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `config` is invalid, or the host's install
    /// error.
    pub fn load(
        config: FilemonConfig,
        host: Arc<dyn InterceptHost>,
        resolver: Arc<dyn ProcessResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(HandlePool::new(&config));
        let filemon = Self {
            registry: AttachmentRegistry::new(Arc::clone(&pool), resolver),
            interceptor: Interceptor::new(Arc::clone(&pool), host, config.record_failures),
            state: Mutex::new(LifecycleState::Loaded),
            pool,
            config,
        };
        filemon.interceptor.install()?;
        *filemon.lock_state() = LifecycleState::Active;
        tracing::info!(device = %filemon.config.device_name, "filemon loaded");
        Ok(filemon)
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// Configuration the subsystem was loaded with.
    #[must_use]
    pub const fn config(&self) -> &FilemonConfig {
        &self.config
    }

    /// The handle pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<HandlePool> {
        &self.pool
    }

    /// Opens a handle owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless the subsystem is active.
    pub fn open(&self, owner: Pid) -> Result<HandleId> {
        let state = self.lock_state();
        if *state != LifecycleState::Active {
            return Err(FilemonError::InvalidOperation {
                message: format!("filemon is {}", *state),
            });
        }
        let id = self.pool.acquire(owner).id();
        drop(state);
        tracing::info!(handle = %id, owner = owner.as_raw(), "opened handle");
        Ok(id)
    }

    /// Binds an output sink, returning the one it replaces.
    ///
    /// # Errors
    ///
    /// See [`AttachmentRegistry::bind_sink`].
    pub fn set_output(
        &self,
        id: HandleId,
        sink: Box<dyn OutputSink>,
    ) -> Result<Option<Box<dyn OutputSink>>> {
        self.registry.bind_sink(id, sink)
    }

    /// Binds the target process.
    ///
    /// # Errors
    ///
    /// See [`AttachmentRegistry::bind_process`].
    pub fn set_target(&self, id: HandleId, pid: Pid) -> Result<()> {
        let _ = self.registry.bind_process(id, pid)?;
        Ok(())
    }

    /// Detaches the handle and returns it to the free list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the handle is not open.
    pub fn close(&self, id: HandleId) -> Result<()> {
        self.pool.release(id)?;
        tracing::info!(handle = %id, "closed handle");
        Ok(())
    }

    /// Dispatches a control request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for unknown requests, or the error of the
    /// requested operation.
    pub fn control(&self, id: HandleId, request: ControlRequest) -> Result<()> {
        match request {
            ControlRequest::SetOutput(sink) => self.set_output(id, sink).map(drop),
            ControlRequest::SetTarget(pid) => self.set_target(id, pid),
            ControlRequest::Unknown(code) => Err(FilemonError::InvalidOperation {
                message: format!("unknown control request {code:#x} on handle {id}"),
            }),
        }
    }

    /// Current bindings of an open handle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the handle is not open.
    pub fn bindings(&self, id: HandleId) -> Result<Bindings> {
        self.pool.with_handle(id, |state| {
            Ok(Bindings {
                process: state.process().map(|process| process.pid),
                has_sink: state.has_sink(),
            })
        })
    }

    /// Unloads the subsystem.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while any handle is open (the subsystem stays active),
    /// `InvalidOperation` if not active, or the host's removal error.
    pub fn unload(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state != LifecycleState::Active {
            return Err(FilemonError::InvalidOperation {
                message: format!("can not unload while {}", *state),
            });
        }
        *state = LifecycleState::Draining;
        if let Err(e) = self.interceptor.deinstall() {
            *state = LifecycleState::Active;
            tracing::warn!(error = %e, "unload refused");
            return Err(e);
        }
        let drained = self.pool.drain();
        *state = LifecycleState::Unloaded;
        tracing::info!(drained, "filemon unloaded");
        Ok(())
    }

    /// Quiesce request. Always refused.
    ///
    /// # Errors
    ///
    /// Always returns `Busy`.
    pub fn quiesce(&self) -> Result<()> {
        Err(FilemonError::Busy {
            message: format!("{} does not support quiesce", self.config.device_name),
        })
    }

    /// Shutdown notification. Nothing to do.
    pub fn shutdown(&self) {
        tracing::debug!(state = %self.state(), "shutdown notification");
    }
}
