//! Unified error types for the filemon workspace.
//!
//! Binding failures (`NoSuchProcess`, `ProcessExiting`, `PermissionDenied`,
//! `TargetInUse`) are reported synchronously and leave the handle as it was.
//! Per-event write failures never surface as errors at all.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::HandleId;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum FilemonError {
    /// The requested process does not exist or cannot be referenced.
    #[error("no such process: {pid}")]
    NoSuchProcess {
        /// Process identifier that failed to resolve.
        pid: u32,
    },

    /// The requested process is already exiting.
    #[error("process {pid} is exiting")]
    ProcessExiting {
        /// Process identifier of the exiting process.
        pid: u32,
    },

    /// The caller lacks debug-equivalent rights over the target.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The target process is already monitored by another handle.
    #[error("process {pid} is already monitored by handle {handle}")]
    TargetInUse {
        /// Process identifier that is already bound.
        pid: u32,
        /// Handle currently monitoring the process.
        handle: HandleId,
    },

    /// The output sink could not be opened or written at bind time.
    #[error("output sink unavailable: {message}")]
    SinkUnavailable {
        /// Description of the sink failure.
        message: String,
    },

    /// The subsystem cannot change state while handles are in use.
    #[error("resource busy: {message}")]
    Busy {
        /// Description of what is holding the subsystem.
        message: String,
    },

    /// The control request is not recognized or not valid in this state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the rejected request.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A filemon log line could not be parsed.
    #[error("parse error at line {line}: {message}")]
    Parse {
        /// One-based line number of the offending record.
        line: usize,
        /// Description of the syntax error.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FilemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_errors_name_the_pid() {
        let err = FilemonError::ProcessExiting { pid: 1234 };
        assert_eq!(err.to_string(), "process 1234 is exiting");

        let err = FilemonError::TargetInUse {
            pid: 7,
            handle: HandleId::new(2, 1),
        };
        assert!(err.to_string().contains("handle #2.1"));
    }

    #[test]
    fn serde_errors_convert() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: FilemonError = source.into();
        assert!(matches!(err, FilemonError::Serialization { .. }));
    }
}
