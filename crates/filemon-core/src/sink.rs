//! Output sinks that event records are appended to.
//!
//! A sink is owned by exactly one monitor handle while bound. Any
//! `Write + Send` type is a sink; [`MemorySink`] keeps records in memory
//! and can be cloned so the caller keeps a view of what was written.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use filemon_common::error::{FilemonError, Result};

/// Writable destination for formatted records.
pub trait OutputSink: Send + fmt::Debug {
    /// Appends one complete record.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error. Callers on the event path drop it.
    fn append(&mut self, record: &[u8]) -> io::Result<()>;
}

impl<W: Write + Send + fmt::Debug> OutputSink for W {
    fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.write_all(record)?;
        self.flush()
    }
}

/// Creates (or truncates) the log file at `path`.
///
/// # Errors
///
/// Returns `SinkUnavailable` if the file cannot be created.
pub fn create_file(path: &Path) -> Result<Box<dyn OutputSink>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| FilemonError::SinkUnavailable {
            message: format!("{}: {e}", path.display()),
        })?;
    tracing::debug!(path = %path.display(), "opened output sink");
    Ok(Box::new(file))
}

/// In-memory sink shared between the handle and the caller.
///
/// Every `write` call appends its whole buffer under one lock, so a record
/// is never split by a concurrent writer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Returns the written lines without their terminators.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
