//! Domain primitive types used across the filemon workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process identifier as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(u32);

impl Pid {
    /// Creates a pid from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the pid of the calling process.
    #[must_use]
    pub fn current() -> Self {
        Self(std::process::id())
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Identifier of one open session on a monitor handle.
///
/// The slot names the pooled handle object and survives recycling. The
/// generation is bumped every time the handle is reopened, so an id held
/// from an earlier session never matches the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleId {
    slot: u64,
    generation: u64,
}

impl HandleId {
    /// Creates a handle id from its slot and session generation.
    #[must_use]
    pub const fn new(slot: u64, generation: u64) -> Self {
        Self { slot, generation }
    }

    /// Pooled handle this session runs on.
    #[must_use]
    pub const fn slot(self) -> u64 {
        self.slot
    }

    /// Session counter of the slot.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Single-letter tag identifying the category of a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// Working directory change.
    Chdir,
    /// File removal.
    Unlink,
    /// Program execution.
    Exec,
    /// Process creation.
    Fork,
    /// Hard or symbolic link creation.
    Link,
    /// Rename (move).
    Rename,
    /// File opened read-only.
    Read,
    /// File opened for writing or created.
    Write,
    /// Process exit.
    Exit,
}

impl OpCode {
    /// Every op-code, in log-letter order.
    pub const ALL: [Self; 9] = [
        Self::Chdir,
        Self::Unlink,
        Self::Exec,
        Self::Fork,
        Self::Link,
        Self::Rename,
        Self::Read,
        Self::Write,
        Self::Exit,
    ];

    /// Returns the letter written to the log.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Chdir => 'C',
            Self::Unlink => 'D',
            Self::Exec => 'E',
            Self::Fork => 'F',
            Self::Link => 'L',
            Self::Rename => 'M',
            Self::Read => 'R',
            Self::Write => 'W',
            Self::Exit => 'X',
        }
    }

    /// Maps a log letter back to its op-code.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'C' => Some(Self::Chdir),
            'D' => Some(Self::Unlink),
            'E' => Some(Self::Exec),
            'F' => Some(Self::Fork),
            'L' => Some(Self::Link),
            'M' => Some(Self::Rename),
            'R' => Some(Self::Read),
            'W' => Some(Self::Write),
            'X' => Some(Self::Exit),
            _ => None,
        }
    }

    /// Whether the record carries two quoted paths instead of one bare path.
    #[must_use]
    pub const fn has_path_pair(self) -> bool {
        matches!(self, Self::Link | Self::Rename)
    }

    /// Whether the record carries no path at all.
    #[must_use]
    pub const fn is_pathless(self) -> bool {
        matches!(self, Self::Fork | Self::Exit)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
