//! System-wide constants and defaults.

/// Version of the log format written in every header.
pub const FILEMON_VERSION: u32 = 4;

/// Name of the control entry point exposed by the subsystem.
pub const DEVICE_NAME: &str = "filemon";

/// Initial capacity of each per-handle scratch path buffer.
///
/// Buffers grow past this when a longer path shows up and keep the
/// larger allocation for later events.
pub const PATH_BUFFER_CAPACITY: usize = 1024;

/// Initial capacity of the per-handle message buffer.
pub const MESSAGE_BUFFER_CAPACITY: usize = 1024;

/// Application name used in CLI output.
pub const APP_NAME: &str = "filemon";

/// Environment variable that overrides the configuration file path.
pub const CONFIG_ENV: &str = "FILEMON_CONFIG";
