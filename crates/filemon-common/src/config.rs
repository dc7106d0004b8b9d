//! Global configuration model for the filemon subsystem.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FilemonError, Result};

/// Root configuration for a filemon instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilemonConfig {
    /// Name of the control entry point.
    pub device_name: String,
    /// Initial capacity of each scratch path buffer.
    pub path_buffer_capacity: usize,
    /// Initial capacity of the message buffer.
    pub message_buffer_capacity: usize,
    /// Whether operations that failed are still recorded.
    pub record_failures: bool,
}

impl Default for FilemonConfig {
    fn default() -> Self {
        Self {
            device_name: crate::constants::DEVICE_NAME.to_string(),
            path_buffer_capacity: crate::constants::PATH_BUFFER_CAPACITY,
            message_buffer_capacity: crate::constants::MESSAGE_BUFFER_CAPACITY,
            record_failures: true,
        }
    }
}

impl FilemonConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FilemonError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(FilemonError::Config {
                message: "device_name must not be empty".into(),
            });
        }
        if self.message_buffer_capacity == 0 {
            return Err(FilemonError::Config {
                message: "message_buffer_capacity must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FilemonConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.record_failures);
        assert_eq!(config.device_name, "filemon");
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("filemon.json");
        std::fs::write(&path, r#"{ "record_failures": false }"#).expect("write");

        let config = FilemonConfig::load(&path).expect("load");
        assert!(!config.record_failures);
        assert_eq!(config.path_buffer_capacity, crate::constants::PATH_BUFFER_CAPACITY);
    }

    #[test]
    fn load_rejects_empty_device_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("filemon.json");
        std::fs::write(&path, r#"{ "device_name": "  " }"#).expect("write");

        let err = FilemonConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("device_name"), "got: {err}");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = FilemonConfig::load(Path::new("/nonexistent/filemon.json")).unwrap_err();
        assert!(matches!(err, FilemonError::Io { .. }));
    }
}
