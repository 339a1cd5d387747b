//! Run configuration model.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KubetraceError, Result};

/// Configuration consulted by the container manager for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubetraceConfig {
    /// Publish the matching container population as a data source.
    pub enable_containers_datasource: bool,
    /// Capacity of each subscriber's event queue.
    pub event_buffer: usize,
}

impl Default for KubetraceConfig {
    fn default() -> Self {
        Self {
            enable_containers_datasource: false,
            event_buffer: crate::constants::DEFAULT_EVENT_BUFFER,
        }
    }
}

impl KubetraceConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or sets a zero-sized event buffer.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KubetraceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration values are usable.
    ///
    /// # Errors
    ///
    /// Returns an error if `event_buffer` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(KubetraceError::Config {
                message: "event_buffer must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
