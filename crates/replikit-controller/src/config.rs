//! Manager configuration, read from a TOML file.
//!
//! ```toml
//! workers = 4
//! backoff_base_ms = 5
//! backoff_max_ms = 60000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, ControllerResult};
use crate::workqueue::Backoff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Concurrent reconciliations per controller.
    pub workers: usize,
    /// Delay before the first retry of a failed reconciliation.
    pub backoff_base_ms: u64,
    /// Upper bound for the retry delay.
    pub backoff_max_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            backoff_base_ms: 5,
            backoff_max_ms: 60_000,
        }
    }
}

impl ManagerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ControllerResult<()> {
        if self.workers == 0 {
            return Err(ControllerError::Config("workers must be at least 1".to_string()));
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_max_ms {
            return Err(ControllerError::Config(format!(
                "backoff_base_ms ({}) must be positive and not exceed backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}
