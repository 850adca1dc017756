//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Worker limit for concurrent reconciles of distinct primaries.
    pub max_concurrent_reconciles: usize,
    /// Retry-after for a blocked topology stage, in milliseconds.
    pub blocked_requeue_after_ms: u64,
    /// Max concurrent store writes inside one topological layer.
    pub write_parallelism: usize,
    /// Finalizer the controller puts on its primaries.
    pub finalizer: String,
    /// Log the built DAG at info instead of debug.
    pub log_dag: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            blocked_requeue_after_ms: 5000,
            write_parallelism: 1,
            finalizer: "cluster.keel.io/finalizer".to_string(),
            log_dag: false,
        }
    }
}

impl ReconcilerConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed TOML or invalid values.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                "max_concurrent_reconciles must be at least 1",
            ));
        }
        if self.write_parallelism == 0 {
            return Err(Error::invalid_config("write_parallelism must be at least 1"));
        }
        if self.finalizer.trim().is_empty() {
            return Err(Error::invalid_config("finalizer must not be empty"));
        }
        Ok(())
    }

    pub const fn blocked_requeue_after(&self) -> Duration {
        Duration::from_millis(self.blocked_requeue_after_ms)
    }
}
