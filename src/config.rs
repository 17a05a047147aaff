// src/config.rs

//! Pool configuration.
//!
//! The embedding application constructs a [`PoolConfig`] directly (there is
//! no config file); serde derives are provided so applications that load
//! their own configuration can embed this struct in theirs.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Configuration for a scheduling pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Global worker ceiling: the maximum number of work items executing
    /// at once across all queues. `None` means available hardware
    /// parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl PoolConfig {
    /// Config with the default worker ceiling.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: Some(workers),
        }
    }

    /// The worker ceiling that will actually be used.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(Error::InvalidConfiguration(
                "pool size must be >= 1 (got 0)".to_string(),
            ));
        }
        Ok(())
    }
}
