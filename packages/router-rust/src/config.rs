use std::sync::Arc;
use std::time::Duration;

use keyroute_core::{HashAlgorithm, HashGenerator, DEFAULT_PARTITION_COUNT};
use serde::{Deserialize, Serialize};

use crate::error::{PartitionError, Result};

/// Partitioner configuration.
///
/// Every field has a default, so host applications can embed this struct in
/// their own configuration files and only override what they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartitionerConfig {
    /// Number of partitions (lanes). Fixed for the partitioner's lifetime.
    pub partition_count: u32,
    /// Built-in hash generator used to map keys to partitions.
    pub hash_algorithm: HashAlgorithm,
    /// Seed for `HashAlgorithm::Murmur3`; ignored by other algorithms.
    pub murmur3_seed: u32,
    /// Deadline for a graceful shutdown in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
            hash_algorithm: HashAlgorithm::default(),
            murmur3_seed: 0,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl PartitionerConfig {
    /// Check the configuration without building anything.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::InvalidConfiguration` if `partition_count` is 0.
    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(PartitionError::invalid_configuration(
                "partition count must be at least 1",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn hash_generator(&self) -> Arc<dyn HashGenerator> {
        self.hash_algorithm.generator(self.murmur3_seed)
    }
}
