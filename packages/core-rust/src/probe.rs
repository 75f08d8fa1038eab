//! Structured self-description of a partitioner and its partitions.
//!
//! Probe reports are plain data: they are produced without blocking and can be
//! serialized for diagnostics endpoints. All structs use
//! `#[serde(rename_all = "camelCase")]`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single partition lane.
///
/// State machine: Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    /// Accepting and executing work.
    Running,
    /// No longer accepting work; finishing what was already queued.
    Draining,
    /// All accepted work finished; the lane's worker has exited.
    Stopped,
}

/// Occupancy and counters for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionProbe {
    pub index: u32,
    pub state: PartitionState,
    /// Items accepted but not yet started.
    pub queued: u64,
    /// Items currently executing (0 or 1).
    pub in_flight: u64,
    /// Items whose continuation finished successfully.
    pub completed: u64,
    /// Items whose continuation failed or panicked.
    pub faulted: u64,
}

impl PartitionProbe {
    /// True when nothing is queued or executing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0
    }
}

/// Probe report for a whole partitioner, partitions in index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionerProbe {
    pub id: String,
    pub partition_count: u32,
    /// Name of the hash generator in use.
    pub hash: String,
    pub partitions: Vec<PartitionProbe>,
}

impl PartitionerProbe {
    /// Total number of items waiting across all partitions.
    #[must_use]
    pub fn total_queued(&self) -> u64 {
        self.partitions.iter().map(|p| p.queued).sum()
    }

    /// Serialize the report as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization fails, which plain probe data
    /// does not do in practice.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
