//! Error taxonomy for routing, lane execution and shutdown.
//!
//! Routing and configuration errors are returned synchronously from the call
//! that caused them. Work-item failures travel only through the failing
//! item's [`Completion`](crate::partition::Completion).

/// Errors produced by the partitioner and its partitions.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("invalid partitioner configuration: {reason}")]
    InvalidConfiguration { reason: String },
    #[error("partition key must be present and non-empty")]
    InvalidKey,
    #[error("shutdown aborted while partitions {partitions:?} were still draining")]
    ShutdownAborted { partitions: Vec<u32> },
    #[error("work item failed: {0}")]
    WorkItemFailure(#[source] anyhow::Error),
    #[error("partition {index} is closed")]
    PartitionClosed { index: u32 },
}

impl PartitionError {
    pub(crate) fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// True for errors raised before the item reached a partition.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. } | Self::InvalidKey | Self::PartitionClosed { .. }
        )
    }
}

pub type Result<T, E = PartitionError> = std::result::Result<T, E>;
