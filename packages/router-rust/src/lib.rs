//! `keyroute` router: key-partitioned sequential execution on tokio.
//!
//! Items are routed by `hash(key) % partition_count` to one of a fixed set of
//! lanes. Items sharing a key run one at a time in submission order; items on
//! different lanes run in parallel.
//!
//! - [`partition`]: the lane primitive and its [`Completion`] signal
//! - [`partitioner`]: routing, typed fronts, probe and coordinated shutdown
//! - [`service`]: Tower layer running an inner service behind a partitioner
//! - [`config`]: partitioner configuration

pub mod config;
pub mod error;
pub mod partition;
pub mod partitioner;
pub mod service;

pub use config::PartitionerConfig;
pub use error::{PartitionError, Result};
pub use keyroute_core::{
    Fnv1aHashGenerator, HashAlgorithm, HashGenerator, Murmur3HashGenerator, PartitionProbe,
    PartitionState, PartitionerProbe,
};
pub use partition::{Completion, Partition};
pub use partitioner::{PartitionKeyProvider, Partitioner, TypedPartitioner};
pub use service::{PartitionLayer, PartitionService};
pub use tokio_util::sync::CancellationToken;
