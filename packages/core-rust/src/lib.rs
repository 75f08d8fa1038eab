//! `keyroute` core: hash generators, partition selection and probe reports.
//!
//! Everything here is runtime-free and deterministic. The execution side
//! (lanes, router, shutdown) lives in `keyroute-router`.

pub mod hash;
pub mod partition;
pub mod probe;

pub use hash::{
    fnv1a_hash, murmur3_hash, Fnv1aHashGenerator, HashAlgorithm, HashGenerator,
    Murmur3HashGenerator,
};
pub use partition::{hash_to_partition, partition_for_key, DEFAULT_PARTITION_COUNT};
pub use probe::{PartitionProbe, PartitionState, PartitionerProbe};
