//! Partition selection for keyed work.
//!
//! The selection contract is `hash(key) % partition_count`. It is a pure
//! function of the key, the hash generator and the (fixed) partition count,
//! so routing callers never need to lock anything to pick a partition.
//!
//! - [`DEFAULT_PARTITION_COUNT`]: partition count used when none is configured
//! - [`hash_to_partition`]: reduces a hash to a partition ID in `[0, count)`
//! - [`partition_for_key`]: hashes a key and reduces it in one step

use std::num::NonZeroU32;

use crate::hash::HashGenerator;

/// Number of partitions used when a configuration does not specify one.
pub const DEFAULT_PARTITION_COUNT: u32 = 8;

/// Reduce a hash to a partition ID.
///
/// The result is always in `[0, partition_count)`.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU32;
/// use keyroute_core::partition::hash_to_partition;
///
/// let four = NonZeroU32::new(4).unwrap();
/// assert_eq!(hash_to_partition(10, four), 2);
/// assert_eq!(hash_to_partition(11, four), 3);
/// ```
#[must_use]
pub fn hash_to_partition(hash: u32, partition_count: NonZeroU32) -> u32 {
    hash % partition_count
}

/// Compute the partition ID for a key using the given generator.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU32;
/// use keyroute_core::hash::Fnv1aHashGenerator;
/// use keyroute_core::partition::partition_for_key;
///
/// let count = NonZeroU32::new(4).unwrap();
/// assert_eq!(partition_for_key(&Fnv1aHashGenerator, b"A", count), 0);
/// assert_eq!(partition_for_key(&Fnv1aHashGenerator, b"B", count), 1);
/// ```
#[must_use]
pub fn partition_for_key<H>(generator: &H, key: &[u8], partition_count: NonZeroU32) -> u32
where
    H: HashGenerator + ?Sized,
{
    hash_to_partition(generator.hash(key), partition_count)
}
