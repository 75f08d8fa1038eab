//! Hash generators for partition key routing.
//!
//! A [`HashGenerator`] maps an arbitrary byte key to a `u32`. The only
//! contract is determinism: identical input always yields identical output.
//! Distribution quality affects load balance across partitions, never
//! routing correctness.
//!
//! Two generators are provided:
//!
//! - [`Fnv1aHashGenerator`]: 32-bit FNV-1a (the default)
//! - [`Murmur3HashGenerator`]: 32-bit `MurmurHash3` (x86 variant), seeded

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

const MURMUR_C1: u32 = 0xcc9e_2d51;
const MURMUR_C2: u32 = 0x1b87_3593;

// ---------------------------------------------------------------------------
// HashGenerator trait
// ---------------------------------------------------------------------------

/// Pure, deterministic mapping from a byte key to an unsigned hash.
///
/// Implementations must be stateless with respect to hashing: they are shared
/// across every routing caller without synchronization.
pub trait HashGenerator: Send + Sync {
    /// Hash the given key.
    fn hash(&self, key: &[u8]) -> u32;

    /// Short name reported in partitioner probes.
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<H: HashGenerator + ?Sized> HashGenerator for Arc<H> {
    fn hash(&self, key: &[u8]) -> u32 {
        (**self).hash(key)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

// ---------------------------------------------------------------------------
// FNV-1a
// ---------------------------------------------------------------------------

/// Computes a 32-bit FNV-1a hash over raw bytes.
///
/// # Examples
///
/// ```
/// use keyroute_core::hash::fnv1a_hash;
///
/// assert_eq!(fnv1a_hash(b"hello"), 1_335_831_723);
/// assert_eq!(fnv1a_hash(b""), 2_166_136_261); // FNV offset basis
/// ```
#[must_use]
pub fn fnv1a_hash(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in key {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// [`HashGenerator`] backed by [`fnv1a_hash`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1aHashGenerator;

impl HashGenerator for Fnv1aHashGenerator {
    fn hash(&self, key: &[u8]) -> u32 {
        fnv1a_hash(key)
    }

    fn name(&self) -> &'static str {
        "fnv1a"
    }
}

// ---------------------------------------------------------------------------
// MurmurHash3
// ---------------------------------------------------------------------------

/// Computes the 32-bit x86 `MurmurHash3` of `key` with the given seed.
///
/// # Examples
///
/// ```
/// use keyroute_core::hash::murmur3_hash;
///
/// assert_eq!(murmur3_hash(b"", 0), 0);
/// assert_eq!(murmur3_hash(b"hello", 0), 613_153_351);
/// ```
#[must_use]
pub fn murmur3_hash(key: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut blocks = key.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= murmur_scramble(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, &byte) in tail.iter().enumerate() {
            k |= u32::from(byte) << (8 * i);
        }
        h ^= murmur_scramble(k);
    }

    // Length is mixed in modulo 2^32, matching the reference algorithm.
    #[allow(clippy::cast_possible_truncation)]
    let len = key.len() as u32;
    h ^= len;
    fmix32(h)
}

#[inline]
fn murmur_scramble(k: u32) -> u32 {
    k.wrapping_mul(MURMUR_C1)
        .rotate_left(15)
        .wrapping_mul(MURMUR_C2)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// [`HashGenerator`] backed by [`murmur3_hash`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3HashGenerator {
    seed: u32,
}

impl Murmur3HashGenerator {
    /// Creates a generator using the given seed.
    #[must_use]
    pub fn with_seed(seed: u32) -> Self {
        Self { seed }
    }

    /// Returns the seed mixed into every hash.
    #[must_use]
    pub fn seed(&self) -> u32 {
        self.seed
    }
}

impl HashGenerator for Murmur3HashGenerator {
    fn hash(&self, key: &[u8]) -> u32 {
        murmur3_hash(key, self.seed)
    }

    fn name(&self) -> &'static str {
        "murmur3"
    }
}

// ---------------------------------------------------------------------------
// HashAlgorithm
// ---------------------------------------------------------------------------

/// Named selection of a built-in [`HashGenerator`], used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Fnv1a,
    Murmur3,
}

impl HashAlgorithm {
    /// Builds the generator for this algorithm. `seed` is only used by `Murmur3`.
    #[must_use]
    pub fn generator(self, seed: u32) -> Arc<dyn HashGenerator> {
        match self {
            Self::Fnv1a => Arc::new(Fnv1aHashGenerator),
            Self::Murmur3 => Arc::new(Murmur3HashGenerator::with_seed(seed)),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fnv1a => "fnv1a",
            Self::Murmur3 => "murmur3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fnv1a" | "fnv" => Ok(Self::Fnv1a),
            "murmur3" | "murmur" => Ok(Self::Murmur3),
            other => Err(anyhow::anyhow!("unknown hash algorithm: {other}")),
        }
    }
}
