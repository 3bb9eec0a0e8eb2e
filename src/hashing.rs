//! Hash Addressing: turns a caller key into a fixed-width binary address
//! (the *hash sequence*) and compares such addresses on their low-order bits.
//!
//! Splitting a bucket looks at the next-higher bit of a record's hash
//! sequence; doubling the directory extends addressing by one more bit.
//! Both operations read bits from the low (least-significant) end, which is
//! why every comparison here is phrased as "low N bits", not "high N bits".

use bitvec::prelude::*;
use highway::{HighwayHash, HighwayHasher, Key};

/// A `D`-bit binary address derived from a key's hash value.
///
/// Internally this is just the low `D` bits of a 64-bit hash, but it is
/// wrapped in its own type so callers never confuse a hash sequence with a
/// raw hash value or a bucket offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSeq {
    bits: BitArray<[u8; 8], Lsb0>,
}

impl HashSeq {
    /// Builds a hash sequence from a raw 64-bit hash value.
    pub fn from_u64(hash: u64) -> Self {
        HashSeq {
            bits: BitArray::new(hash.to_le_bytes()),
        }
    }

    /// The bit at position `i`, counting from the least-significant bit.
    pub fn bit(&self, i: u32) -> bool {
        self.bits[i as usize]
    }

    /// Compares the low `local_depth` bits of two sequences.
    pub fn low_bits_equal(&self, other: &HashSeq, local_depth: u32) -> bool {
        if local_depth == 0 {
            return true;
        }
        (0..local_depth).all(|i| self.bit(i) == other.bit(i))
    }

    /// Low `local_depth` bits, packed into a `u64` (bit 0 of the result is
    /// bit 0 of the sequence). Used for dense directory indexing.
    pub fn low_bits(&self, local_depth: u32) -> u64 {
        if local_depth == 0 {
            return 0;
        }
        self.as_u64() & ((1u64 << local_depth) - 1)
    }

    /// The underlying 64-bit value.
    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.bits.into_inner())
    }

    /// Renders the sequence as `width` ASCII `'0'`/`'1'` characters,
    /// most-significant bit first, matching the on-disk convention of §6.
    pub fn to_msb_string(&self, width: u32) -> String {
        (0..width)
            .rev()
            .map(|i| if self.bit(i) { '1' } else { '0' })
            .collect()
    }
}

/// Produces the unsigned hash value used to derive a key's [`HashSeq`].
///
/// The core never hashes for cryptographic purposes (a Non-goal), only for
/// distribution, so a keyed non-cryptographic hash is the default and a
/// caller-supplied implementation may always replace it.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &[u8]) -> u64;
}

/// Default hasher: HighwayHash keyed at construction time.
///
/// HighwayHash is fast, well-distributed, and not seeded from any global
/// state, so two indexes built with different keys will not agree on
/// bucket placement even for identical inputs - callers that need
/// reproducible placement across processes should supply their own
/// `KeyHasher` with a fixed key.
pub struct HighwayKeyHasher {
    key: Key,
}

impl HighwayKeyHasher {
    pub fn new(key: [u64; 4]) -> Self {
        HighwayKeyHasher { key: Key(key) }
    }
}

impl Default for HighwayKeyHasher {
    fn default() -> Self {
        // Fixed, arbitrary key. Not a secret - HighwayHash is used here for
        // distribution quality, not as a MAC.
        HighwayKeyHasher::new([0x5350_4c49_5458, 0x4558_5448, 0x4e44_4942_4c45, 0x4841_5348])
    }
}

impl KeyHasher for HighwayKeyHasher {
    fn hash(&self, key: &[u8]) -> u64 {
        let hasher = HighwayHasher::new(self.key);
        hasher.hash64(key)
    }
}

/// Compares two stored keys for equality (§6's "key-equality callable").
///
/// Search and remove never compare raw key bytes directly - every
/// comparison goes through this trait, so a caller whose key encoding has
/// more than one valid byte representation for the same logical key (a
/// normalized string, a big integer with leading zero bytes) can still get
/// correct matching without re-encoding every key up front.
pub trait KeyEq: Send + Sync {
    fn eq(&self, a: &[u8], b: &[u8]) -> bool;
}

/// Default equality: exact byte-for-byte comparison.
pub struct ByteKeyEq;

impl KeyEq for ByteKeyEq {
    fn eq(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}
