//! Construction-time configuration (§4.4, §7): everything the facade needs
//! to know before it opens a single file, validated once up front so that
//! `open`/`insert`/`search` never have to fail on a parameter mismatch
//! mid-operation.

use std::sync::Arc;

use crate::error::{EhashError, Result};
use crate::hashing::{ByteKeyEq, HighwayKeyHasher, KeyEq, KeyHasher};

/// Minimum bytes of bucket-block overhead (size + local_depth + next) that
/// must fit alongside at least one record slot.
const BUCKET_OVERHEAD: usize = crate::bucket::BUCKET_HEADER_LEN + crate::bucket::BUCKET_TRAILER_LEN;

/// Configuration for an [`crate::index::EhashIndex`].
///
/// Construct with [`EhashConfig::new`], which validates every field and
/// returns [`EhashError::InvalidConfiguration`] on the first problem found
/// rather than letting a bad value surface later as an obscure I/O failure.
pub struct EhashConfig {
    /// `D`: the hard ceiling on global depth, and hence on directory size
    /// (`2^D` entries) and on the number of distinct buckets addressable
    /// without chaining.
    pub global_depth_max: u32,

    /// `B`: bucket block size in bytes, as written to and read from the
    /// hash file.
    pub block_size: usize,

    /// Fixed width, in bytes, of every stored key.
    pub key_width: usize,

    /// When `true`, `insert` rejects a key already present anywhere in the
    /// reachable bucket/chain (§4.4, primary-key mode). When `false`,
    /// `insert` always appends, permitting duplicates.
    pub primary_key_mode: bool,

    /// Hashes a key into the 64-bit value a [`crate::hashing::HashSeq`] is
    /// derived from. Defaults to a fixed-key `HighwayKeyHasher`.
    pub key_hasher: Arc<dyn KeyHasher>,

    /// Compares two stored keys for equality. Defaults to exact byte
    /// comparison; every `search`/`insert`/`remove` match goes through this
    /// rather than a hardcoded `==` (§6's "key-equality callable").
    pub key_equal: Arc<dyn KeyEq>,

    /// Hard cap on the number of blocks in a single overflow chain before
    /// `insert` gives up with [`EhashError::CapacityExhausted`]. `None`
    /// means unbounded.
    pub max_chain_length: Option<u32>,
}

impl EhashConfig {
    pub fn new(global_depth_max: u32, block_size: usize, key_width: usize) -> Result<Self> {
        let config = EhashConfig {
            global_depth_max,
            block_size,
            key_width,
            primary_key_mode: true,
            key_hasher: Arc::new(HighwayKeyHasher::default()),
            key_equal: Arc::new(ByteKeyEq),
            max_chain_length: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// `EhashConfig::new` with the construction defaults named in the
    /// specification's construction-parameter table: `D = 32`, `B = 1024`.
    pub fn with_defaults(key_width: usize) -> Result<Self> {
        Self::new(32, 1024, key_width)
    }

    pub fn with_primary_key_mode(mut self, enabled: bool) -> Self {
        self.primary_key_mode = enabled;
        self
    }

    pub fn with_key_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.key_hasher = hasher;
        self
    }

    pub fn with_key_equal(mut self, key_equal: Arc<dyn KeyEq>) -> Self {
        self.key_equal = key_equal;
        self
    }

    pub fn with_max_chain_length(mut self, max: u32) -> Self {
        self.max_chain_length = Some(max);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.global_depth_max == 0 {
            return Err(EhashError::InvalidConfiguration(
                "global_depth_max (D) must be at least 1".to_string(),
            ));
        }
        if self.global_depth_max > 63 {
            return Err(EhashError::InvalidConfiguration(format!(
                "global_depth_max (D) of {} exceeds the 63-bit addressable range of a 64-bit hash",
                self.global_depth_max
            )));
        }
        if self.block_size <= BUCKET_OVERHEAD {
            return Err(EhashError::InvalidConfiguration(format!(
                "block_size {} must exceed bucket header/trailer overhead of {} bytes",
                self.block_size, BUCKET_OVERHEAD
            )));
        }
        let record_width = self.key_width + std::mem::size_of::<u64>();
        if record_width > self.block_size - BUCKET_OVERHEAD {
            return Err(EhashError::InvalidConfiguration(format!(
                "record width {record_width} (key_width {} + 8) does not fit in block_size {} with {BUCKET_OVERHEAD} bytes of overhead",
                self.key_width, self.block_size
            )));
        }
        if self.key_width == 0 {
            return Err(EhashError::InvalidConfiguration(
                "key_width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
