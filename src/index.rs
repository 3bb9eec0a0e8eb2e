//! Index Facade (§4.4): the only entry point callers use. Owns a
//! [`Directory`] and a [`BucketStore`], and orchestrates lookup, insert
//! (including split/double/overflow), and remove while upholding the
//! directory invariants of §3.

use std::fs::File;
use std::path::Path;

use log::{debug, info, warn};

use crate::bucket::{Bucket, BucketLayout, StoredEntry};
use crate::config::EhashConfig;
use crate::directory::{Directory, MmapDirectory};
use crate::error::{EhashError, Result};
use crate::hashing::{HashSeq, KeyEq, KeyHasher};
use crate::store::{BucketStore, FileBucketStore};

/// A disk-resident extendible hashing index over a directory file and a
/// hash (bucket heap) file.
pub struct EhashIndex<D: Directory, S: BucketStore> {
    directory: D,
    store: S,
    config: EhashConfig,
}

impl EhashIndex<MmapDirectory, FileBucketStore<File>> {
    /// Opens an existing index at `dir_path`/`hash_path`, or creates one if
    /// both are absent. Equivalent to calling [`EhashIndex::create_index`]
    /// on a location that doesn't exist yet.
    pub fn open(dir_path: &Path, hash_path: &Path, config: EhashConfig) -> Result<Self> {
        let layout = BucketLayout::new(config.block_size, config.key_width)
            .map_err(EhashError::InvalidConfiguration)?;
        let mut store = FileBucketStore::open(hash_path, layout)?;
        let initial_bucket_ref = if store.bucket_count() == 0 {
            info!("hash file is empty, allocating the initial bucket");
            let bucket = store.allocate()?;
            bucket.offset
        } else {
            0
        };
        let directory = MmapDirectory::open(dir_path, config.global_depth_max, initial_bucket_ref)?;
        let index = EhashIndex {
            directory,
            store,
            config,
        };
        index.check_invariants()?;
        Ok(index)
    }

    /// Builds a fresh index by scanning a primary record file sequentially
    /// (§4.4's `create_index`). The primary file itself stays an external
    /// collaborator the core never opens - `records` is whatever the host
    /// produces by walking it: one `(record_ref, removed, key)` triple per
    /// slot, in file order. Every non-removed record is inserted; removed
    /// ones are skipped, matching the specification's "for each non-removed
    /// record, calls insert" contract exactly.
    pub fn create_index<I>(
        dir_path: &Path,
        hash_path: &Path,
        config: EhashConfig,
        records: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, bool, Vec<u8>)>,
    {
        let mut index = Self::open(dir_path, hash_path, config)?;
        let mut scanned = 0u64;
        let mut loaded = 0u64;
        for (record_ref, removed, key) in records {
            scanned += 1;
            if removed {
                continue;
            }
            index.insert(&key, record_ref)?;
            loaded += 1;
        }
        info!(
            "create_index: scanned {} primary records, inserted {}",
            scanned, loaded
        );
        Ok(index)
    }
}

impl<D: Directory, S: BucketStore> EhashIndex<D, S> {
    /// Assembles an index from already-open parts. Used by tests to run
    /// the facade against in-memory directory/store implementations.
    pub fn with_parts(directory: D, store: S, config: EhashConfig) -> Result<Self> {
        let index = EhashIndex {
            directory,
            store,
            config,
        };
        index.check_invariants()?;
        Ok(index)
    }

    /// A cheap sanity check that the directory and configuration still
    /// agree with each other. Called once at open time; callers that want
    /// to re-check mid-session (e.g. after a suspected external write) can
    /// call it again directly.
    pub fn is_ready(&self) -> bool {
        self.check_invariants().is_ok()
    }

    fn check_invariants(&self) -> Result<()> {
        if self.directory.global_depth() > self.directory.global_depth_max() {
            return Err(EhashError::Corrupt(format!(
                "directory global_depth {} exceeds configured maximum {}",
                self.directory.global_depth(),
                self.directory.global_depth_max()
            )));
        }
        if self.directory.global_depth_max() != self.config.global_depth_max {
            return Err(EhashError::Corrupt(
                "directory global_depth_max does not match configuration".to_string(),
            ));
        }
        Ok(())
    }

    fn hash_seq(&self, key: &[u8]) -> HashSeq {
        HashSeq::from_u64(self.config.key_hasher.hash(key))
    }

    /// Returns every `record_ref` whose stored key compares equal to `key`
    /// under the configured key-equality callable, walking the directory's
    /// head bucket and the rest of its overflow chain (§4.4). In
    /// primary-key mode this holds at most one element; in secondary mode
    /// it may hold many, spread across more than one chain bucket. Empty if
    /// `key` is not present anywhere in the chain.
    pub fn search(&mut self, key: &[u8]) -> Result<Vec<u64>> {
        let seq = self.hash_seq(key);
        let bucket_ref = self.directory.lookup(seq)?;
        let chain = self.store.walk_chain(bucket_ref)?;
        let key_equal = &self.config.key_equal;
        Ok(chain
            .iter()
            .flat_map(|b| b.get_all_with(key, |a, bb| key_equal.eq(a, bb)))
            .map(|e| e.record_ref)
            .collect())
    }

    /// Inserts `(key, record_ref)`, splitting or doubling as needed, and
    /// chaining an overflow bucket only once the configured maximum global
    /// depth is reached and a split can no longer help (§4.3.2, §4.3.3).
    pub fn insert(&mut self, key: &[u8], record_ref: u64) -> Result<()> {
        if key.len() != self.config.key_width {
            return Err(EhashError::InvalidConfiguration(format!(
                "key width {} does not match configured width {}",
                key.len(),
                self.config.key_width
            )));
        }
        if self.config.primary_key_mode && !self.search(key)?.is_empty() {
            return Err(EhashError::DuplicateKey);
        }
        let seq = self.hash_seq(key);
        loop {
            let bucket_ref = self.directory.lookup(seq)?;
            let mut chain = self.store.walk_chain(bucket_ref)?;

            if let Some(slot) = chain.iter_mut().find(|b| !b.is_full()) {
                slot.put(key, record_ref)
                    .expect("bucket reported non-full but put failed");
                self.store.write(slot)?;
                return Ok(());
            }

            let head = &chain[0];
            let local_depth = head.local_depth();
            let global_depth = self.directory.global_depth();

            if local_depth < global_depth {
                debug!(
                    "bucket {:#x} full at local_depth {} < global_depth {}, splitting",
                    bucket_ref, local_depth, global_depth
                );
                self.split(bucket_ref, seq, local_depth)?;
                continue;
            }

            if global_depth < self.directory.global_depth_max() {
                debug!(
                    "bucket {:#x} full at local_depth {} == global_depth, growing directory",
                    bucket_ref, local_depth
                );
                self.directory.grow()?;
                continue;
            }

            if let Some(max_chain) = self.config.max_chain_length {
                if chain.len() as u32 >= max_chain {
                    return Err(EhashError::CapacityExhausted {
                        offset: bucket_ref,
                        cap: max_chain,
                    });
                }
            }
            warn!(
                "bucket {:#x} colliding on all {} addressable bits, chaining overflow bucket",
                bucket_ref, global_depth
            );
            let mut new_head = self.store.prepend(bucket_ref, local_depth)?;
            let index = seq.low_bits(global_depth);
            self.directory.set(index, new_head.offset)?;
            new_head
                .put(key, record_ref)
                .expect("freshly allocated bucket cannot be full");
            self.store.write(&new_head)?;
            return Ok(());
        }
    }

    /// Removes every entry matching `key` (ordinarily at most one, under
    /// primary-key mode; possibly several, spread across more than one
    /// chain bucket, in secondary mode) and returns whether anything was
    /// removed. Compacts every touched bucket with swap-with-last before
    /// writing it back (§3 invariant 5). Never merges buckets back together
    /// (§4.3.4 addendum).
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        let seq = self.hash_seq(key);
        let bucket_ref = self.directory.lookup(seq)?;
        let mut chain = self.store.walk_chain(bucket_ref)?;
        let key_equal = self.config.key_equal.clone();
        let mut any_removed = false;
        for bucket in chain.iter_mut() {
            if bucket.remove_with(key, |a, b| key_equal.eq(a, b)) > 0 {
                self.store.write(bucket)?;
                any_removed = true;
            }
        }
        Ok(any_removed)
    }

    /// Splits the bucket at `old_ref` (local_depth `local_depth`, strictly
    /// less than the current global depth) into two buckets distinguished
    /// by hash-sequence bit `local_depth`, and repoints every directory
    /// entry that aliased the old bucket.
    fn split(&mut self, old_ref: u64, trigger: HashSeq, local_depth: u32) -> Result<()> {
        let global_depth = self.directory.global_depth();
        let new_local_depth = local_depth + 1;
        let old_bucket = self.store.read(old_ref)?;
        let entries: Vec<StoredEntry> = old_bucket.iter().collect();

        let mut rebuilt_old = Bucket::new(old_ref, self.store.layout());
        rebuilt_old.set_local_depth(new_local_depth);
        let mut new_bucket = self.store.allocate()?;
        new_bucket.set_local_depth(new_local_depth);

        for entry in entries {
            let entry_seq = HashSeq::from_u64(self.config.key_hasher.hash(&entry.key));
            let target = if entry_seq.bit(local_depth) {
                &mut new_bucket
            } else {
                &mut rebuilt_old
            };
            target
                .put(&entry.key, entry.record_ref)
                .expect("split redistributes at most the original bucket capacity per side");
        }

        self.store.write(&rebuilt_old)?;
        self.store.write(&new_bucket)?;

        let base = trigger.low_bits(local_depth);
        let new_bit = 1u64 << local_depth;
        let higher_bits = global_depth - new_local_depth;
        for higher in 0..(1u64 << higher_bits) {
            let shared = base | (higher << new_local_depth);
            self.directory.set(shared, old_ref)?;
            self.directory.set(shared | new_bit, new_bucket.offset)?;
        }
        info!(
            "split bucket {:#x} -> {:#x} (new local_depth {})",
            old_ref, new_bucket.offset, new_local_depth
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;

    /// Assigns a caller-supplied hash to each key, so tests can force
    /// specific collision/split patterns instead of depending on
    /// HighwayHash's actual distribution.
    struct FixedHasher {
        table: HashMap<Vec<u8>, u64>,
    }

    impl KeyHasher for FixedHasher {
        fn hash(&self, key: &[u8]) -> u64 {
            *self.table.get(key).expect("key missing from FixedHasher table")
        }
    }

    fn config_with_hasher(global_depth_max: u32, table: HashMap<Vec<u8>, u64>) -> EhashConfig {
        EhashConfig::new(global_depth_max, 64, 8)
            .unwrap()
            .with_key_hasher(Arc::new(FixedHasher { table }))
    }

    fn fresh_index(
        config: EhashConfig,
    ) -> EhashIndex<MemoryDirectoryForTest, FileBucketStore<Cursor<Vec<u8>>>> {
        let layout = BucketLayout::new(config.block_size, config.key_width).unwrap();
        let mut store = FileBucketStore::init(Cursor::new(Vec::new()), layout).unwrap();
        let initial = store.allocate().unwrap();
        let directory = MemoryDirectoryForTest::new(config.global_depth_max, initial.offset);
        EhashIndex::with_parts(directory, store, config).unwrap()
    }

    /// A plain in-memory [`Directory`], mirroring [`MmapDirectory`]'s
    /// semantics without touching the filesystem - useful for exercising
    /// the facade's split/double logic in isolation.
    struct MemoryDirectoryForTest {
        entries: Vec<i64>,
        global_depth: u32,
        global_depth_max: u32,
    }

    impl MemoryDirectoryForTest {
        fn new(global_depth_max: u32, initial_bucket_ref: u64) -> Self {
            MemoryDirectoryForTest {
                entries: vec![initial_bucket_ref as i64],
                global_depth: 0,
                global_depth_max,
            }
        }
    }

    impl Directory for MemoryDirectoryForTest {
        fn global_depth(&self) -> u32 {
            self.global_depth
        }

        fn global_depth_max(&self) -> u32 {
            self.global_depth_max
        }

        fn lookup(&self, seq: HashSeq) -> anyhow::Result<u64> {
            let index = seq.low_bits(self.global_depth);
            Ok(self.entries[index as usize] as u64)
        }

        fn set(&mut self, index: u64, bucket_ref: u64) -> anyhow::Result<()> {
            self.entries[index as usize] = bucket_ref as i64;
            Ok(())
        }

        fn grow(&mut self) -> anyhow::Result<()> {
            if self.global_depth >= self.global_depth_max {
                return Err(anyhow::anyhow!("at max depth"));
            }
            let mut next = Vec::with_capacity(self.entries.len() * 2);
            for e in &self.entries {
                next.push(*e);
                next.push(*e);
            }
            self.entries = next;
            self.global_depth += 1;
            Ok(())
        }
    }

    #[test]
    fn insert_then_search_round_trips() {
        let table = HashMap::from([(b"abcdefgh".to_vec(), 0b000u64)]);
        let mut index = fresh_index(config_with_hasher(3, table));
        index.insert(b"abcdefgh", 111).unwrap();
        assert_eq!(index.search(b"abcdefgh").unwrap(), vec![111]);
    }

    #[test]
    fn search_missing_key_returns_none() {
        let table = HashMap::from([(b"abcdefgh".to_vec(), 0u64)]);
        let mut index = fresh_index(config_with_hasher(3, table));
        assert!(index.search(b"abcdefgh").unwrap().is_empty());
    }

    #[test]
    fn duplicate_primary_key_insert_is_rejected() {
        let table = HashMap::from([(b"abcdefgh".to_vec(), 0u64)]);
        let mut index = fresh_index(config_with_hasher(3, table));
        index.insert(b"abcdefgh", 1).unwrap();
        let err = index.insert(b"abcdefgh", 2).unwrap_err();
        assert!(matches!(err, EhashError::DuplicateKey));
    }

    #[test]
    fn overflow_on_keys_colliding_on_every_addressable_bit_chains_instead_of_looping() {
        // block_size 64 / key_width 8 -> record_width 16, capacity = (64-24)/16 = 2.
        // Three keys sharing all 3 low bits (D=3) force repeated splits that
        // never separate them, until global_depth hits its configured
        // maximum and the third insert has to fall back to an overflow
        // bucket instead of looping forever.
        let table = HashMap::from([
            (b"key_aaaa".to_vec(), 0b101u64),
            (b"key_bbbb".to_vec(), 0b101u64),
            (b"key_cccc".to_vec(), 0b101u64),
        ]);
        let mut index = fresh_index(config_with_hasher(3, table));
        index.insert(b"key_aaaa", 1).unwrap();
        index.insert(b"key_bbbb", 2).unwrap();
        index.insert(b"key_cccc", 3).unwrap();
        assert_eq!(index.directory.global_depth(), 3);
        assert_eq!(index.search(b"key_aaaa").unwrap(), vec![1]);
        assert_eq!(index.search(b"key_bbbb").unwrap(), vec![2]);
        assert_eq!(index.search(b"key_cccc").unwrap(), vec![3]);
    }

    #[test]
    fn remove_then_search_returns_none() {
        let table = HashMap::from([(b"abcdefgh".to_vec(), 0u64)]);
        let mut index = fresh_index(config_with_hasher(3, table));
        index.insert(b"abcdefgh", 1).unwrap();
        assert!(index.remove(b"abcdefgh").unwrap());
        assert!(index.search(b"abcdefgh").unwrap().is_empty());
    }

    #[test]
    fn removing_a_missing_key_returns_false() {
        let table = HashMap::from([(b"abcdefgh".to_vec(), 0u64)]);
        let mut index = fresh_index(config_with_hasher(3, table));
        assert!(!index.remove(b"abcdefgh").unwrap());
    }

    #[test]
    fn insert_rejects_mismatched_key_width() {
        let table = HashMap::new();
        let mut index = fresh_index(config_with_hasher(3, table));
        let err = index.insert(b"short", 1).unwrap_err();
        assert!(matches!(err, EhashError::InvalidConfiguration(_)));
    }

    #[test]
    fn split_separates_keys_that_disagree_on_the_new_bit() {
        // capacity is 2; the first two keys share bit 0 and exactly fill
        // the initial bucket, so the third insert (disagreeing on bit 0)
        // forces exactly one split/grow before it lands in a fresh bucket.
        let table = HashMap::from([
            (b"key_0001".to_vec(), 0b000u64),
            (b"key_0010".to_vec(), 0b000u64),
            (b"key_0011".to_vec(), 0b001u64),
            (b"key_0100".to_vec(), 0b001u64),
        ]);
        let mut index = fresh_index(config_with_hasher(3, table));
        index.insert(b"key_0001", 1).unwrap();
        index.insert(b"key_0010", 2).unwrap();
        index.insert(b"key_0011", 3).unwrap();
        index.insert(b"key_0100", 4).unwrap();
        assert_eq!(index.directory.global_depth(), 1);
        for (key, val) in [
            (&b"key_0001"[..], 1u64),
            (&b"key_0010"[..], 2),
            (&b"key_0011"[..], 3),
            (&b"key_0100"[..], 4),
        ] {
            assert_eq!(index.search(key).unwrap(), vec![val]);
        }
    }

    #[test]
    fn remove_compacts_all_chain_buckets_sharing_a_duplicate_key() {
        // Secondary-key mode permits duplicates; two inserts of the same
        // key forced into different chain buckets must both disappear on a
        // single remove, not just the first bucket found.
        let table = HashMap::from([(b"dup_key0".to_vec(), 0b101u64)]);
        let mut config = config_with_hasher(3, table);
        config.primary_key_mode = false;
        let mut index = fresh_index(config);
        index.insert(b"dup_key0", 1).unwrap();
        index.insert(b"dup_key0", 2).unwrap();
        index.insert(b"dup_key0", 3).unwrap();
        assert_eq!(index.search(b"dup_key0").unwrap().len(), 3);
        assert!(index.remove(b"dup_key0").unwrap());
        assert!(index.search(b"dup_key0").unwrap().is_empty());
    }
}
