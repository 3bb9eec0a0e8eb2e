//! Directory: maps a hash sequence to a bucket offset and maintains the
//! directory invariants (§3) under splits and doublings.
//!
//! This takes the dense, directly-indexed presentation allowed by §4.3.1: a
//! table of `2^global_depth` `bucket_ref` slots, indexed by the low
//! `global_depth` bits of a hash sequence. Per-slot `local_depth` is not
//! stored in the directory at all - `local_depth` lives on the bucket
//! itself, which is also where the split procedure in §4.3.2 already
//! expects to find it (`b.local_depth`).

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace};
use memmap2::MmapMut;
use tempfile::NamedTempFile;

use crate::hashing::HashSeq;

/// `encoding = 1`: dense directory, no per-slot local_depth/sequence.
const ENCODING_DENSE: u32 = 1;
/// `encoding(4) + global_depth(4) + global_depth_max(4) + entry_count(8)`.
const HEADER_LEN: usize = 20;
const ENTRY_LEN: usize = 8;

pub trait Directory {
    /// Width (in bits) actually used by the directory right now.
    fn global_depth(&self) -> u32;

    /// The construction-time ceiling on `global_depth` (`D`).
    fn global_depth_max(&self) -> u32;

    /// Number of dense slots, i.e. `2^global_depth`.
    fn len(&self) -> u64 {
        1u64 << self.global_depth()
    }

    /// The bucket offset for the slot that `seq`'s low `global_depth` bits
    /// select.
    fn lookup(&self, seq: HashSeq) -> Result<u64>;

    /// Overwrites the bucket offset stored at dense index `index`.
    fn set(&mut self, index: u64, bucket_ref: u64) -> Result<()>;

    /// Doubles the directory, duplicating every entry (§4.3.3). Fails if
    /// `global_depth` is already at `global_depth_max`.
    fn grow(&mut self) -> Result<()>;
}

/// An mmap-backed [`Directory`]. Growth rebuilds the file under a temporary
/// name and atomically replaces it, so a crash mid-grow never leaves behind
/// a partially-doubled file.
pub struct MmapDirectory {
    map: MmapMut,
    path: PathBuf,
    global_depth_max: u32,
}

impl MmapDirectory {
    /// Opens `path`, initializing a fresh one-slot directory pointing at
    /// `initial_bucket_ref` if the file is new or empty.
    pub fn open(path: &Path, global_depth_max: u32, initial_bucket_ref: u64) -> Result<Self> {
        let existed = path.exists() && path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if !existed {
            info!("initializing new directory file at {}", path.display());
            Self::write_fresh(path, global_depth_max, initial_bucket_ref)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening directory file {}", path.display()))?;
        let map = unsafe { MmapMut::map_mut(&file).context("mmapping directory file")? };
        let dir = MmapDirectory {
            map,
            path: path.to_path_buf(),
            global_depth_max,
        };
        dir.validate()?;
        Ok(dir)
    }

    fn write_fresh(path: &Path, global_depth_max: u32, initial_bucket_ref: u64) -> Result<()> {
        let mut file = File::create(path)
            .with_context(|| format!("creating directory file {}", path.display()))?;
        let mut buf = Vec::with_capacity(HEADER_LEN + ENTRY_LEN);
        buf.extend_from_slice(&ENCODING_DENSE.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // global_depth
        buf.extend_from_slice(&global_depth_max.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes()); // entry_count
        buf.extend_from_slice(&(initial_bucket_ref as i64).to_le_bytes());
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let encoding = u32::from_le_bytes(self.map[0..4].try_into().unwrap());
        if encoding != ENCODING_DENSE {
            return Err(anyhow!("unknown directory encoding variant {encoding}"));
        }
        let global_depth = self.global_depth();
        let entry_count = self.entry_count();
        if global_depth > self.global_depth_max {
            return Err(anyhow!(
                "directory global_depth {global_depth} exceeds configured maximum {}",
                self.global_depth_max
            ));
        }
        if entry_count != 1u64 << global_depth {
            return Err(anyhow!(
                "directory entry_count {entry_count} does not match 2^global_depth ({})",
                1u64 << global_depth
            ));
        }
        let expected_len = HEADER_LEN + entry_count as usize * ENTRY_LEN;
        if self.map.len() != expected_len {
            return Err(anyhow!(
                "directory file length {} does not match header-declared size {}",
                self.map.len(),
                expected_len
            ));
        }
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        u64::from_le_bytes(self.map[12..20].try_into().unwrap())
    }

    fn entry_offset(&self, index: u64) -> usize {
        HEADER_LEN + index as usize * ENTRY_LEN
    }
}

impl Directory for MmapDirectory {
    fn global_depth(&self) -> u32 {
        u32::from_le_bytes(self.map[4..8].try_into().unwrap())
    }

    fn global_depth_max(&self) -> u32 {
        self.global_depth_max
    }

    fn lookup(&self, seq: HashSeq) -> Result<u64> {
        let global_depth = self.global_depth();
        let index = seq.low_bits(global_depth);
        let offset = self.entry_offset(index);
        trace!("directory lookup: index {} -> byte offset {}", index, offset);
        let raw = i64::from_le_bytes(
            self.map[offset..offset + ENTRY_LEN]
                .try_into()
                .map_err(|_| anyhow!("directory entry {index} out of bounds"))?,
        );
        Ok(raw as u64)
    }

    fn set(&mut self, index: u64, bucket_ref: u64) -> Result<()> {
        let offset = self.entry_offset(index);
        debug!("directory[{}] <- bucket {:#x}", index, bucket_ref);
        self.map[offset..offset + ENTRY_LEN].copy_from_slice(&(bucket_ref as i64).to_le_bytes());
        Ok(())
    }

    fn grow(&mut self) -> Result<()> {
        let global_depth = self.global_depth();
        if global_depth >= self.global_depth_max {
            return Err(anyhow!(
                "cannot grow directory past configured maximum depth {}",
                self.global_depth_max
            ));
        }
        let entry_count = self.entry_count();
        let new_global_depth = global_depth + 1;
        let new_entry_count = entry_count * 2;
        info!(
            "growing directory: global_depth {} -> {} ({} -> {} entries)",
            global_depth, new_global_depth, entry_count, new_entry_count
        );

        let dir_path = self
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp = NamedTempFile::new_in(&dir_path)
            .context("creating temporary file for directory growth")?;
        {
            let f = tmp.as_file_mut();
            f.write_all(&ENCODING_DENSE.to_le_bytes())?;
            f.write_all(&new_global_depth.to_le_bytes())?;
            f.write_all(&self.global_depth_max.to_le_bytes())?;
            f.write_all(&new_entry_count.to_le_bytes())?;
            for i in 0..entry_count {
                let off = self.entry_offset(i);
                let entry = &self.map[off..off + ENTRY_LEN];
                f.write_all(entry)?;
                f.write_all(entry)?;
            }
            f.flush()?;
        }
        let f = tmp
            .persist(&self.path)
            .context("persisting grown directory file")?;
        let new_map = unsafe { MmapMut::map_mut(&f).context("remapping grown directory")? };
        self.map = new_map;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_directory_has_one_entry_at_depth_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehashdir");
        let d = MmapDirectory::open(&path, 32, 7).unwrap();
        assert_eq!(d.global_depth(), 0);
        assert_eq!(d.len(), 1);
        assert_eq!(d.lookup(HashSeq::from_u64(12345)).unwrap(), 7);
    }

    #[test]
    fn set_updates_the_right_slot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehashdir");
        let mut d = MmapDirectory::open(&path, 32, 0).unwrap();
        d.grow().unwrap();
        assert_eq!(d.len(), 2);
        d.set(0, 11).unwrap();
        d.set(1, 22).unwrap();
        assert_eq!(d.lookup(HashSeq::from_u64(0b0)).unwrap(), 11);
        assert_eq!(d.lookup(HashSeq::from_u64(0b1)).unwrap(), 22);
    }

    #[test]
    fn grow_preserves_existing_mappings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehashdir");
        let mut d = MmapDirectory::open(&path, 32, 0).unwrap();
        d.set(0, 42).unwrap();
        let before = d.lookup(HashSeq::from_u64(9)).unwrap();
        d.grow().unwrap();
        let after = d.lookup(HashSeq::from_u64(9)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn grow_refuses_past_global_depth_max() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehashdir");
        let mut d = MmapDirectory::open(&path, 0, 0).unwrap();
        assert!(d.grow().is_err());
    }

    #[test]
    fn reopening_an_existing_directory_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ehashdir");
        {
            let mut d = MmapDirectory::open(&path, 32, 0).unwrap();
            d.grow().unwrap();
            d.set(1, 99).unwrap();
        }
        let d = MmapDirectory::open(&path, 32, 0).unwrap();
        assert_eq!(d.global_depth(), 1);
        assert_eq!(d.lookup(HashSeq::from_u64(1)).unwrap(), 99);
    }
}
