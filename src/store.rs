//! Bucket Store: a flat, bucket-granular heap persisted in the hash file.
//!
//! The hash file has no header of its own - per §6 it is simply a densely
//! packed sequence of `block_size`-byte blocks starting at offset 0, so the
//! number of allocated buckets is always derivable from the file length.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use log::{debug, info, trace};

use crate::bucket::{Bucket, BucketLayout};

/// Allocates, reads, writes, and chains fixed-size bucket blocks by byte
/// offset. Implementations need not cache blocks - callers read a bucket,
/// mutate it, and write it back within a single top-level operation.
pub trait BucketStore {
    /// Appends a freshly zeroed block at end-of-file and returns its offset.
    fn allocate(&mut self) -> Result<Bucket>;

    /// Reads one block.
    fn read(&mut self, offset: u64) -> Result<Bucket>;

    /// Overwrites a block in place. `bucket.offset` determines where.
    fn write(&mut self, bucket: &Bucket) -> Result<()>;

    /// Follows `next` links starting at `head_offset` until the sentinel,
    /// reading each block exactly once.
    fn walk_chain(&mut self, head_offset: u64) -> Result<Vec<Bucket>>;

    /// Allocates a new block, chains it in front of `head_offset` (the new
    /// block's `next` becomes `head_offset`), writes it, and returns its
    /// offset - the new chain head.
    fn prepend(&mut self, head_offset: u64, local_depth: u32) -> Result<Bucket>;

    /// Number of blocks currently allocated in the heap.
    fn bucket_count(&self) -> u64;

    fn layout(&self) -> BucketLayout;
}

/// A file-backed [`BucketStore`]. No caching beyond the one-block read
/// buffer implicit in a single `read_exact` call.
pub struct FileBucketStore<F: Read + Write + Seek> {
    file: F,
    layout: BucketLayout,
    bucket_count: u64,
}

impl FileBucketStore<File> {
    /// Opens (creating if absent) the hash file at `path`.
    pub fn open(path: &std::path::Path, layout: BucketLayout) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening hash file {}", path.display()))?;
        Self::init(file, layout)
    }
}

impl<F: Read + Write + Seek> FileBucketStore<F> {
    pub fn init(mut file: F, layout: BucketLayout) -> Result<Self> {
        let len = file
            .seek(SeekFrom::End(0))
            .context("seeking to end of hash file to measure it")?;
        if len % layout.block_size as u64 != 0 {
            return Err(anyhow::anyhow!(
                "hash file length {} is not a multiple of block size {}",
                len,
                layout.block_size
            ));
        }
        let bucket_count = len / layout.block_size as u64;
        info!(
            "opened hash file: {} buckets already allocated (block_size={})",
            bucket_count, layout.block_size
        );
        Ok(FileBucketStore {
            file,
            layout,
            bucket_count,
        })
    }
}

impl<F: Read + Write + Seek> BucketStore for FileBucketStore<F> {
    fn allocate(&mut self) -> Result<Bucket> {
        let offset = self.bucket_count * self.layout.block_size as u64;
        let bucket = Bucket::new(offset, self.layout);
        bucket
            .write_to(&mut self.file)
            .with_context(|| format!("allocating bucket at offset {offset:#x}"))?;
        self.bucket_count += 1;
        debug!("allocated bucket at offset {:#x}", offset);
        Ok(bucket)
    }

    fn read(&mut self, offset: u64) -> Result<Bucket> {
        trace!("reading bucket at offset {:#x}", offset);
        Bucket::read_from(&mut self.file, offset, self.layout)
            .with_context(|| format!("reading bucket at offset {offset:#x}"))
    }

    fn write(&mut self, bucket: &Bucket) -> Result<()> {
        trace!("writing bucket at offset {:#x}", bucket.offset);
        bucket
            .write_to(&mut self.file)
            .with_context(|| format!("writing bucket at offset {:#x}", bucket.offset))
    }

    fn walk_chain(&mut self, head_offset: u64) -> Result<Vec<Bucket>> {
        let mut chain = Vec::new();
        let mut next = Some(head_offset);
        while let Some(offset) = next {
            let bucket = self.read(offset)?;
            next = bucket.next();
            chain.push(bucket);
        }
        Ok(chain)
    }

    fn prepend(&mut self, head_offset: u64, local_depth: u32) -> Result<Bucket> {
        let mut bucket = self.allocate()?;
        bucket.set_local_depth(local_depth);
        bucket.set_next(Some(head_offset));
        self.write(&bucket)?;
        info!(
            "prepended overflow bucket {:#x} in front of {:#x}",
            bucket.offset, head_offset
        );
        Ok(bucket)
    }

    fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    fn layout(&self) -> BucketLayout {
        self.layout
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn layout() -> BucketLayout {
        BucketLayout::new(128, 8).unwrap()
    }

    fn in_memory_store() -> FileBucketStore<Cursor<Vec<u8>>> {
        FileBucketStore::init(Cursor::new(Vec::new()), layout()).unwrap()
    }

    #[test]
    fn allocate_returns_increasing_offsets() {
        let mut store = in_memory_store();
        let b0 = store.allocate().unwrap();
        let b1 = store.allocate().unwrap();
        assert_eq!(b0.offset, 0);
        assert_eq!(b1.offset, layout().block_size as u64);
        assert_eq!(store.bucket_count(), 2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut store = in_memory_store();
        let mut bucket = store.allocate().unwrap();
        bucket.put(&42u64.to_le_bytes(), 4242).unwrap();
        store.write(&bucket).unwrap();

        let read_back = store.read(bucket.offset).unwrap();
        assert_eq!(read_back.get(&42u64.to_le_bytes()).unwrap().record_ref, 4242);
    }

    #[test]
    fn walk_chain_follows_next_until_sentinel() {
        let mut store = in_memory_store();
        let head = store.allocate().unwrap();
        store.write(&head).unwrap();
        let second = store.prepend(head.offset, 1).unwrap();
        let third = store.prepend(second.offset, 1).unwrap();

        let chain = store.walk_chain(third.offset).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].offset, third.offset);
        assert_eq!(chain[1].offset, second.offset);
        assert_eq!(chain[2].offset, head.offset);
        assert_eq!(chain[2].next(), None);
    }

    #[test]
    fn init_rejects_truncated_file() {
        let buf = Cursor::new(vec![0u8; 17]);
        assert!(FileBucketStore::init(buf, layout()).is_err());
    }
}
