//! Bucket: a fixed-size block holding up to `M` key/record_ref entries plus
//! an overflow-chain pointer.
//!
//! A bucket does not store the caller's full record - per §1 the core
//! "maps search keys to locations in a companion fixed-length record file",
//! so each live slot holds a fixed-width key and the byte offset
//! (`record_ref`) of the matching record in that external file. The caller
//! dereferences `record_ref` themselves; the core never opens the primary
//! file.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::trace;

/// Sentinel `next` value marking the end of an overflow chain.
pub const NO_NEXT: i64 = -1;

const SIZE_FIELD: usize = 8;
const LOCAL_DEPTH_FIELD: usize = 8;
const NEXT_FIELD: usize = 8;
/// Bytes of bucket-block header that precede the record slots.
pub const BUCKET_HEADER_LEN: usize = SIZE_FIELD + LOCAL_DEPTH_FIELD;
/// Bytes of bucket-block trailer that follow the record slots.
pub const BUCKET_TRAILER_LEN: usize = NEXT_FIELD;

/// Fixed layout derived once from the index's configuration: how large a
/// bucket block is on disk (`block_size`), how wide one stored entry is
/// (`record_width`), and how many entries fit (`capacity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLayout {
    pub block_size: usize,
    pub key_width: usize,
    pub record_width: usize,
    pub capacity: usize,
}

impl BucketLayout {
    pub fn new(block_size: usize, key_width: usize) -> Result<Self, String> {
        let record_width = key_width + std::mem::size_of::<u64>();
        let overhead = BUCKET_HEADER_LEN + BUCKET_TRAILER_LEN;
        if block_size <= overhead {
            return Err(format!(
                "block_size {block_size} too small to hold bucket header/trailer ({overhead} bytes)"
            ));
        }
        let capacity = (block_size - overhead) / record_width;
        if capacity == 0 {
            return Err(format!(
                "record_width {record_width} does not fit in block_size {block_size}"
            ));
        }
        Ok(BucketLayout {
            block_size,
            key_width,
            record_width,
            capacity,
        })
    }
}

/// A single stored (key, record location) entry, as returned by search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: Vec<u8>,
    pub record_ref: u64,
}

/// One fixed-size block of the hash file.
pub struct Bucket {
    pub offset: u64,
    layout: BucketLayout,
    buf: Vec<u8>,
}

impl Bucket {
    /// A freshly zeroed bucket at `offset`, ready to be assigned a local
    /// depth and written out.
    pub fn new(offset: u64, layout: BucketLayout) -> Self {
        let mut buf = vec![0u8; layout.block_size];
        buf[BUCKET_HEADER_LEN - NEXT_FIELD..BUCKET_HEADER_LEN]
            .copy_from_slice(&0u64.to_le_bytes());
        let mut bucket = Bucket {
            offset,
            layout,
            buf,
        };
        bucket.set_next(None);
        bucket
    }

    pub fn layout(&self) -> BucketLayout {
        self.layout
    }

    pub fn size(&self) -> usize {
        i64::from_le_bytes(self.buf[0..8].try_into().unwrap()) as usize
    }

    fn set_size(&mut self, size: usize) {
        self.buf[0..8].copy_from_slice(&(size as i64).to_le_bytes());
    }

    pub fn local_depth(&self) -> u32 {
        u64::from_le_bytes(self.buf[8..16].try_into().unwrap()) as u32
    }

    pub fn set_local_depth(&mut self, depth: u32) {
        self.buf[8..16].copy_from_slice(&(depth as u64).to_le_bytes());
    }

    pub fn next(&self) -> Option<u64> {
        let trailer_start = self.buf.len() - BUCKET_TRAILER_LEN;
        let raw = i64::from_le_bytes(self.buf[trailer_start..].try_into().unwrap());
        if raw == NO_NEXT {
            None
        } else {
            Some(raw as u64)
        }
    }

    pub fn set_next(&mut self, next: Option<u64>) {
        let raw: i64 = next.map(|n| n as i64).unwrap_or(NO_NEXT);
        let trailer_start = self.buf.len() - BUCKET_TRAILER_LEN;
        self.buf[trailer_start..].copy_from_slice(&raw.to_le_bytes());
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.layout.capacity
    }

    fn slot_offset(&self, index: usize) -> usize {
        BUCKET_HEADER_LEN + index * self.layout.record_width
    }

    fn entry_at(&self, index: usize) -> StoredEntry {
        let start = self.slot_offset(index);
        let key = self.buf[start..start + self.layout.key_width].to_vec();
        let ref_start = start + self.layout.key_width;
        let record_ref =
            u64::from_le_bytes(self.buf[ref_start..ref_start + 8].try_into().unwrap());
        StoredEntry { key, record_ref }
    }

    fn write_entry(&mut self, index: usize, key: &[u8], record_ref: u64) {
        let start = self.slot_offset(index);
        let key_width = self.layout.key_width;
        self.buf[start..start + key_width].copy_from_slice(key);
        let ref_start = start + key_width;
        self.buf[ref_start..ref_start + 8].copy_from_slice(&record_ref.to_le_bytes());
    }

    pub fn iter(&self) -> BucketIter<'_> {
        BucketIter {
            bucket: self,
            index: 0,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<StoredEntry> {
        self.get_with(key, |a, b| a == b)
    }

    /// Like [`Bucket::get`], but matches keys with a caller-supplied
    /// equality predicate instead of raw byte equality (§6's "key-equality
    /// callable").
    pub fn get_with<F: Fn(&[u8], &[u8]) -> bool>(&self, key: &[u8], eq: F) -> Option<StoredEntry> {
        self.iter().find(|entry| eq(&entry.key, key))
    }

    /// Every stored entry matching `key` under `eq`, in slot order.
    pub fn get_all_with<F: Fn(&[u8], &[u8]) -> bool>(&self, key: &[u8], eq: F) -> Vec<StoredEntry> {
        self.iter().filter(|entry| eq(&entry.key, key)).collect()
    }

    /// Appends `(key, record_ref)` to the first free slot. Does not check
    /// for an existing entry with the same key - duplicate detection is a
    /// Facade-level concern (primary-key mode only).
    pub fn put(&mut self, key: &[u8], record_ref: u64) -> Result<(), BucketFullError> {
        if key.len() != self.layout.key_width {
            return Err(BucketFullError {
                offset: self.offset,
                reason: format!(
                    "key width {} does not match configured width {}",
                    key.len(),
                    self.layout.key_width
                ),
            });
        }
        let size = self.size();
        if size >= self.layout.capacity {
            return Err(BucketFullError {
                offset: self.offset,
                reason: "bucket full".to_string(),
            });
        }
        trace!("writing entry at slot {} of bucket {:#x}", size, self.offset);
        self.write_entry(size, key, record_ref);
        self.set_size(size + 1);
        Ok(())
    }

    /// Removes every entry matching `key`, compacting with swap-with-last
    /// per §3 invariant 5. Returns the number of entries removed.
    pub fn remove(&mut self, key: &[u8]) -> usize {
        self.remove_with(key, |a, b| a == b)
    }

    /// Like [`Bucket::remove`], but matches keys with a caller-supplied
    /// equality predicate instead of raw byte equality (§6's "key-equality
    /// callable").
    pub fn remove_with<F: Fn(&[u8], &[u8]) -> bool>(&mut self, key: &[u8], eq: F) -> usize {
        let mut removed = 0;
        let mut i = 0;
        let mut size = self.size();
        while i < size {
            if eq(&self.entry_at(i).key, key) {
                let last = self.entry_at(size - 1);
                if i != size - 1 {
                    self.write_entry(i, &last.key, last.record_ref);
                }
                size -= 1;
                removed += 1;
            } else {
                i += 1;
            }
        }
        self.set_size(size);
        removed
    }

    pub fn write_to<W: Write + Seek>(&self, buffer: &mut W) -> io::Result<()> {
        buffer.seek(SeekFrom::Start(self.offset))?;
        buffer.write_all(&self.buf)
    }

    pub fn read_from<R: Read + Seek>(
        buffer: &mut R,
        offset: u64,
        layout: BucketLayout,
    ) -> io::Result<Self> {
        buffer.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; layout.block_size];
        buffer.read_exact(&mut buf)?;
        Ok(Bucket {
            offset,
            layout,
            buf,
        })
    }
}

pub struct BucketIter<'b> {
    bucket: &'b Bucket,
    index: usize,
}

impl<'b> Iterator for BucketIter<'b> {
    type Item = StoredEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.bucket.size() {
            return None;
        }
        let entry = self.bucket.entry_at(self.index);
        self.index += 1;
        Some(entry)
    }
}

#[derive(Debug, Clone)]
pub struct BucketFullError {
    pub offset: u64,
    pub reason: String,
}

impl fmt::Display for BucketFullError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cannot insert into bucket at offset {:#x}: {}",
            self.offset, self.reason
        )
    }
}

impl std::error::Error for BucketFullError {}
