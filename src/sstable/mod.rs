//! Sorted runs (SSTables).
//!
//! A sorted run is an immutable on-disk file of key/value pairs in engine
//! key order, produced by flushing a frozen memtable and never modified
//! afterwards. Updates are expressed by newer runs or memtables that
//! shadow older bindings.
//!
//! # On-disk layout
//!
//! All integers big-endian:
//!
//! ```text
//! [data blocks][index stream][filter stream][footer (24)]
//! ```
//!
//! - **Data block entry** — `key_len (4) | value_len (4) | key | value`;
//!   entries within a block ascend in key order.
//! - **Index entry** — `min_key_len (4) | max_key_len (4) | block_offset (8)
//!   | block_length (8) | min_key | max_key`, one per data block in file
//!   order. Offsets are relative to the start of the file (the data region
//!   starts at offset zero).
//! - **Filter entry** — `block_offset (8) | blob_len (4) | blob`, one per
//!   data block; the offset joins it to its index entry. The blob is a
//!   serialized [`BloomFilter`](crate::filter::BloomFilter) over that
//!   block's keys.
//! - **Footer** — `data_len (8) | index_len (8) | filter_len (8)`, fixed
//!   24 bytes at end of file.
//!
//! # Concurrency model
//!
//! Runs are write-once, so the reader maps the file read-only and serves
//! `get` from the mapping without locks. Multiple threads may read the
//! same [`SstReader`] concurrently.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod iterator;

use std::{
    collections::HashMap,
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::filter::{BloomFilter, FilterError};
use crate::keys;

pub use builder::SstWriter;
pub use iterator::SstIterator;

/// Fixed footer size: three big-endian u64 region lengths.
pub const FOOTER_LEN: usize = 24;

/// Fixed-width prefix of an index entry.
pub(crate) const INDEX_ENTRY_HEADER_LEN: usize = 4 + 4 + 8 + 8;

/// Fixed-width prefix of a filter entry.
pub(crate) const FILTER_ENTRY_HEADER_LEN: usize = 8 + 4;

/// Fixed-width prefix of a data block entry.
pub(crate) const BLOCK_ENTRY_HEADER_LEN: usize = 4 + 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by run readers and writers.
#[derive(Debug, Error)]
pub enum SstError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural damage: missing or lying footer, truncated streams,
    /// entries pointing outside their region.
    #[error("corrupt sorted run: {0}")]
    Corruption(String),

    /// A block's filter blob failed to deserialize.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
}

// ------------------------------------------------------------------------------------------------
// Index
// ------------------------------------------------------------------------------------------------

/// One data block's entry in the index stream.
#[derive(Clone, Debug)]
pub(crate) struct IndexEntry {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    /// Block offset from the start of the file.
    pub offset: u64,
    /// Block length in bytes.
    pub length: u64,
}

// ------------------------------------------------------------------------------------------------
// SstReader
// ------------------------------------------------------------------------------------------------

/// Open handle on one sorted-run file.
///
/// `open` parses and caches the footer, the index list, and the
/// per-block filter map; `get` then touches at most one data block, and
/// only when that block's filter admits the key.
#[derive(Debug)]
pub struct SstReader {
    path: PathBuf,
    mmap: Mmap,
    index: Vec<IndexEntry>,
    /// `block_offset -> serialized filter` for every data block.
    filters: HashMap<u64, Vec<u8>>,
    data_len: u64,
    /// Count of data blocks actually walked by `get`. Filter-rejected
    /// lookups leave this untouched, which makes filter effectiveness
    /// observable.
    blocks_scanned: AtomicU64,
}

impl SstReader {
    /// Opens and validates a run file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SstError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // Safety: run files are write-once; nothing mutates the file while
        // it is mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_LEN {
            return Err(SstError::Corruption(format!(
                "{}: {} bytes is too small to hold a footer",
                path.display(),
                mmap.len()
            )));
        }

        let footer_at = mmap.len() - FOOTER_LEN;
        let data_len = read_u64(&mmap, footer_at);
        let index_len = read_u64(&mmap, footer_at + 8);
        let filter_len = read_u64(&mmap, footer_at + 16);

        let described = data_len
            .checked_add(index_len)
            .and_then(|n| n.checked_add(filter_len))
            .and_then(|n| n.checked_add(FOOTER_LEN as u64));
        if described != Some(mmap.len() as u64) {
            return Err(SstError::Corruption(format!(
                "{}: footer regions do not match the {} byte file",
                path.display(),
                mmap.len()
            )));
        }

        let index = parse_index(&mmap, data_len, index_len, &path)?;
        for entry in &index {
            if entry.offset + entry.length > data_len {
                return Err(SstError::Corruption(format!(
                    "{}: index entry points outside the data region",
                    path.display()
                )));
            }
        }
        let filters = parse_filters(&mmap, data_len + index_len, filter_len, &path)?;

        debug!(
            path = %path.display(),
            blocks = index.len(),
            data_len,
            "opened sorted run"
        );

        Ok(Self {
            path,
            mmap,
            index,
            filters,
            data_len,
            blocks_scanned: AtomicU64::new(0),
        })
    }

    /// Point lookup. `Ok(None)` means this run holds no binding for the
    /// key; an empty value is a real (deletion-visible) binding.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SstError> {
        let Some(entry) = self
            .index
            .iter()
            .find(|e| keys::in_range(key, &e.min_key, &e.max_key))
        else {
            return Ok(None);
        };

        let blob = self.filters.get(&entry.offset).ok_or_else(|| {
            SstError::Corruption(format!(
                "{}: no filter for block at offset {}",
                self.path.display(),
                entry.offset
            ))
        })?;
        if !BloomFilter::load(blob)?.contains(key) {
            return Ok(None);
        }

        self.blocks_scanned.fetch_add(1, Ordering::Relaxed);
        let block = self.block_bytes(entry);
        let mut at = 0usize;
        while at < block.len() {
            if at + BLOCK_ENTRY_HEADER_LEN > block.len() {
                return Err(SstError::Corruption(format!(
                    "{}: truncated entry in block at offset {}",
                    self.path.display(),
                    entry.offset
                )));
            }
            let key_len = read_u32(block, at) as usize;
            let value_len = read_u32(block, at + 4) as usize;
            let key_at = at + BLOCK_ENTRY_HEADER_LEN;
            let end = key_at + key_len + value_len;
            if end > block.len() {
                return Err(SstError::Corruption(format!(
                    "{}: entry overruns block at offset {}",
                    self.path.display(),
                    entry.offset
                )));
            }

            let entry_key = &block[key_at..key_at + key_len];
            if keys::compare(entry_key, key) == std::cmp::Ordering::Equal {
                return Ok(Some(block[key_at + key_len..end].to_vec()));
            }
            at = end;
        }
        Ok(None)
    }

    /// Restartable forward iterator over the whole run in file order.
    pub fn iter(&self) -> SstIterator<'_> {
        SstIterator::new(self)
    }

    /// Number of data blocks `get` has walked since open.
    pub fn blocks_scanned(&self) -> u64 {
        self.blocks_scanned.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data blocks in the run.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn index_entries(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Raw bytes of one data block. Bounds were validated at open.
    pub(crate) fn block_bytes(&self, entry: &IndexEntry) -> &[u8] {
        &self.mmap[entry.offset as usize..(entry.offset + entry.length) as usize]
    }
}

// ------------------------------------------------------------------------------------------------
// Stream parsing
// ------------------------------------------------------------------------------------------------

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(buf[at..at + 8].try_into().unwrap())
}

fn parse_index(
    mmap: &Mmap,
    start: u64,
    len: u64,
    path: &Path,
) -> Result<Vec<IndexEntry>, SstError> {
    let region = &mmap[start as usize..(start + len) as usize];
    let mut entries = Vec::new();
    let mut at = 0usize;
    while at < region.len() {
        if at + INDEX_ENTRY_HEADER_LEN > region.len() {
            return Err(SstError::Corruption(format!(
                "{}: truncated index entry header",
                path.display()
            )));
        }
        let min_len = read_u32(region, at) as usize;
        let max_len = read_u32(region, at + 4) as usize;
        let offset = read_u64(region, at + 8);
        let length = read_u64(region, at + 16);

        let keys_at = at + INDEX_ENTRY_HEADER_LEN;
        let end = keys_at + min_len + max_len;
        if end > region.len() {
            return Err(SstError::Corruption(format!(
                "{}: truncated index entry keys",
                path.display()
            )));
        }

        entries.push(IndexEntry {
            min_key: region[keys_at..keys_at + min_len].to_vec(),
            max_key: region[keys_at + min_len..end].to_vec(),
            offset,
            length,
        });
        at = end;
    }
    Ok(entries)
}

fn parse_filters(
    mmap: &Mmap,
    start: u64,
    len: u64,
    path: &Path,
) -> Result<HashMap<u64, Vec<u8>>, SstError> {
    let region = &mmap[start as usize..(start + len) as usize];
    let mut filters = HashMap::new();
    let mut at = 0usize;
    while at < region.len() {
        if at + FILTER_ENTRY_HEADER_LEN > region.len() {
            return Err(SstError::Corruption(format!(
                "{}: truncated filter entry header",
                path.display()
            )));
        }
        let offset = read_u64(region, at);
        let blob_len = read_u32(region, at + 8) as usize;

        let blob_at = at + FILTER_ENTRY_HEADER_LEN;
        let end = blob_at + blob_len;
        if end > region.len() {
            return Err(SstError::Corruption(format!(
                "{}: truncated filter blob",
                path.display()
            )));
        }

        filters.insert(offset, region[blob_at..end].to_vec());
        at = end;
    }
    Ok(filters)
}
