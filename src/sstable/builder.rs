//! Sorted-run writer.
//!
//! [`SstWriter`] consumes an ascending `(key, value)` stream — a memtable
//! iterator in practice — and lays down the file format described in the
//! [module docs](super). Blocks, index entries, and per-block filters are
//! accumulated in memory and written out in one pass, followed by the
//! footer. A written file is never updated.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::config::Config;
use crate::filter::BloomFilter;

use super::{IndexEntry, SstError};

/// Bits / hash-function count of each per-block filter.
const BLOCK_FILTER_BITS: u64 = 1024;
const BLOCK_FILTER_HASHES: u64 = 3;

/// Streaming builder for one run file.
pub struct SstWriter {
    file: File,
    path: PathBuf,
    /// Byte size past which the current block is sealed.
    block_size: usize,
    /// Concatenation of sealed blocks.
    data_buf: Vec<u8>,
    /// Entry bytes of the block being built.
    block: Vec<u8>,
    /// First and last key of the block being built (input is ascending).
    block_min_key: Option<Vec<u8>>,
    block_max_key: Option<Vec<u8>>,
    /// Running filter over the current block's keys.
    filter: BloomFilter,
    index: Vec<IndexEntry>,
    /// `(block_offset, serialized filter)` per sealed block.
    filter_entries: Vec<(u64, Vec<u8>)>,
}

impl SstWriter {
    /// Creates the destination file and an empty builder.
    pub fn create(path: impl AsRef<Path>, config: &Config) -> Result<Self, SstError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            file,
            path,
            block_size: config.block_size,
            data_buf: Vec::new(),
            block: Vec::new(),
            block_min_key: None,
            block_max_key: None,
            filter: BloomFilter::new(BLOCK_FILTER_BITS, BLOCK_FILTER_HASHES),
            index: Vec::new(),
            filter_entries: Vec::new(),
        })
    }

    /// Consumes the entry stream and writes the complete file.
    ///
    /// Entries must arrive in ascending engine key order with no
    /// duplicates — exactly what a memtable iterator produces.
    pub fn write(
        &mut self,
        entries: impl Iterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<(), SstError> {
        for (key, value) in entries {
            self.push_entry(&key, &value);
            if self.block.len() > self.block_size {
                self.seal_block();
            }
        }
        if !self.block.is_empty() {
            self.seal_block();
        }

        let data_len = self.data_buf.len() as u64;
        let index_stream = self.encode_index();
        let filter_stream = self.encode_filters();

        self.file.write_all(&self.data_buf)?;
        self.file.write_all(&index_stream)?;
        self.file.write_all(&filter_stream)?;

        let mut footer = [0u8; super::FOOTER_LEN];
        footer[0..8].copy_from_slice(&data_len.to_be_bytes());
        footer[8..16].copy_from_slice(&(index_stream.len() as u64).to_be_bytes());
        footer[16..24].copy_from_slice(&(filter_stream.len() as u64).to_be_bytes());
        self.file.write_all(&footer)?;
        self.file.sync_all()?;

        debug!(
            path = %self.path.display(),
            blocks = self.index.len(),
            data_len,
            "wrote sorted run"
        );
        Ok(())
    }

    /// Adds the key to the running filter and the entry bytes to the
    /// current block.
    fn push_entry(&mut self, key: &[u8], value: &[u8]) {
        self.filter.add(key);
        self.block.extend_from_slice(&(key.len() as u32).to_be_bytes());
        self.block.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.block.extend_from_slice(key);
        self.block.extend_from_slice(value);

        if self.block_min_key.is_none() {
            self.block_min_key = Some(key.to_vec());
        }
        self.block_max_key = Some(key.to_vec());
    }

    /// Moves the current block into the data buffer and records its index
    /// and filter entries; resets the block state for the next one.
    fn seal_block(&mut self) {
        let offset = self.data_buf.len() as u64;
        let length = self.block.len() as u64;
        self.data_buf.append(&mut self.block);

        self.index.push(IndexEntry {
            min_key: self.block_min_key.take().unwrap_or_default(),
            max_key: self.block_max_key.take().unwrap_or_default(),
            offset,
            length,
        });
        self.filter_entries.push((offset, self.filter.save()));
        self.filter.reset();
    }

    fn encode_index(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for entry in &self.index {
            buf.extend_from_slice(&(entry.min_key.len() as u32).to_be_bytes());
            buf.extend_from_slice(&(entry.max_key.len() as u32).to_be_bytes());
            buf.extend_from_slice(&entry.offset.to_be_bytes());
            buf.extend_from_slice(&entry.length.to_be_bytes());
            buf.extend_from_slice(&entry.min_key);
            buf.extend_from_slice(&entry.max_key);
        }
        buf
    }

    fn encode_filters(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (offset, blob) in &self.filter_entries {
            buf.extend_from_slice(&offset.to_be_bytes());
            buf.extend_from_slice(&(blob.len() as u32).to_be_bytes());
            buf.extend_from_slice(blob);
        }
        buf
    }
}
