//! Forward iteration over a sorted run.
//!
//! The iterator walks index entries in file order and, within each block,
//! entries in file order — which is ascending engine key order, since the
//! writer consumed an ascending stream. A truncated entry ends iteration
//! cleanly rather than panicking; `get`-path reads report such damage as
//! corruption instead.

use super::{SstReader, BLOCK_ENTRY_HEADER_LEN};

/// Restartable forward iterator over one run.
pub struct SstIterator<'a> {
    reader: &'a SstReader,
    block_idx: usize,
    offset_in_block: usize,
}

impl<'a> SstIterator<'a> {
    pub(crate) fn new(reader: &'a SstReader) -> Self {
        Self {
            reader,
            block_idx: 0,
            offset_in_block: 0,
        }
    }

    /// Repositions the iterator at the first entry of the first block.
    pub fn rewind(&mut self) {
        self.block_idx = 0;
        self.offset_in_block = 0;
    }
}

impl Iterator for SstIterator<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.reader.index_entries().get(self.block_idx)?;
            let block = self.reader.block_bytes(entry);

            if self.offset_in_block >= block.len() {
                self.block_idx += 1;
                self.offset_in_block = 0;
                continue;
            }

            let at = self.offset_in_block;
            if at + BLOCK_ENTRY_HEADER_LEN > block.len() {
                // Damaged tail; treat the run as exhausted.
                self.block_idx = self.reader.index_entries().len();
                return None;
            }
            let key_len =
                u32::from_be_bytes(block[at..at + 4].try_into().unwrap()) as usize;
            let value_len =
                u32::from_be_bytes(block[at + 4..at + 8].try_into().unwrap()) as usize;
            let key_at = at + BLOCK_ENTRY_HEADER_LEN;
            let end = key_at + key_len + value_len;
            if end > block.len() {
                self.block_idx = self.reader.index_entries().len();
                return None;
            }

            self.offset_in_block = end;
            return Some((
                block[key_at..key_at + key_len].to_vec(),
                block[key_at + key_len..end].to_vec(),
            ));
        }
    }
}
