//! Write-ahead log.
//!
//! The WAL is an append-only stream of CRC-protected records. The engine
//! appends every mutation here before it touches the memtable; on restart
//! the whole file is replayed to rebuild that memtable. Each memtable owns
//! exactly one WAL, and the file is deleted once the memtable has been
//! flushed to a sorted run.
//!
//! # On-disk layout
//!
//! One record, all integers big-endian:
//!
//! ```text
//! [type (1)][key_len (4)][value_len (4)][key][value][crc32 (4)]
//! ```
//!
//! `type` is [`RecordType::Put`] or [`RecordType::Delete`], chosen by
//! whether the caller supplied a value. The CRC (CRC-32/IEEE) covers
//! everything before it.
//!
//! # Replay guarantees
//!
//! - A torn tail — a partial header, or fewer bytes than the declared
//!   lengths require — ends replay cleanly; the logical size is truncated
//!   to the last complete record.
//! - Declared lengths past the sanity bounds (10 MiB keys, 100 MiB values)
//!   are treated as corruption and end replay.
//! - A CRC mismatch is logged as a warning; the record is still applied
//!   and replay continues. Deployments that would rather stop at the first
//!   damaged record can treat the warning as a trigger for manual repair.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{error, trace, warn};

use crate::config::Config;
use crate::memtable::Memtable;

/// Bytes before the key: type (1) + key_len (4) + value_len (4).
pub(crate) const RECORD_HEADER_LEN: usize = 9;

/// Trailing checksum width.
pub(crate) const RECORD_CRC_LEN: usize = 4;

/// Declared key lengths above this are treated as corruption.
const MAX_KEY_LEN: usize = 10 * 1024 * 1024;

/// Declared value lengths above this are treated as corruption.
const MAX_VALUE_LEN: usize = 100 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// Discriminant byte of a WAL record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Put = 0,
    Delete = 1,
}

/// A single logged mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a record from an engine-level write. An absent value means
    /// deletion and selects [`RecordType::Delete`]; the payload is then
    /// empty.
    pub fn new(key: &[u8], value: Option<&[u8]>) -> Self {
        match value {
            Some(value) => Self {
                record_type: RecordType::Put,
                key: key.to_vec(),
                value: value.to_vec(),
            },
            None => Self {
                record_type: RecordType::Delete,
                key: key.to_vec(),
                value: Vec::new(),
            },
        }
    }

    /// Encodes the record, appending the CRC over header + key + value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            RECORD_HEADER_LEN + self.key.len() + self.value.len() + RECORD_CRC_LEN,
        );
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_be_bytes());
        buf
    }
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

/// Append-only log file owned by one memtable.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Bytes appended since open, or recovered by replay.
    written: u64,
    auto_sync: bool,
    debug: bool,
}

impl Wal {
    /// Opens (or creates) the log at `path` in append mode.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            written: 0,
            auto_sync: config.auto_sync,
            debug: config.is_debug,
        })
    }

    /// Appends one record. `None` for the value logs a deletion.
    pub fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), WalError> {
        let encoded = Record::new(key, value).encode();
        self.file.write_all(&encoded)?;
        if self.auto_sync {
            self.file.sync_all()?;
        }
        self.written += encoded.len() as u64;
        Ok(())
    }

    /// Bytes appended to this handle (after replay: bytes of complete
    /// records in the file).
    pub fn size(&self) -> u64 {
        self.written
    }

    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs, closes, and unlinks the log file. Consumes the handle —
    /// callers only delete a WAL whose contents are persisted in a run.
    pub fn delete(self) -> Result<(), WalError> {
        self.file.sync_all()?;
        let path = self.path.clone();
        drop(self);
        fs::remove_file(path)?;
        Ok(())
    }

    /// Replays the whole file from offset zero into `memtable`.
    ///
    /// Delete records remove the key (absence is ignored); put records
    /// insert it. See the module docs for the torn-tail and corruption
    /// rules. On return, [`size`](Self::size) reflects the bytes of
    /// complete records consumed.
    pub fn replay_into(&mut self, memtable: &mut Memtable) -> Result<(), WalError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;

        let mut offset = 0usize;
        while offset < buf.len() {
            let remaining = buf.len() - offset;
            if remaining < RECORD_HEADER_LEN {
                warn!(
                    path = %self.path.display(),
                    remaining,
                    "partial record header at WAL tail, stopping replay"
                );
                break;
            }

            let record_type = buf[offset];
            let key_len =
                u32::from_be_bytes(buf[offset + 1..offset + 5].try_into().unwrap()) as usize;
            let value_len =
                u32::from_be_bytes(buf[offset + 5..offset + 9].try_into().unwrap()) as usize;

            if key_len > MAX_KEY_LEN || value_len > MAX_VALUE_LEN {
                warn!(
                    path = %self.path.display(),
                    offset, key_len, value_len,
                    "implausible record lengths, treating as corruption and stopping replay"
                );
                break;
            }

            let total = RECORD_HEADER_LEN + key_len + value_len + RECORD_CRC_LEN;
            if remaining < total {
                warn!(
                    path = %self.path.display(),
                    offset,
                    needed = total,
                    remaining,
                    "partial record at WAL tail, stopping replay"
                );
                break;
            }

            let body_end = offset + RECORD_HEADER_LEN + key_len + value_len;
            let key = &buf[offset + RECORD_HEADER_LEN..offset + RECORD_HEADER_LEN + key_len];
            let value = &buf[offset + RECORD_HEADER_LEN + key_len..body_end];

            let stored_crc =
                u32::from_be_bytes(buf[body_end..body_end + RECORD_CRC_LEN].try_into().unwrap());
            let mut hasher = Crc32::new();
            hasher.update(&buf[offset..body_end]);
            let computed_crc = hasher.finalize();
            if stored_crc != computed_crc {
                warn!(
                    path = %self.path.display(),
                    offset, stored_crc, computed_crc,
                    "record checksum mismatch"
                );
            }

            if self.debug {
                trace!(
                    offset,
                    record_type,
                    key_len,
                    value_len,
                    "replaying record"
                );
            }

            if record_type == RecordType::Delete as u8 {
                memtable.delete(key);
            } else {
                memtable.put(key, value);
            }

            offset += total;
        }

        self.written = offset as u64;
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            error!(path = %self.path.display(), "failed to sync WAL on drop: {e}");
        }
    }
}
