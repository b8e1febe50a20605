//! Filename conventions for the engine's managed directories.
//!
//! WAL files are `<wal_dir>/<id>.wal`; sorted runs are
//! `<sst_dir>/<level>_<seq>.sst`. The `(level, seq)` pair uniquely
//! identifies a run, and startup recovers both counters from these names.

use std::path::PathBuf;

use crate::config::Config;

pub(crate) fn wal_dir(config: &Config) -> PathBuf {
    config.data_dir.join(&config.wal_dir)
}

pub(crate) fn sst_dir(config: &Config) -> PathBuf {
    config.data_dir.join(&config.sst_dir)
}

pub(crate) fn wal_path(config: &Config, id: u32) -> PathBuf {
    wal_dir(config).join(format!("{id}.wal"))
}

pub(crate) fn sst_path(config: &Config, level: usize, seq: u32) -> PathBuf {
    sst_dir(config).join(format!("{level}_{seq}.sst"))
}

/// Parses `<id>.wal`. `None` for anything else.
pub(crate) fn parse_wal_filename(name: &str) -> Option<u32> {
    name.strip_suffix(".wal")?.parse().ok()
}

/// Parses `<level>_<seq>.sst`. `None` for anything else.
pub(crate) fn parse_sst_filename(name: &str) -> Option<(usize, u32)> {
    let stem = name.strip_suffix(".sst")?;
    let (level, seq) = stem.split_once('_')?;
    Some((level.parse().ok()?, seq.parse().ok()?))
}
