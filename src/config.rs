//! Engine configuration.

use std::path::PathBuf;

/// Default target size (bytes) at which a run writer seals a data block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default WAL-byte threshold that triggers memtable rotation.
pub const DEFAULT_MEMTABLE_CAP_SIZE: u64 = 4096;

/// Default number of levels preallocated by the engine.
pub const DEFAULT_MAX_LEVEL: usize = 7;

/// Options recognized by [`Engine::open`](crate::engine::Engine::open).
///
/// All fields have working defaults; a typical embedder only sets
/// `data_dir`:
///
/// ```rust,no_run
/// use siltdb::Config;
///
/// let config = Config {
///     data_dir: "/var/lib/myapp/kv".into(),
///     ..Config::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory holding the WAL and run subdirectories.
    pub data_dir: PathBuf,

    /// Name of the WAL subdirectory under `data_dir`.
    pub wal_dir: String,

    /// Name of the sorted-run subdirectory under `data_dir`.
    pub sst_dir: String,

    /// Byte size past which a run writer starts a new data block.
    pub block_size: usize,

    /// WAL size (bytes) past which the mutable memtable is frozen and a
    /// fresh memtable/WAL pair is installed.
    pub memtable_cap_size: u64,

    /// When true, every WAL append is followed by an fsync. When false,
    /// durability relies on OS buffering until the next sync point.
    pub auto_sync: bool,

    /// Number of levels to preallocate. Zero is normalized to
    /// [`DEFAULT_MAX_LEVEL`].
    pub max_level: usize,

    /// Emit per-record diagnostics during WAL replay.
    pub is_debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_dir: "wal".to_string(),
            sst_dir: "sst".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            memtable_cap_size: DEFAULT_MEMTABLE_CAP_SIZE,
            auto_sync: false,
            max_level: DEFAULT_MAX_LEVEL,
            is_debug: false,
        }
    }
}
