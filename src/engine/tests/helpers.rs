use std::path::Path;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Initialize the tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config rooted at `dir` that should never rotate (large cap).
pub fn memtable_only_config(dir: &Path) -> Config {
    init_tracing();
    Config {
        data_dir: dir.to_path_buf(),
        memtable_cap_size: 64 * 1024,
        ..Config::default()
    }
}

/// Config rooted at `dir` with a tiny cap so rotations and background
/// flushes happen after a handful of writes.
pub fn small_cap_config(dir: &Path) -> Config {
    init_tracing();
    Config {
        data_dir: dir.to_path_buf(),
        memtable_cap_size: 64,
        block_size: 128,
        ..Config::default()
    }
}

/// Polls `cond` until it holds or `timeout` elapses; returns the final
/// evaluation.
pub fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

/// Number of regular files in a directory (0 when it does not exist).
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

/// Waits until every frozen memtable has been flushed: the WAL directory
/// is down to at most one (the current) file.
pub fn wait_for_flushes(config: &Config) -> bool {
    let wal_dir = config.data_dir.join(&config.wal_dir);
    wait_for(|| file_count(&wal_dir) <= 1, Duration::from_secs(10))
}
