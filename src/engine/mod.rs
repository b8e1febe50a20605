//! # LSM storage engine
//!
//! The engine layers a mutable memtable over a FIFO of frozen memtables
//! over per-level lists of immutable sorted runs:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Engine                          │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────┐  │
//! │  │  Mutable   │   │   Frozen     │   │ Sorted runs│  │
//! │  │  memtable  │──▶│  memtables   │──▶│ (level 0..)│  │
//! │  │  + WAL     │   │  (each+WAL)  │   │            │  │
//! │  └────────────┘   └──────────────┘   └────────────┘  │
//! │     rotation        background flush                 │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Writes append to the current WAL first, then land in the mutable
//! memtable. Once the WAL outgrows `memtable_cap_size`, the pair is
//! frozen, a fresh memtable/WAL takes over, and the background worker is
//! signalled to flush the frozen pair into a level-0 run (deleting its WAL
//! afterwards). Reads probe the layers newest-first and stop at the first
//! binding; an empty value is a visible deletion, distinct from not-found.
//!
//! ## Concurrency model
//!
//! One `RwLock` guards the structural state (memtable pointer, frozen
//! queue, current WAL, level lists). `put` holds the write latch across
//! WAL append + memtable insert + possible rotation, so a record is
//! durable before any concurrent reader can observe it and rotations are
//! never partially visible. `get` holds the read latch for the whole
//! probe. The flush worker takes the write latch only for O(1)
//! transitions — popping a frozen entry, installing a run node — and does
//! its file I/O with no latch held.
//!
//! ## Durability
//!
//! With `auto_sync` every record hits disk before `put` returns; without
//! it, durability is provided by a clean [`close`](Engine::close) (WALs
//! are synced) or the OS cache. WAL files are deleted only after the run
//! that subsumes them is installed at level 0.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

pub(crate) mod utils;
mod worker;

use std::{
    collections::VecDeque,
    fs, io,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc, Mutex, RwLock,
    },
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_MAX_LEVEL};
use crate::memtable::Memtable;
use crate::sstable::{SstError, SstReader};
use crate::wal::{Wal, WalError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// WAL append or replay failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Sorted-run read or write failure.
    #[error("sorted run error: {0}")]
    Sst(#[from] SstError),

    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A managed directory holds a file the engine cannot account for.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Operation on a closed engine.
    #[error("engine is closed")]
    Closed,

    /// Poisoned lock or violated internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Internal state
// ------------------------------------------------------------------------------------------------

/// Control messages for the background worker.
pub(crate) enum Signal {
    /// A frozen memtable is waiting to be flushed (must-deliver).
    Flush,
    /// Level 0 outgrew its threshold (lossy).
    Level0Overflow,
}

/// A memtable that stopped accepting writes, paired with the WAL that
/// holds its records. The WAL lives until the flush worker has persisted
/// the memtable as a run; `None` only when the engine had to run without
/// durability (see [`Engine::put`] rotation fallback).
pub(crate) struct FrozenMemtable {
    pub(crate) memtable: Memtable,
    pub(crate) wal: Option<Wal>,
}

/// An open reader on one sorted-run file.
pub(crate) struct Node {
    pub(crate) level: usize,
    pub(crate) seq: u32,
    pub(crate) reader: SstReader,
}

/// Structural state guarded by the engine latch.
pub(crate) struct EngineState {
    pub(crate) memtable: Memtable,
    pub(crate) current_wal: Option<Wal>,
    pub(crate) wal_id: u32,
    /// Frozen memtables in freeze order, oldest first.
    pub(crate) frozen: VecDeque<FrozenMemtable>,
    /// The frozen memtable currently being flushed. Held here (not
    /// popped into the worker) so readers keep seeing its records until
    /// the replacing run node is installed.
    pub(crate) in_flight: Option<FrozenMemtable>,
    /// Run nodes per level, append order (freshest last at level 0).
    pub(crate) levels: Vec<Vec<Node>>,
}

/// State shared between the engine handle and the flush worker.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) state: RwLock<EngineState>,
    /// Next run sequence number per level.
    pub(crate) level_seq: Vec<AtomicU32>,
    pub(crate) signal_tx: SyncSender<Signal>,
    /// Single-flights flush passes.
    pub(crate) flush_in_progress: AtomicBool,
    /// Cleared by `close`; the worker exits on its next wake-up.
    pub(crate) running: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// Embedded LSM-tree key/value store.
///
/// All methods take `&self`; share the engine across threads with an
/// `Arc`. [`close`](Self::close) (also run on drop) stops the worker and
/// releases every file handle.
pub struct Engine {
    shared: Arc<Shared>,
    closed: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Opens the engine rooted at `config.data_dir`.
    ///
    /// Creates the directory layout if missing, opens every run file
    /// found in the run directory, replays every WAL (older WALs become
    /// frozen memtables queued for flush; the newest becomes the mutable
    /// memtable), and starts the background worker.
    pub fn open(config: &Config) -> Result<Self, EngineError> {
        let mut config = config.clone();
        if config.max_level == 0 {
            config.max_level = DEFAULT_MAX_LEVEL;
        }

        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(utils::wal_dir(&config))?;
        fs::create_dir_all(utils::sst_dir(&config))?;

        let (signal_tx, signal_rx): (SyncSender<Signal>, Receiver<Signal>) =
            mpsc::sync_channel(worker::SIGNAL_BUFFER);

        let mut state = EngineState {
            memtable: Memtable::new(),
            current_wal: None,
            wal_id: 0,
            frozen: VecDeque::new(),
            in_flight: None,
            levels: (0..config.max_level).map(|_| Vec::new()).collect(),
        };
        let level_seq: Vec<AtomicU32> =
            (0..config.max_level).map(|_| AtomicU32::new(0)).collect();

        load_runs(&config, &mut state, &level_seq)?;
        let pending_flushes = load_wals(&config, &mut state)?;

        info!(
            data_dir = %config.data_dir.display(),
            runs = state.levels.iter().map(Vec::len).sum::<usize>(),
            frozen = pending_flushes,
            wal_id = state.wal_id,
            "engine opened"
        );

        let shared = Arc::new(Shared {
            config,
            state: RwLock::new(state),
            level_seq,
            signal_tx,
            flush_in_progress: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("siltdb-flush".to_string())
            .spawn(move || worker::run(worker_shared, signal_rx))?;

        // Replayed frozen memtables need flushing; the buffered channel
        // holds the signals until the worker drains them.
        for _ in 0..pending_flushes {
            let _ = shared.signal_tx.try_send(Signal::Flush);
        }

        Ok(Self {
            shared,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Inserts or updates a key.
    ///
    /// An empty value is legal and is exactly how a deletion looks to
    /// readers; see [`delete`](Self::delete).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.write(key, Some(value))
    }

    /// Deletes a key.
    ///
    /// Defined as a put of an absent value: the WAL logs a delete record,
    /// the memtable holds an empty value, and after a flush the binding
    /// survives as `(key, empty)`. `get` therefore reports a deleted key
    /// as `Some` of an empty vector, not as `None`.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.write(key, None)
    }

    fn write(&self, key: &[u8], value: Option<&[u8]>) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }

        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| EngineError::Internal("state lock poisoned".into()))?;

        // WAL first; a failed append fails the whole call before the
        // memtable changes.
        if let Some(wal) = state.current_wal.as_mut() {
            wal.append(key, value)?;
        }
        state.memtable.put(key, value.unwrap_or_default());

        let wal_size = state.current_wal.as_ref().map_or(0, Wal::size);
        if wal_size > self.shared.config.memtable_cap_size {
            rotate(&self.shared, &mut state);
        }
        Ok(())
    }

    /// Point lookup.
    ///
    /// Probes the mutable memtable, then frozen memtables newest-first,
    /// then each level from 0 upward (level 0 newest-first since its runs
    /// may overlap; deeper levels are disjoint). Returns `Ok(None)` when
    /// no layer holds a binding.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }

        let state = self
            .shared
            .state
            .read()
            .map_err(|_| EngineError::Internal("state lock poisoned".into()))?;

        if let Some(value) = state.memtable.get(key) {
            return Ok(Some(value));
        }
        for frozen in state.frozen.iter().rev() {
            if let Some(value) = frozen.memtable.get(key) {
                return Ok(Some(value));
            }
        }
        // The entry being flushed is older than everything queued.
        if let Some(in_flight) = &state.in_flight {
            if let Some(value) = in_flight.memtable.get(key) {
                return Ok(Some(value));
            }
        }
        for (level, nodes) in state.levels.iter().enumerate() {
            let hit = if level == 0 {
                probe_nodes(nodes.iter().rev(), key)
            } else {
                probe_nodes(nodes.iter(), key)
            };
            if hit.is_some() {
                return Ok(hit);
            }
        }
        Ok(None)
    }

    /// Shuts the engine down. Idempotent; the second call is a no-op.
    ///
    /// Stops and joins the worker (a flush already underway finishes
    /// first), syncs and closes the current and all frozen WALs — their
    /// files stay on disk for replay — and drops every run reader.
    pub fn close(&self) -> Result<(), EngineError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("close called on an already-closed engine");
            return Ok(());
        }
        info!("closing engine");

        self.shared.running.store(false, Ordering::SeqCst);
        let _ = self.shared.signal_tx.try_send(Signal::Flush);
        let handle = self
            .worker
            .lock()
            .map_err(|_| EngineError::Internal("worker handle lock poisoned".into()))?
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("flush worker panicked");
            }
        }

        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| EngineError::Internal("state lock poisoned".into()))?;
        if let Some(mut wal) = state.current_wal.take() {
            if let Err(e) = wal.sync() {
                error!("failed to sync current WAL on close: {e}");
            }
        }
        while let Some(mut frozen) = state.frozen.pop_front() {
            if let Some(mut wal) = frozen.wal.take() {
                if let Err(e) = wal.sync() {
                    error!("failed to sync frozen WAL on close: {e}");
                }
            }
        }
        if let Some(mut in_flight) = state.in_flight.take() {
            if let Some(mut wal) = in_flight.wal.take() {
                if let Err(e) = wal.sync() {
                    error!("failed to sync in-flight WAL on close: {e}");
                }
            }
        }
        for nodes in state.levels.iter_mut() {
            nodes.clear();
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ------------------------------------------------------------------------------------------------
// Write-path helpers
// ------------------------------------------------------------------------------------------------

/// Freezes the current memtable/WAL pair and installs fresh ones.
/// Runs under the write latch.
fn rotate(shared: &Shared, state: &mut EngineState) {
    let memtable = std::mem::take(&mut state.memtable);
    let wal = state.current_wal.take();
    state.frozen.push_back(FrozenMemtable { memtable, wal });
    debug!(frozen = state.frozen.len(), "rotated memtable");

    state.wal_id += 1;
    let path = utils::wal_path(&shared.config, state.wal_id);
    state.current_wal = match Wal::open(&path, &shared.config) {
        Ok(wal) => Some(wal),
        Err(e) => {
            error!(path = %path.display(), "failed to create WAL: {e}");
            let fallback = std::env::temp_dir().join(format!("siltdb_{}.wal", nanos_now()));
            match Wal::open(&fallback, &shared.config) {
                Ok(wal) => {
                    warn!(path = %fallback.display(), "writing WAL in temporary directory");
                    Some(wal)
                }
                Err(e) => {
                    error!("failed to create fallback WAL: {e}; continuing without durability");
                    None
                }
            }
        }
    };

    // The flush signal must arrive: hand a full channel off to a helper
    // thread rather than dropping the send.
    match shared.signal_tx.try_send(Signal::Flush) {
        Ok(()) => {}
        Err(TrySendError::Full(signal)) => {
            warn!("signal channel full, delivering flush signal from a helper thread");
            let tx = shared.signal_tx.clone();
            thread::spawn(move || {
                let _ = tx.send(signal);
            });
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

fn nanos_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_nanos()
}

// ------------------------------------------------------------------------------------------------
// Read-path helpers
// ------------------------------------------------------------------------------------------------

/// Probes run nodes in the given order; a node-level read error is logged
/// and that node skipped, so one damaged run cannot fail every read.
fn probe_nodes<'a>(nodes: impl Iterator<Item = &'a Node>, key: &[u8]) -> Option<Vec<u8>> {
    for node in nodes {
        match node.reader.get(key) {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => warn!(level = node.level, seq = node.seq, "run read failed: {e}"),
        }
    }
    None
}

// ------------------------------------------------------------------------------------------------
// Startup loading
// ------------------------------------------------------------------------------------------------

/// Opens every run file under the run directory, sorted by `(level, seq)`,
/// and advances each level's sequence counter past the highest seq seen.
fn load_runs(
    config: &Config,
    state: &mut EngineState,
    level_seq: &[AtomicU32],
) -> Result<(), EngineError> {
    let mut found: Vec<(usize, u32)> = Vec::new();
    for entry in fs::read_dir(utils::sst_dir(config))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some((level, seq)) = utils::parse_sst_filename(&name) else {
            return Err(EngineError::Corruption(format!(
                "unrecognized file in run directory: {name}"
            )));
        };
        if level >= state.levels.len() {
            return Err(EngineError::Corruption(format!(
                "run {name} is above the configured level count"
            )));
        }
        found.push((level, seq));
    }
    found.sort_unstable();

    for (level, seq) in found {
        let path = utils::sst_path(config, level, seq);
        let reader = SstReader::open(&path)?;
        state.levels[level].push(Node { level, seq, reader });
        level_seq[level].fetch_max(seq + 1, Ordering::SeqCst);
    }
    Ok(())
}

/// Replays WAL files in id order. All but the newest become frozen
/// memtables awaiting flush; the newest is installed as the mutable
/// memtable with its WAL as current. Returns how many frozen entries
/// need a flush signal.
fn load_wals(config: &Config, state: &mut EngineState) -> Result<usize, EngineError> {
    let mut ids: Vec<u32> = Vec::new();
    for entry in fs::read_dir(utils::wal_dir(config))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(id) = utils::parse_wal_filename(&name) else {
            return Err(EngineError::Corruption(format!(
                "unrecognized file in WAL directory: {name}"
            )));
        };
        ids.push(id);
    }
    ids.sort_unstable();

    let Some((&last, rest)) = ids.split_last() else {
        state.current_wal = Some(Wal::open(utils::wal_path(config, 0), config)?);
        state.wal_id = 0;
        return Ok(0);
    };

    for &id in rest {
        let mut wal = Wal::open(utils::wal_path(config, id), config)?;
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable)?;
        debug!(id, entries = memtable.len(), "replayed WAL into frozen memtable");
        state.frozen.push_back(FrozenMemtable {
            memtable,
            wal: Some(wal),
        });
    }

    let mut wal = Wal::open(utils::wal_path(config, last), config)?;
    let mut memtable = Memtable::new();
    wal.replay_into(&mut memtable)?;
    debug!(id = last, entries = memtable.len(), "replayed WAL into mutable memtable");
    state.memtable = memtable;
    state.current_wal = Some(wal);
    // Resume the id sequence where the newest file left off, so the next
    // rotation cannot collide with an existing file.
    state.wal_id = last;

    Ok(rest.len())
}
