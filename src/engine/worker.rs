//! Background flush worker.
//!
//! One thread owns the receiving end of the engine's signal channel and
//! wakes on a flush signal, a level-0 overflow signal, or a one-second
//! tick. The tick makes progress inevitable even if every buffered signal
//! was lost, so senders may treat the channel as lossy where noted.
//!
//! Only one flush pass runs at a time (`flush_in_progress` CAS). A pass
//! drains the frozen queue oldest-first. Each entry is moved into the
//! engine's in-flight slot — still visible to readers — while its run is
//! written with no latch held; the WAL is deleted only after the run node
//! is installed at level 0. A failed write leaves the entry in the slot
//! and the next wake-up retries, so no frozen records are ever dropped.
//! After draining, an over-threshold level 0 emits an overflow signal.
//!
//! Merging level 0 downward is an extension point. The intended shape:
//! pick a level-0 run, collect the level-0 runs overlapping its key range
//! plus the level-1 runs overlapping that union, merge newest-wins in
//! engine key order, split the output into disjoint level-1 runs, and
//! swap the input set for the output set under the write latch.

use std::{
    fs,
    sync::{
        atomic::Ordering,
        mpsc::{Receiver, RecvTimeoutError, TrySendError},
        Arc,
    },
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::memtable::MemtableIter;
use crate::sstable::{SstError, SstReader, SstWriter};

use super::{utils, Node, Shared, Signal};

/// Capacity of the buffered signal channel.
pub(crate) const SIGNAL_BUFFER: usize = 100;

/// Level-0 run count above which an overflow signal is raised.
pub(crate) const LEVEL0_COMPACT_THRESHOLD: usize = 4;

const TICK: Duration = Duration::from_secs(1);

pub(crate) fn run(shared: Arc<Shared>, signals: Receiver<Signal>) {
    debug!("flush worker started");
    loop {
        let signal = signals.recv_timeout(TICK);
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        match signal {
            Ok(Signal::Flush) | Err(RecvTimeoutError::Timeout) => flush_if_pending(&shared),
            Ok(Signal::Level0Overflow) => compact_level0(&shared),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("flush worker exiting");
}

/// Runs one flush pass unless another is already in flight.
fn flush_if_pending(shared: &Shared) {
    let pending = match shared.state.read() {
        Ok(state) => !state.frozen.is_empty() || state.in_flight.is_some(),
        Err(_) => {
            error!("state lock poisoned, skipping flush");
            return;
        }
    };
    if !pending {
        return;
    }

    if shared
        .flush_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("flush already in progress, ignoring wake-up");
        return;
    }
    drain_frozen(shared);
    shared.flush_in_progress.store(false, Ordering::SeqCst);
}

/// Flushes frozen memtables oldest-first until the queue is empty or a
/// flush fails, then checks the level-0 population.
fn drain_frozen(shared: &Shared) {
    loop {
        // O(1) under the write latch: move the oldest frozen entry into
        // the in-flight slot (unless a previous failed attempt left one
        // there). Readers keep probing the slot while the run is written.
        match shared.state.write() {
            Ok(mut state) => {
                if state.in_flight.is_none() {
                    match state.frozen.pop_front() {
                        Some(entry) => {
                            debug!(
                                remaining = state.frozen.len(),
                                "took frozen memtable for flush"
                            );
                            state.in_flight = Some(entry);
                        }
                        None => break,
                    }
                }
            }
            Err(_) => {
                error!("state lock poisoned, aborting flush pass");
                return;
            }
        }

        // Snapshot under the read latch only; the file I/O below runs
        // with no latch held at all.
        let snapshot = match shared.state.read() {
            Ok(state) => state.in_flight.as_ref().map(|entry| entry.memtable.iter()),
            Err(_) => {
                error!("state lock poisoned, aborting flush pass");
                return;
            }
        };
        let Some(snapshot) = snapshot else { break };

        if !flush_in_flight(shared, snapshot) {
            // Entry stays in the slot; the next wake-up retries.
            return;
        }
    }

    let level0 = match shared.state.read() {
        Ok(state) => state.levels[0].len(),
        Err(_) => return,
    };
    if level0 > LEVEL0_COMPACT_THRESHOLD {
        match shared.signal_tx.try_send(Signal::Level0Overflow) {
            Ok(()) => debug!(level0, "raised level-0 overflow signal"),
            // Lossy by design; the next drain re-raises it.
            Err(TrySendError::Full(_)) => warn!("signal channel full, overflow signal dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Writes the in-flight memtable as a level-0 run, installs the node, and
/// deletes the WAL. Returns `false` on failure, leaving the entry in the
/// in-flight slot.
fn flush_in_flight(shared: &Shared, snapshot: MemtableIter) -> bool {
    if snapshot.is_empty() {
        debug!("frozen memtable is empty, skipping run write");
        retire_in_flight(shared);
        return true;
    }
    let entry_count = snapshot.len();

    let seq = shared.level_seq[0].fetch_add(1, Ordering::SeqCst);
    let path = utils::sst_path(&shared.config, 0, seq);
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            error!("failed to create run directory: {e}");
            return false;
        }
    }

    if let Err(e) = write_run(&path, snapshot, shared) {
        error!(path = %path.display(), "failed to write run: {e}");
        if let Err(e) = fs::remove_file(&path) {
            debug!("could not remove partial run file: {e}");
        }
        return false;
    }

    let reader = match SstReader::open(&path) {
        Ok(reader) => reader,
        Err(e) => {
            error!(path = %path.display(), "failed to open freshly written run: {e}");
            let _ = fs::remove_file(&path);
            return false;
        }
    };

    match shared.state.write() {
        Ok(mut state) => {
            state.levels[0].push(Node {
                level: 0,
                seq,
                reader,
            });
            info!(
                path = %path.display(),
                entries = entry_count,
                level0 = state.levels[0].len(),
                "flushed frozen memtable to level 0"
            );
        }
        Err(_) => {
            error!("state lock poisoned, run not installed");
            return false;
        }
    }

    // Only now is the WAL redundant.
    retire_in_flight(shared);
    true
}

/// Takes the in-flight entry out of the engine state and deletes its WAL.
fn retire_in_flight(shared: &Shared) {
    let entry = match shared.state.write() {
        Ok(mut state) => state.in_flight.take(),
        Err(_) => {
            error!("state lock poisoned while retiring in-flight memtable");
            return;
        }
    };
    let Some(mut entry) = entry else { return };
    if let Some(wal) = entry.wal.take() {
        let path = wal.path().to_path_buf();
        match wal.delete() {
            Ok(()) => debug!(path = %path.display(), "deleted flushed WAL"),
            Err(e) => error!(path = %path.display(), "failed to delete WAL: {e}"),
        }
    }
}

fn write_run(
    path: &std::path::Path,
    snapshot: MemtableIter,
    shared: &Shared,
) -> Result<(), SstError> {
    let mut writer = SstWriter::create(path, &shared.config)?;
    writer.write(snapshot)
}

/// Deeper-compaction hook, reached via the level-0 overflow signal.
fn compact_level0(shared: &Shared) {
    let level0 = match shared.state.read() {
        Ok(state) => state.levels[0].len(),
        Err(_) => return,
    };
    if level0 <= LEVEL0_COMPACT_THRESHOLD {
        debug!(level0, "level 0 back under threshold, nothing to merge");
        return;
    }
    info!(
        level0,
        threshold = LEVEL0_COMPACT_THRESHOLD,
        "level 0 over threshold; merge into level 1 not implemented"
    );
}
