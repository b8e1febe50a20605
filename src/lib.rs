//! # siltdb
//!
//! An embedded, single-process key/value storage engine built as a
//! log-structured merge-tree (LSM-tree). Writes are made durable through
//! a write-ahead log, served from an in-memory table, and reorganized in
//! the background into immutable sorted runs with per-block bloom filters.
//!
//! ## Architecture
//!
//! ```text
//! put ──▶ WAL append ──▶ memtable insert ──▶ (over threshold?)
//!                                               │ freeze + rotate
//!                                               ▼
//!                                      frozen queue ──▶ flush worker
//!                                                          │
//!                                                          ▼
//!                                               level-0 sorted runs
//!
//! get ──▶ memtable ──▶ frozen (newest first) ──▶ runs, level by level
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core engine — open, put, get, delete, rotation, flush, close |
//! | [`memtable`] | Ordered in-memory write buffer |
//! | [`wal`] | CRC-protected append-only log with torn-tail-tolerant replay |
//! | [`sstable`] | Immutable sorted runs: writer, mmap reader, iterator |
//! | [`filter`] | Persistable fixed-seed bloom filter |
//! | [`keys`] | The length-first key order used everywhere |
//! | [`config`] | Recognized options |
//!
//! ## Semantics worth knowing
//!
//! - **Key order** is length first, then lexicographic: `"z"` < `"aa"`.
//! - **Deletes are empty values.** `delete(k)` logs a delete record, and
//!   once flushed the binding reads back as `Some(empty)` — distinct from
//!   `None` (never written).
//! - **Durability** is per-write with `auto_sync`, otherwise provided by
//!   a clean `close`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use siltdb::{Config, Engine};
//!
//! let config = Config {
//!     data_dir: "/tmp/siltdb-demo".into(),
//!     ..Config::default()
//! };
//! let engine = Engine::open(&config).unwrap();
//!
//! engine.put(b"hello", b"world").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(Vec::new()));
//!
//! engine.close().unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod filter;
pub mod keys;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use config::Config;
pub use engine::{Engine, EngineError};
