//! # Engine - RiptideKV Receiving Node
//!
//! Ties the [`streaming`] receiver to local storage: the table catalog, the
//! token ranges this node owns, the data directories segments land in, and
//! the manifest recording every accepted segment.
//!
//! ## Architecture
//!
//! ```text
//! Peer
//!   |  (segment bytes + TransferDescriptor)
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ receive_segment()                             │
//! │   StreamReader ──► catalog      (table id)    │
//! │        |       ──► range oracle (keyspace)    │
//! │        |       ──► writer factory             │
//! │        |             writeable_location()     │
//! │        v                                      │
//! │   SSTableWriter.finish() → <dir>/<name>.sst   │
//! │        |                                      │
//! │        v                                      │
//! │   MANIFEST += L<level>:<table-id>:<name>      │
//! │   metrics.load += file size                   │
//! │                                               │
//! │ segments() / open_segment() → SSTableReader   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                              |
//! |-----------------|------------------------------------------------------|
//! | [`lib.rs`]      | `Engine` struct, `open()`, catalog, ownership, `Debug` |
//! | [`receive`]     | `receive_segment()`, the receiver's collaborator traits |
//! | [`directories`] | Space accounting, `writeable_location()`             |
//! | [`recovery`]    | Tmp file cleanup, manifest reconciliation            |
//! | [`manifest`]    | Persistent segment registry (atomic file ops)        |
//!
//! ## Crash Safety
//!
//! A segment is written under a `.sst.tmp` name and renamed only once it is
//! complete; the manifest is updated after the rename. Leftover temp files
//! are deleted on [`Engine::open`], and manifest entries whose file is gone
//! are dropped.
mod directories;
mod manifest;
mod receive;
mod recovery;

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

use config::StreamingConfig;
use rows::{TableId, TableMetadata, TokenRange};
use sstable::SSTableReader;
use streaming::{NoSpamLogger, StorageMetrics, StreamError};

pub use directories::{Directories, Reservation};
pub use manifest::{Manifest, SegmentEntry, MANIFEST_FILENAME};
pub use receive::IncomingSegment;
pub use recovery::cleanup_tmp_files;

/// Ranges of one keyspace.
#[derive(Debug, Clone, Default)]
pub(crate) struct Ownership {
    pub(crate) local: Vec<TokenRange>,
    /// Ranges this node is about to take over.
    pub(crate) pending: Vec<TokenRange>,
}

/// A node's storage side of streaming.
///
/// All methods take `&self`; one engine can receive several segments
/// concurrently.
pub struct Engine {
    pub(crate) config: StreamingConfig,
    pub(crate) directories: Directories,
    pub(crate) tables: RwLock<HashMap<TableId, Arc<TableMetadata>>>,
    pub(crate) ownership: RwLock<HashMap<String, Ownership>>,
    pub(crate) manifest: Mutex<Manifest>,
    pub(crate) metrics: StorageMetrics,
    /// Shared by every transfer so out-of-range warnings are limited
    /// node-wide.
    pub(crate) nospam: NoSpamLogger,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("directories", &self.directories)
            .field("table_count", &self.read_tables().len())
            .field("segment_count", &self.lock_manifest().entries.len())
            .field("load", &self.metrics.load.get())
            .field(
                "invalid_token_ops",
                &self.metrics.total_ops_for_invalid_token.get(),
            )
            .finish()
    }
}

impl Engine {
    /// Opens the engine over `config.data_directories`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create every data directory that does not exist.
    /// 2. Delete leftover `.sst.tmp` files from interrupted transfers.
    /// 3. Load the manifest from the first data directory.
    /// 4. Drop manifest entries whose file is missing; the size of the
    ///    remaining segments seeds the `load` metric.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory is configured, a directory
    /// cannot be created, or the manifest is corrupt.
    pub fn open(config: StreamingConfig) -> Result<Self> {
        let Some(first) = config.data_directories.first() else {
            bail!("at least one data directory is required");
        };
        let manifest_dir = first.path.clone();
        let directories = Directories::new(config.data_directories.clone());

        for dir in directories.paths() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory {}", dir.display()))?;
            recovery::cleanup_tmp_files(dir);
        }

        let mut manifest = Manifest::load_or_create(&manifest_dir)?;
        let load = recovery::reconcile_manifest(&mut manifest, &directories)?;

        let metrics = StorageMetrics::new();
        metrics.load.add(load);
        info!(
            segments = manifest.entries.len(),
            load,
            directories = config.data_directories.len(),
            "engine opened"
        );

        Ok(Self {
            nospam: NoSpamLogger::new(config.out_of_range_log_interval),
            config,
            directories,
            tables: RwLock::new(HashMap::new()),
            ownership: RwLock::new(HashMap::new()),
            manifest: Mutex::new(manifest),
            metrics,
        })
    }

    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &StorageMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    /// Registers `metadata`, replacing any table with the same id.
    pub fn create_table(&self, metadata: TableMetadata) -> Arc<TableMetadata> {
        let metadata = Arc::new(metadata);
        debug!(table_id = %metadata.id, keyspace = %metadata.keyspace, table = %metadata.name, "table created");
        self.write_tables().insert(metadata.id, Arc::clone(&metadata));
        metadata
    }

    /// Removes a table and deletes its segments. Returns `false` if the
    /// table was unknown.
    ///
    /// Transfers already running for the table keep their metadata and
    /// still finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be saved.
    pub fn drop_table(&self, id: TableId) -> Result<bool> {
        let known = self.write_tables().remove(&id).is_some();
        let removed = {
            let mut manifest = self.lock_manifest();
            let removed = manifest.remove_table(id);
            if !removed.is_empty() {
                manifest.save()?;
            }
            removed
        };
        for entry in &removed {
            if let Some(path) = self.directories.locate(&entry.filename) {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                match std::fs::remove_file(&path) {
                    Ok(()) => self.metrics.load.sub(size),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to delete segment of dropped table"),
                }
            }
        }
        if known {
            debug!(table_id = %id, segments = removed.len(), "table dropped");
        }
        Ok(known)
    }

    /// Replaces the ranges `keyspace` is locally replicated on.
    pub fn set_local_ranges(&self, keyspace: &str, ranges: Vec<TokenRange>) {
        self.write_ownership()
            .entry(keyspace.to_string())
            .or_default()
            .local = ranges;
    }

    /// Replaces the ranges this node is about to own for `keyspace`.
    pub fn set_pending_ranges(&self, keyspace: &str, ranges: Vec<TokenRange>) {
        self.write_ownership()
            .entry(keyspace.to_string())
            .or_default()
            .pending = ranges;
    }

    /// Reserves `size` bytes in the directory a segment should be written
    /// to. The space stays reserved until the [`Reservation`] is dropped.
    ///
    /// # Errors
    ///
    /// [`StreamError::NoSpace`] if no directory has `size` bytes left.
    pub fn writeable_location(&self, size: u64) -> Result<Reservation, StreamError> {
        self.directories
            .writeable_location(size)
            .ok_or(StreamError::NoSpace { required: size })
    }

    /// Segments accepted for `table`, oldest first.
    #[must_use]
    pub fn segments(&self, table: TableId) -> Vec<SegmentEntry> {
        self.lock_manifest()
            .for_table(table)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Total number of accepted segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.lock_manifest().entries.len()
    }

    /// Opens an accepted segment for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is no longer known, the file is missing,
    /// or the segment is corrupt.
    pub fn open_segment(&self, entry: &SegmentEntry) -> Result<SSTableReader> {
        let Some(metadata) = self.read_tables().get(&entry.table_id).cloned() else {
            bail!("table {} does not exist", entry.table_id);
        };
        let Some(path) = self.directories.locate(&entry.filename) else {
            bail!("segment {} not found in any data directory", entry.filename);
        };
        SSTableReader::open(&path, metadata)
    }

    pub(crate) fn read_tables(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<TableId, Arc<TableMetadata>>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TableId, Arc<TableMetadata>>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read_ownership(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Ownership>> {
        self.ownership.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_ownership(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Ownership>> {
        self.ownership.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_manifest(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
