//! Collaborators of a transfer.
//!
//! The receiver only talks to the rest of the node through these traits,
//! so a node host (or a test) decides where tables, ranges and segment
//! files come from.

use std::sync::Arc;

use uuid::Uuid;

use rows::{EncodingStats, TableId, TableMetadata, TokenRange, UnfilteredPartition};

use crate::descriptor::SSTableFormat;
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Progress of one file, reported after every partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressInfo {
    pub peer: String,
    /// `<segment filename>-<file sequence number>`.
    pub file_name: String,
    pub direction: Direction,
    pub bytes_read: u64,
    pub total_size: u64,
}

/// The stream session a segment belongs to.
pub trait StreamSession: Send + Sync {
    fn plan_id(&self) -> Uuid;
    fn peer(&self) -> &str;
    fn pending_repair(&self) -> Option<Uuid>;
    fn progress(&self, info: ProgressInfo);
    /// Polled before every partition.
    fn is_cancelled(&self) -> bool;
}

/// Local schema lookup.
pub trait TableCatalog: Send + Sync {
    /// `None` if the table does not exist (any more).
    fn table(&self, id: TableId) -> Option<Arc<TableMetadata>>;
}

/// Token ranges this node owns or is about to own.
pub trait RangeOracle: Send + Sync {
    /// Local and pending ranges of `keyspace`, normalized.
    fn owned_ranges(&self, keyspace: &str) -> Vec<TokenRange>;
}

/// What a writer needs to know before the first partition arrives.
#[derive(Debug, Clone)]
pub struct WriterParams {
    pub metadata: Arc<TableMetadata>,
    pub estimated_keys: u64,
    /// Declared size of the incoming segment, used to pick a location.
    pub total_size: u64,
    pub repaired_at: i64,
    pub pending_repair: Option<Uuid>,
    pub format: SSTableFormat,
    pub level: u32,
    pub encoding_stats: EncodingStats,
    pub file_seq_num: u32,
}

/// Creates the local writer of one incoming segment.
pub trait WriterFactory {
    type Writer: SegmentWriter;

    /// # Errors
    ///
    /// [`StreamError::NoSpace`] if no location can hold
    /// `params.total_size`, [`StreamError::Setup`] for any other failure.
    fn create_writer(&self, params: &WriterParams) -> Result<Self::Writer, StreamError>;
}

/// Local destination of the decoded partitions.
pub trait SegmentWriter {
    /// Writes one partition, draining it completely before returning.
    /// Fails without keeping the partition when
    /// [`UnfilteredPartition::failure`] reports an error after draining.
    fn append(&mut self, partition: &mut dyn UnfilteredPartition) -> anyhow::Result<()>;

    /// Discards everything written so far.
    fn abort(&mut self, cause: &StreamError);

    fn filename(&self) -> String;
}
