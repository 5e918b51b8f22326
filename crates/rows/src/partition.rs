//! Partitions, materialized and streamed.

use crate::deletion::DeletionTime;
use crate::error::DecodeError;
use crate::row::{Row, Unfiltered};
use crate::schema::TableMetadata;
use crate::token::DecoratedKey;

/// A partition whose row sequence is produced lazily, one entry per
/// `next()` call.
///
/// This is what segment writers consume: the header accessors are valid
/// before iteration starts, and the iterator must be drained by the consumer
/// within the call it was handed over in. A consumer must check
/// [`failure`](UnfilteredPartition::failure) after draining and must not
/// commit the partition when it reports one.
pub trait UnfilteredPartition: Iterator<Item = Unfiltered> {
    fn metadata(&self) -> &TableMetadata;
    fn partition_key(&self) -> &DecoratedKey;
    fn partition_level_deletion(&self) -> DeletionTime;
    fn static_row(&self) -> &Row;

    /// The error that ended iteration early, if any.
    fn failure(&self) -> Option<&DecodeError> {
        None
    }
}

/// A fully materialized partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: DecoratedKey,
    pub deletion: DeletionTime,
    pub static_row: Row,
    pub unfiltereds: Vec<Unfiltered>,
}

impl Partition {
    #[must_use]
    pub fn new(key: DecoratedKey) -> Self {
        Self {
            key,
            deletion: DeletionTime::LIVE,
            static_row: Row::empty_static(),
            unfiltereds: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_deletion(mut self, deletion: DeletionTime) -> Self {
        self.deletion = deletion;
        self
    }

    #[must_use]
    pub fn with_static_row(mut self, row: Row) -> Self {
        self.static_row = row;
        self
    }

    #[must_use]
    pub fn with(mut self, unfiltered: impl Into<Unfiltered>) -> Self {
        self.unfiltereds.push(unfiltered.into());
        self
    }

    /// Streams this partition through the [`UnfilteredPartition`] interface.
    pub fn iter<'a>(&'a self, metadata: &'a TableMetadata) -> PartitionIter<'a> {
        PartitionIter {
            metadata,
            partition: self,
            pos: 0,
        }
    }

    /// Drains `source` into a materialized partition.
    pub fn collect_from(source: &mut dyn UnfilteredPartition) -> Partition {
        let key = source.partition_key().clone();
        let deletion = source.partition_level_deletion();
        let static_row = source.static_row().clone();
        let unfiltereds = source.collect();
        Partition {
            key,
            deletion,
            static_row,
            unfiltereds,
        }
    }
}

/// Borrowing [`UnfilteredPartition`] over a materialized [`Partition`].
pub struct PartitionIter<'a> {
    metadata: &'a TableMetadata,
    partition: &'a Partition,
    pos: usize,
}

impl Iterator for PartitionIter<'_> {
    type Item = Unfiltered;

    fn next(&mut self) -> Option<Unfiltered> {
        let item = self.partition.unfiltereds.get(self.pos)?.clone();
        self.pos += 1;
        Some(item)
    }
}

impl UnfilteredPartition for PartitionIter<'_> {
    fn metadata(&self) -> &TableMetadata {
        self.metadata
    }

    fn partition_key(&self) -> &DecoratedKey {
        &self.partition.key
    }

    fn partition_level_deletion(&self) -> DeletionTime {
        self.partition.deletion
    }

    fn static_row(&self) -> &Row {
        &self.partition.static_row
    }
}
