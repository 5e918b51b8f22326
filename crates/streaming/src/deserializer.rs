//! Partition-by-partition decoding of a streamed segment.
//!
//! One partition is decoded at a time, in strict sequence:
//!
//! ```text
//! Start ─read_key─► KeyRead ─read_partition─► DeletionRead ─► StaticRowRead ─► Iterating ─► Exhausted
//!   ▲                                                                                            │
//!   └────────────────────────────────── next read_key ◄──────────────────────────────────────────┘
//! ```
//!
//! [`StreamDeserializer::read_partition`] hands out a [`PartitionStream`]
//! borrowing the deserializer, so the compiler enforces that a partition is
//! never retained past the call that consumes it and that two partitions
//! never interleave.
//!
//! Entries are pulled lazily. [`PartitionStream::try_next`] reports decode
//! failures directly; the `Iterator` impl (which writers consume) cannot,
//! so it stores the failure and ends the iteration. Writers see it through
//! [`UnfilteredPartition::failure`] before committing, and the caller must
//! call [`StreamDeserializer::check_for_exceptions`] once the partition has
//! been consumed.

use std::io::Read;
use std::sync::Arc;

use rows::serialization::{
    read_deletion_time, read_partition_key, CodecContext, PartitionCodec, PartitionState,
};
use rows::{
    ColumnMetadata, DecodeError, DecoratedKey, DeletionTime, DeserializationFlag,
    DeserializationHelper, EncodingStats, FormatVersion, Row, SerializationHeader,
    TableMetadata, Unfiltered, UnfilteredPartition,
};

use crate::cursor::TrackedReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPhase {
    Start,
    KeyRead,
    DeletionRead,
    StaticRowRead,
    Iterating,
    Exhausted,
}

/// Decodes the partitions of one incoming segment.
pub struct StreamDeserializer<R> {
    metadata: Arc<TableMetadata>,
    header: Option<SerializationHeader>,
    version: FormatVersion,
    codec: &'static dyn PartitionCodec,
    helper: DeserializationHelper,
    input: TrackedReader<R>,
    phase: DecoderPhase,
    key: Option<DecoratedKey>,
    deletion: DeletionTime,
    static_row: Row,
    state: PartitionState,
    exception: Option<DecodeError>,
    mark_counters: bool,
}

impl<R: Read> StreamDeserializer<R> {
    /// Prepares decoding of `version`-encoded data for `metadata`.
    ///
    /// Cells are decoded with [`DeserializationFlag::PreserveSize`] so they
    /// are re-serialized exactly as the peer sent them.
    ///
    /// # Errors
    ///
    /// [`DecodeError::MissingHeader`] if `version` needs a serialization
    /// header and none is given.
    pub fn new(
        metadata: Arc<TableMetadata>,
        input: TrackedReader<R>,
        version: FormatVersion,
        header: Option<SerializationHeader>,
    ) -> Result<Self, DecodeError> {
        if version.requires_header() && header.is_none() {
            return Err(DecodeError::MissingHeader(version));
        }
        let mark_counters = metadata.is_counter();
        Ok(Self {
            metadata,
            header,
            version,
            codec: version.codec(),
            helper: DeserializationHelper::new(DeserializationFlag::PreserveSize),
            input,
            phase: DecoderPhase::Start,
            key: None,
            deletion: DeletionTime::LIVE,
            static_row: Row::empty_static(),
            state: PartitionState::default(),
            exception: None,
            mark_counters,
        })
    }

    /// Reads the key of the next partition.
    ///
    /// # Errors
    ///
    /// Returns a failure left unchecked by the previous partition, a decode
    /// error, or `Malformed` if the previous partition was not consumed.
    pub fn read_key(&mut self) -> Result<DecoratedKey, DecodeError> {
        self.check_for_exceptions()?;
        if !matches!(self.phase, DecoderPhase::Start | DecoderPhase::Exhausted) {
            return Err(DecodeError::Malformed(format!(
                "partition {} was not fully consumed",
                display_key(self.key.as_ref())
            )));
        }
        self.key = None;
        self.deletion = DeletionTime::LIVE;
        self.static_row = Row::empty_static();
        self.state = PartitionState::default();

        let key = read_partition_key(&mut self.input, &self.metadata)?;
        self.key = Some(key.clone());
        self.phase = DecoderPhase::KeyRead;
        Ok(key)
    }

    /// Reads the partition deletion and static row of the partition whose
    /// key was just read, and returns the partition for consumption.
    pub fn read_partition(&mut self) -> Result<PartitionStream<'_, R>, DecodeError> {
        let Some(key) = self.key.as_ref() else {
            return Err(DecodeError::Malformed(
                "partition body requested before its key".to_string(),
            ));
        };
        if self.phase != DecoderPhase::KeyRead {
            return Err(DecodeError::Malformed(format!(
                "partition {} body already read",
                key
            )));
        }

        self.deletion = read_deletion_time(&mut self.input)?;
        self.phase = DecoderPhase::DeletionRead;

        let ctx = CodecContext::new(&self.metadata, self.header.as_ref(), self.helper);
        self.static_row = self
            .codec
            .read_static_row(&mut self.input, &ctx, &mut self.state)?;
        self.phase = DecoderPhase::StaticRowRead;

        self.phase = DecoderPhase::Iterating;
        Ok(PartitionStream {
            metadata: &self.metadata,
            header: self.header.as_ref(),
            key,
            deletion: self.deletion,
            static_row: &self.static_row,
            entries: EntryReader {
                codec: self.codec,
                helper: self.helper,
                input: &mut self.input,
                state: &mut self.state,
                phase: &mut self.phase,
                exception: &mut self.exception,
                mark_counters: self.mark_counters,
            },
        })
    }

    /// Surfaces a decode failure hidden by the `Iterator` protocol.
    ///
    /// # Errors
    ///
    /// The failure recorded while the last partition was iterated, if any.
    /// It is reported once.
    pub fn check_for_exceptions(&mut self) -> Result<(), DecodeError> {
        match self.exception.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `true` once the current partition's end marker was consumed (or its
    /// iteration failed).
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.phase == DecoderPhase::Exhausted
    }

    #[must_use]
    pub fn phase(&self) -> DecoderPhase {
        self.phase
    }

    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.input.bytes_read()
    }

    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Columns the stream may carry. The peer's subset is not known up
    /// front, so this is every static and regular column of the table.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.metadata
            .static_columns()
            .iter()
            .chain(self.metadata.regular_columns())
    }

    /// Streamed partitions are always in forward clustering order.
    #[must_use]
    pub fn is_reverse_order(&self) -> bool {
        false
    }

    #[must_use]
    pub fn stats(&self) -> EncodingStats {
        self.header
            .as_ref()
            .map_or(EncodingStats::NO_STATS, SerializationHeader::stats)
    }

    /// Key of the partition being decoded, once read.
    #[must_use]
    pub fn partition_key(&self) -> Option<&DecoratedKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn static_row(&self) -> &Row {
        &self.static_row
    }
}

/// The partition currently being decoded.
///
/// Header accessors are valid immediately; entries are read from the
/// stream as they are pulled.
pub struct PartitionStream<'d, R> {
    metadata: &'d TableMetadata,
    header: Option<&'d SerializationHeader>,
    key: &'d DecoratedKey,
    deletion: DeletionTime,
    static_row: &'d Row,
    entries: EntryReader<'d, R>,
}

struct EntryReader<'d, R> {
    codec: &'static dyn PartitionCodec,
    helper: DeserializationHelper,
    input: &'d mut TrackedReader<R>,
    state: &'d mut PartitionState,
    phase: &'d mut DecoderPhase,
    exception: &'d mut Option<DecodeError>,
    mark_counters: bool,
}

impl<R: Read> PartitionStream<'_, R> {
    /// Reads the next entry; `Ok(None)` at the end of the partition.
    ///
    /// Counter rows come back flagged so that local counter shards are
    /// cleared before the data merges with local increments.
    pub fn try_next(&mut self) -> Result<Option<Unfiltered>, DecodeError> {
        let entries = &mut self.entries;
        if *entries.phase == DecoderPhase::Exhausted {
            return Ok(None);
        }
        let ctx = CodecContext::new(self.metadata, self.header, entries.helper);
        match entries
            .codec
            .read_unfiltered(&mut *entries.input, &ctx, &mut *entries.state)?
        {
            None => {
                *entries.phase = DecoderPhase::Exhausted;
                Ok(None)
            }
            Some(Unfiltered::Row(row)) if entries.mark_counters => {
                Ok(Some(Unfiltered::Row(row.mark_counter_local_to_be_cleared())))
            }
            Some(unfiltered) => Ok(Some(unfiltered)),
        }
    }
}

impl<R: Read> Iterator for PartitionStream<'_, R> {
    type Item = Unfiltered;

    fn next(&mut self) -> Option<Unfiltered> {
        match self.try_next() {
            Ok(item) => item,
            Err(e) => {
                *self.entries.exception = Some(e);
                *self.entries.phase = DecoderPhase::Exhausted;
                None
            }
        }
    }
}

impl<R: Read> UnfilteredPartition for PartitionStream<'_, R> {
    fn metadata(&self) -> &TableMetadata {
        self.metadata
    }

    fn partition_key(&self) -> &DecoratedKey {
        self.key
    }

    fn partition_level_deletion(&self) -> DeletionTime {
        self.deletion
    }

    fn static_row(&self) -> &Row {
        self.static_row
    }

    fn failure(&self) -> Option<&DecodeError> {
        self.entries.exception.as_ref()
    }
}

fn display_key(key: Option<&DecoratedKey>) -> String {
    key.map_or_else(|| "<none>".to_string(), ToString::to_string)
}
