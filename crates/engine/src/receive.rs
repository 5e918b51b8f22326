/// The receive path: the engine as the collaborators of a
/// [`StreamReader`], and the finishing of a received segment.
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use rows::{TableId, TableMetadata, TokenRange, UnfilteredPartition};
use sstable::{SSTableWriter, SegmentOptions};
use streaming::{
    RangeOracle, ReceiveContext, SegmentWriter, StreamError, StreamReader, StreamSession,
    TableCatalog, TransferDescriptor, WriterFactory, WriterParams,
};

use crate::directories::Reservation;
use crate::manifest::SegmentEntry;
use crate::Engine;

/// A segment being received, holding its directory space until it is
/// finished or aborted.
pub struct IncomingSegment {
    writer: SSTableWriter,
    reservation: Reservation,
}

impl IncomingSegment {
    pub fn partition_count(&self) -> usize {
        self.writer.partition_count()
    }

    /// Finishes the segment and releases its reservation.
    pub fn finish(self) -> anyhow::Result<PathBuf> {
        let Self { writer, reservation } = self;
        let path = writer.finish();
        drop(reservation);
        path
    }

    /// Discards the segment and releases its reservation.
    pub fn discard(self) {
        let Self { mut writer, reservation } = self;
        writer.abort();
        drop(reservation);
    }
}

impl SegmentWriter for IncomingSegment {
    fn append(&mut self, partition: &mut dyn UnfilteredPartition) -> anyhow::Result<()> {
        SegmentWriter::append(&mut self.writer, partition)
    }

    fn abort(&mut self, cause: &StreamError) {
        SegmentWriter::abort(&mut self.writer, cause);
    }

    fn filename(&self) -> String {
        SegmentWriter::filename(&self.writer)
    }
}

impl TableCatalog for Engine {
    fn table(&self, id: TableId) -> Option<Arc<TableMetadata>> {
        self.read_tables().get(&id).cloned()
    }
}

impl RangeOracle for Engine {
    fn owned_ranges(&self, keyspace: &str) -> Vec<TokenRange> {
        self.read_ownership()
            .get(keyspace)
            .map(|o| TokenRange::normalize(o.local.iter().chain(&o.pending).copied()))
            .unwrap_or_default()
    }
}

impl WriterFactory for Engine {
    type Writer = IncomingSegment;

    fn create_writer(&self, params: &WriterParams) -> Result<IncomingSegment, StreamError> {
        let reservation = self.writeable_location(params.total_size)?;
        let filename = format!(
            "{}-{}-{}.sst",
            params.metadata.name,
            params.format,
            Uuid::new_v4().simple()
        );
        let writer = SSTableWriter::create(
            reservation.path(),
            &filename,
            Arc::clone(&params.metadata),
            SegmentOptions {
                repaired_at: params.repaired_at,
                pending_repair: params.pending_repair,
                level: params.level,
                encoding_stats: params.encoding_stats,
            },
        )
        .map_err(|e| StreamError::Setup(e.into()))?;
        Ok(IncomingSegment { writer, reservation })
    }
}

impl Engine {
    /// Receives one segment from `input` and makes it part of the table.
    ///
    /// Returns `None` when the transfer carried no partition; nothing is
    /// kept in that case.
    ///
    /// # Errors
    ///
    /// Any [`StreamError`] of the transfer. A failure while finishing the
    /// segment or recording it in the manifest is reported as
    /// [`StreamError::Write`]. No file is left behind on error.
    pub fn receive_segment<R: Read>(
        &self,
        input: R,
        descriptor: TransferDescriptor,
        session: &dyn StreamSession,
    ) -> Result<Option<SegmentEntry>, StreamError> {
        let table_id = descriptor.table_id;
        let level = descriptor.level;
        let ctx = ReceiveContext::new(
            session,
            self,
            self,
            self,
            &self.config,
            &self.metrics,
            &self.nospam,
        );
        let reader = StreamReader::new(descriptor, ctx)?;
        let mut writer = reader.read(input)?;

        if writer.partition_count() == 0 {
            debug!(plan_id = %session.plan_id(), table_id = %table_id, "transfer carried no partition");
            writer.discard();
            return Ok(None);
        }

        let path = writer.finish().map_err(|e| StreamError::Write {
            key: None,
            source: e.into(),
        })?;
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let entry = SegmentEntry {
            level,
            table_id,
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        {
            let mut manifest = self.lock_manifest();
            manifest.add(entry.clone());
            if let Err(e) = manifest.save() {
                manifest.remove_files(&[entry.filename.as_str()]);
                let _ = std::fs::remove_file(&path);
                return Err(StreamError::Write {
                    key: None,
                    source: e.context("failed to record segment in manifest").into(),
                });
            }
        }
        self.metrics.load.add(size);

        info!(
            plan_id = %session.plan_id(),
            peer = session.peer(),
            table_id = %table_id,
            level,
            size,
            path = %path.display(),
            "segment received"
        );
        Ok(Some(entry))
    }
}
