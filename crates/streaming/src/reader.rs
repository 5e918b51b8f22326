use std::io::Read;

use tracing::{debug, warn};

use config::StreamingConfig;
use rows::{DecodeError, EncodingStats, SerializationHeader};

use crate::cursor::TrackedReader;
use crate::descriptor::TransferDescriptor;
use crate::deserializer::StreamDeserializer;
use crate::error::StreamError;
use crate::metrics::StorageMetrics;
use crate::nospam::NoSpamLogger;
use crate::session::{
    Direction, ProgressInfo, RangeOracle, SegmentWriter, StreamSession, TableCatalog,
    WriterFactory, WriterParams,
};
use crate::validator::{OutOfRangePolicy, RangeValidator, ScanPosition};

/// The node-side collaborators of a transfer.
pub struct ReceiveContext<'a, F: WriterFactory> {
    pub session: &'a dyn StreamSession,
    pub catalog: &'a dyn TableCatalog,
    pub oracle: &'a dyn RangeOracle,
    pub writers: &'a F,
    pub policy: OutOfRangePolicy,
    pub metrics: &'a StorageMetrics,
    /// Shared by every transfer of the node.
    pub nospam: &'a NoSpamLogger,
}

impl<'a, F: WriterFactory> ReceiveContext<'a, F> {
    /// A context applying `config`'s out-of-range policy.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: &'a dyn StreamSession,
        catalog: &'a dyn TableCatalog,
        oracle: &'a dyn RangeOracle,
        writers: &'a F,
        config: &StreamingConfig,
        metrics: &'a StorageMetrics,
        nospam: &'a NoSpamLogger,
    ) -> Self {
        Self {
            session,
            catalog,
            oracle,
            writers,
            policy: OutOfRangePolicy::from(config),
            metrics,
            nospam,
        }
    }
}

/// Receives one segment.
///
/// # Protocol
///
/// 1. Resolve the table; a dropped table fails with `TableGone` before a
///    writer exists.
/// 2. Create the writer for the declared total size (`NoSpace` if nothing
///    fits). No byte has been read at this point.
/// 3. While `bytes_read < total_size`: check for cancellation, decode a
///    partition key, validate it against the owned ranges, append the
///    partition, surface deferred decode errors, report progress.
/// 4. Require `bytes_read == total_size` and hand the writer back.
///
/// Any failure after step 2 aborts the writer before the error is returned.
pub struct StreamReader<'a, F: WriterFactory> {
    descriptor: TransferDescriptor,
    total_size: u64,
    ctx: ReceiveContext<'a, F>,
}

impl<'a, F: WriterFactory> StreamReader<'a, F> {
    /// # Errors
    ///
    /// [`StreamError::PendingRepairMismatch`] if the session belongs to a
    /// pending repair other than the segment's, [`StreamError::Decode`] if
    /// the declared sections overflow a 64-bit size.
    pub fn new(descriptor: TransferDescriptor, ctx: ReceiveContext<'a, F>) -> Result<Self, StreamError> {
        if let Some(session) = ctx.session.pending_repair() {
            if descriptor.pending_repair != Some(session) {
                return Err(StreamError::PendingRepairMismatch {
                    session,
                    segment: descriptor.pending_repair,
                });
            }
        }
        let total_size = descriptor.total_size().ok_or_else(|| {
            StreamError::decode(
                None,
                DecodeError::malformed(format!(
                    "sections of segment {} overflow a 64-bit size",
                    descriptor.file_seq_num
                )),
            )
        })?;
        Ok(Self {
            descriptor,
            total_size,
            ctx,
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Consumes exactly `total_size` bytes of `input` and returns the writer
    /// holding every received partition, ready to be finished.
    ///
    /// # Errors
    ///
    /// See [`StreamError`]. The writer, if created, is aborted first.
    pub fn read<R: Read>(&self, input: R) -> Result<F::Writer, StreamError> {
        let d = &self.descriptor;
        let session = self.ctx.session;
        let total_size = self.total_size;

        let metadata = self
            .ctx
            .catalog
            .table(d.table_id)
            .ok_or(StreamError::TableGone {
                table_id: d.table_id,
            })?;

        debug!(
            plan_id = %session.plan_id(),
            file_seq_num = d.file_seq_num,
            peer = session.peer(),
            repaired_at = d.repaired_at,
            size = total_size,
            keyspace = %metadata.keyspace,
            table = %metadata.name,
            pending_repair = ?d.pending_repair,
            "start receiving file"
        );

        let header = d
            .header
            .as_ref()
            .map(|component| component.to_header(&metadata))
            .transpose()
            .map_err(|e| StreamError::decode(None, e))?;
        let encoding_stats = header
            .as_ref()
            .map_or(EncodingStats::NO_STATS, SerializationHeader::stats);
        let input = TrackedReader::with_limit(input, total_size);
        let mut deserializer = StreamDeserializer::new(metadata.clone(), input, d.version, header)
            .map_err(|e| StreamError::decode(None, e))?;

        let mut writer = self.ctx.writers.create_writer(&WriterParams {
            metadata: metadata.clone(),
            estimated_keys: d.estimated_keys,
            total_size,
            repaired_at: d.repaired_at,
            pending_repair: d.pending_repair,
            format: d.format,
            level: d.level,
            encoding_stats,
            file_seq_num: d.file_seq_num,
        })?;

        let validator = RangeValidator::new(
            self.ctx.oracle.owned_ranges(&metadata.keyspace),
            self.ctx.policy,
            self.ctx.metrics,
            self.ctx.nospam,
            session.plan_id(),
            writer.filename(),
            session.peer(),
        );

        match self.receive(&mut deserializer, &mut writer, &validator) {
            Ok(()) => {
                debug!(
                    plan_id = %session.plan_id(),
                    file_seq_num = d.file_seq_num,
                    peer = session.peer(),
                    keyspace = %metadata.keyspace,
                    table = %metadata.name,
                    "finished receiving file, received {} of {} total bytes",
                    pretty_print_memory(deserializer.bytes_read()),
                    pretty_print_memory(total_size)
                );
                Ok(writer)
            }
            Err(e) => {
                let key = e
                    .partition_key()
                    .or_else(|| deserializer.partition_key())
                    .map(ToString::to_string);
                warn!(
                    plan_id = %session.plan_id(),
                    file_seq_num = d.file_seq_num,
                    peer = session.peer(),
                    keyspace = %metadata.keyspace,
                    table = %metadata.name,
                    key = key.as_deref().unwrap_or("<unknown>"),
                    local = e.is_local(),
                    bytes_read = deserializer.bytes_read(),
                    error = %e,
                    "error while reading partition from stream"
                );
                writer.abort(&e);
                Err(e)
            }
        }
    }

    fn receive<R: Read>(
        &self,
        deserializer: &mut StreamDeserializer<R>,
        writer: &mut F::Writer,
        validator: &RangeValidator<'_>,
    ) -> Result<(), StreamError> {
        let d = &self.descriptor;
        let session = self.ctx.session;
        let total_size = self.total_size;
        let progress_name = format!("{}-{}", writer.filename(), d.file_seq_num);
        let mut scan = ScanPosition::default();

        while deserializer.bytes_read() < total_size {
            if session.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            let key = deserializer
                .read_key()
                .map_err(|e| StreamError::decode(None, e))?;
            scan = validator.verify(&key, scan)?;

            let appended = {
                let mut partition = deserializer
                    .read_partition()
                    .map_err(|e| StreamError::decode(Some(key.clone()), e))?;
                writer.append(&mut partition)
            };
            // A decode failure mid-partition also fails the append; report
            // the cause.
            deserializer
                .check_for_exceptions()
                .map_err(|e| StreamError::decode(Some(key.clone()), e))?;
            appended.map_err(|e| StreamError::write(Some(key.clone()), e))?;
            if !deserializer.is_exhausted() {
                return Err(StreamError::write(
                    Some(key),
                    "writer returned before consuming the whole partition",
                ));
            }

            session.progress(ProgressInfo {
                peer: session.peer().to_string(),
                file_name: progress_name.clone(),
                direction: Direction::In,
                bytes_read: deserializer.bytes_read(),
                total_size,
            });
        }

        let bytes_read = deserializer.bytes_read();
        if bytes_read != total_size {
            return Err(StreamError::SizeMismatch {
                bytes_read,
                total_size,
            });
        }
        Ok(())
    }
}

/// Formats a byte count with a binary unit, e.g. `1.50KiB`.
#[must_use]
pub fn pretty_print_memory(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}
