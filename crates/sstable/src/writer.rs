use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use rows::serialization::{write_deletion_time, write_partition_key, CodecContext, PartitionState};
use rows::{
    DeserializationFlag, DeserializationHelper, EncodingStats, FormatVersion, SerializationHeader,
    TableMetadata, Token, UnfilteredPartition,
};

use crate::format::{write_footer, Footer, SegmentStats};

/// Segment-level attributes fixed when the writer is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentOptions {
    pub repaired_at: i64,
    pub pending_repair: Option<Uuid>,
    pub level: u32,
    /// Base values for the delta encoding of timestamps.
    pub encoding_stats: EncodingStats,
}

/// Incrementally writes partitions to a new segment file.
///
/// Partitions are appended in the order they are handed over; the writer
/// does not sort them. Everything goes to `<name>.sst.tmp` until
/// [`finish`](SSTableWriter::finish), which writes the index, stats and
/// footer, fsyncs and atomically renames the file into place.
///
/// [`abort`](SSTableWriter::abort) discards the temp file. A writer dropped
/// without being finished aborts itself, so a failed transfer never leaves a
/// valid-looking segment behind.
///
/// # File Layout
///
/// ```text
/// [DATA]   repeated: crc32(u32) | len(u32) | partition (row format v3)
/// [INDEX]  repeated: key_len(u32) | key | data_offset(u64)
/// [STATS]  see `format::SegmentStats`
/// [FOOTER] partition_count(u64) | stats_offset(u64) | index_offset(u64) | magic(u32 = "SSP1")
/// ```
///
/// The CRC32 covers everything after itself in the record (len through the
/// end of the partition bytes).
pub struct SSTableWriter {
    metadata: Arc<TableMetadata>,
    header: SerializationHeader,
    options: SegmentOptions,
    path: PathBuf,
    tmp_path: PathBuf,
    file: Option<BufWriter<File>>,
    offset: u64,
    /// In-memory index: (raw key, data offset).
    index: Vec<(Vec<u8>, u64)>,
    min_token: Option<Token>,
    max_token: Option<Token>,
    /// Reusable buffer for computing per-record CRC32 checksums.
    record_buf: Vec<u8>,
    /// Set once finished or aborted.
    closed: bool,
}

impl SSTableWriter {
    /// Creates the temp file for a new segment at `dir/filename`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir/filename` already exists or the temp file
    /// cannot be created.
    pub fn create(
        dir: &Path,
        filename: &str,
        metadata: Arc<TableMetadata>,
        options: SegmentOptions,
    ) -> Result<Self> {
        let path = dir.join(filename);
        if path.exists() {
            bail!("segment {} already exists", path.display());
        }
        let tmp_path = path.with_extension("sst.tmp");
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;

        let header = SerializationHeader::for_metadata(&metadata, options.encoding_stats);
        Ok(Self {
            metadata,
            header,
            options,
            path,
            tmp_path,
            file: Some(BufWriter::new(raw_file)),
            offset: 0,
            index: Vec::new(),
            min_token: None,
            max_token: None,
            record_buf: Vec::with_capacity(4096),
            closed: false,
        })
    }

    /// Final path of the segment once finished.
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Number of partitions appended so far.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.index.len()
    }

    /// Bytes written to the data section so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Encodes one partition and appends it to the data section.
    ///
    /// `partition` is drained completely before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer was aborted, the partition does not fit
    /// the table schema, the partition reports a failure after draining, or
    /// on I/O failure. Nothing is written in that case.
    pub fn append(&mut self, partition: &mut dyn UnfilteredPartition) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            bail!("append on a closed segment writer ({})", self.path.display());
        };

        let codec = FormatVersion::CURRENT.codec();
        let ctx = CodecContext::new(
            &self.metadata,
            Some(&self.header),
            DeserializationHelper::new(DeserializationFlag::Local),
        );
        let key = partition.partition_key().clone();
        let mut state = PartitionState::default();

        // Build the record body into a buffer so we can CRC it.
        self.record_buf.clear();
        write_partition_key(&mut self.record_buf, &key)?;
        write_deletion_time(&mut self.record_buf, partition.partition_level_deletion())?;
        codec.write_static_row(partition.static_row(), &mut self.record_buf, &ctx, &mut state)?;
        for unfiltered in &mut *partition {
            codec.write_unfiltered(&unfiltered, &mut self.record_buf, &ctx, &mut state)?;
        }
        if let Some(e) = partition.failure() {
            bail!("partition {} ended early: {}", key, e);
        }
        codec.write_end_of_partition(&mut self.record_buf)?;

        let len = u32::try_from(self.record_buf.len())
            .with_context(|| format!("partition {} too large", key))?;
        let mut hasher = Crc32::new();
        hasher.update(&len.to_le_bytes());
        hasher.update(&self.record_buf);
        let crc = hasher.finalize();

        let offset = self.offset;
        file.write_u32::<LittleEndian>(crc)?;
        file.write_u32::<LittleEndian>(len)?;
        file.write_all(&self.record_buf)?;
        self.offset += 8 + u64::from(len);

        let token = key.token();
        self.min_token = Some(self.min_token.map_or(token, |t| t.min(token)));
        self.max_token = Some(self.max_token.map_or(token, |t| t.max(token)));
        self.index.push((key.into_key(), offset));
        Ok(())
    }

    /// Discards everything written so far. Safe to call more than once.
    pub fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.file = None;
        match std::fs::remove_file(&self.tmp_path) {
            Ok(()) => debug!(path = ?self.tmp_path, partitions = self.index.len(), "segment writer aborted"),
            Err(e) => warn!(path = ?self.tmp_path, error = %e, "failed to remove aborted segment"),
        }
        self.index.clear();
    }

    /// Writes index, stats and footer, then atomically renames the temp file
    /// to its final name. Returns the final path.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer was aborted, no partition was appended
    /// (writing an empty segment is refused), or on I/O failure. The temp
    /// file is removed on error.
    pub fn finish(mut self) -> Result<PathBuf> {
        match self.finish_inner() {
            Ok(()) => Ok(self.path.clone()),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn finish_inner(&mut self) -> Result<()> {
        let (Some(min_token), Some(max_token)) = (self.min_token, self.max_token) else {
            bail!("refusing to write an empty segment ({})", self.path.display());
        };
        let Some(mut file) = self.file.take() else {
            bail!("finish on a closed segment writer ({})", self.path.display());
        };

        let index_offset = self.offset;
        let mut index_bytes = 0u64;
        for (key, data_offset) in &self.index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*data_offset)?;
            index_bytes += 4 + key.len() as u64 + 8;
        }

        let stats_offset = index_offset + index_bytes;
        let stats = SegmentStats {
            table_id: self.metadata.id,
            repaired_at: self.options.repaired_at,
            pending_repair: self.options.pending_repair,
            level: self.options.level,
            format_version: FormatVersion::CURRENT,
            header: self.header.to_component(),
            partition_count: self.index.len() as u64,
            min_token,
            max_token,
        };
        stats.write_to(&mut file)?;
        write_footer(
            &mut file,
            &Footer {
                partition_count: stats.partition_count,
                stats_offset,
                index_offset,
            },
        )?;

        // Flush BufWriter, then sync the underlying file
        file.flush()?;
        file.into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;

        rename(&self.tmp_path, &self.path)?;
        self.closed = true;

        // Fsync the parent directory so the rename is durable.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(
            path = ?self.path,
            partitions = stats.partition_count,
            bytes = index_offset,
            "segment finished"
        );
        Ok(())
    }
}

impl Drop for SSTableWriter {
    fn drop(&mut self) {
        self.abort();
    }
}
