use anyhow::{bail, ensure, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use rows::serialization::{read_partition, CodecContext};
use rows::{
    DecoratedKey, DeserializationFlag, DeserializationHelper, Partition, SerializationHeader,
    TableMetadata,
};

use crate::format::{read_footer, Footer, SegmentStats, FOOTER_BYTES};

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum encoded partition size we'll allocate during reads (256 MiB).
const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;

/// Reads a finished segment back.
///
/// On [`open`](SSTableReader::open) the footer and stats block are validated
/// and the whole index is loaded into memory as a
/// `BTreeMap<DecoratedKey, u64>` (key → data-section byte offset), so keys
/// iterate in token order whatever order they were written in.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so that lookups work through a shared `&self`.
pub struct SSTableReader {
    path: PathBuf,
    metadata: Arc<TableMetadata>,
    header: SerializationHeader,
    stats: SegmentStats,
    index: BTreeMap<DecoratedKey, u64>,
    file: Mutex<BufReader<File>>,
    footer: Footer,
}

impl SSTableReader {
    /// Opens a segment written for the table described by `metadata`.
    ///
    /// # Validation
    ///
    /// - The footer magic must be `SSP1` and the offsets must be ordered
    ///   inside the file.
    /// - The stats block must belong to `metadata`'s table, end exactly at the
    ///   footer, and agree with the footer's partition count.
    /// - The segment's serialization header must resolve against `metadata`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the above fails or on I/O failure.
    pub fn open<P: AsRef<Path>>(path: P, metadata: Arc<TableMetadata>) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf).with_context(|| format!("opening {}", path_buf.display()))?;
        let filesize = f.metadata()?.len();

        let footer = read_footer(&mut f)?;
        let footer_start = filesize - FOOTER_BYTES;
        ensure!(
            footer.index_offset <= footer.stats_offset && footer.stats_offset < footer_start,
            "invalid segment offsets (index {}, stats {}, footer {})",
            footer.index_offset,
            footer.stats_offset,
            footer_start
        );

        f.seek(SeekFrom::Start(footer.stats_offset))?;
        let stats = SegmentStats::read_from(&mut f)?;
        ensure!(
            f.stream_position()? == footer_start,
            "corrupt stats: block does not end at the footer"
        );
        ensure!(
            stats.table_id == metadata.id,
            "segment belongs to table {}, not {}.{} ({})",
            stats.table_id,
            metadata.keyspace,
            metadata.name,
            metadata.id
        );
        ensure!(
            stats.partition_count == footer.partition_count,
            "stats claim {} partitions, footer {}",
            stats.partition_count,
            footer.partition_count
        );
        let header = stats.header.to_header(&metadata)?;

        // Read index entries from index_offset up to the stats block.
        f.seek(SeekFrom::Start(footer.index_offset))?;
        let mut reader = BufReader::new(f);
        let mut index = BTreeMap::new();
        let mut pos = footer.index_offset;
        while pos < footer.stats_offset {
            let key_len = reader.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                bail!("corrupt index: key_len {} exceeds maximum {}", key_len, MAX_KEY_BYTES);
            }
            let mut key = vec![0u8; key_len];
            reader.read_exact(&mut key)?;
            let data_offset = reader.read_u64::<LittleEndian>()?;
            ensure!(data_offset < footer.index_offset, "corrupt index: offset {} past data", data_offset);
            index.insert(metadata.decorate_key(key), data_offset);
            pos += 4 + key_len as u64 + 8;
        }
        ensure!(
            index.len() as u64 == footer.partition_count,
            "index holds {} keys, footer {}",
            index.len(),
            footer.partition_count
        );

        debug!(path = ?path_buf, partitions = footer.partition_count, "segment opened");
        Ok(Self {
            path: path_buf,
            metadata,
            header,
            stats,
            index,
            file: Mutex::new(reader),
            footer,
        })
    }

    /// Looks up the partition stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, CRC mismatch, or if the record at the
    /// indexed offset holds a different key (index corruption).
    pub fn get(&self, key: &[u8]) -> Result<Option<Partition>> {
        let decorated = self.metadata.decorate_key(key.to_vec());
        let Some(&offset) = self.index.get(&decorated) else {
            return Ok(None);
        };

        let mut f = self.file.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(offset))?;
        let partition = self.read_record(&mut *f, offset)?;
        if partition.key != decorated {
            bail!("index pointed to mismatching key at offset {}", offset);
        }
        Ok(Some(partition))
    }

    /// Reads every partition in file order (the order they were appended),
    /// verifying each record's CRC.
    pub fn partitions(&self) -> Result<Vec<Partition>> {
        let mut f = self.file.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(0))?;
        let mut out = Vec::with_capacity(self.index.len());
        let mut offset = 0u64;
        while offset < self.footer.index_offset {
            let partition = self.read_record(&mut *f, offset)?;
            offset = f.stream_position()?;
            out.push(partition);
        }
        ensure!(
            offset == self.footer.index_offset,
            "data section overran the index at offset {}",
            offset
        );
        Ok(out)
    }

    /// Reads and decodes the record starting at the current position.
    fn read_record<R: Read>(&self, f: &mut R, offset: u64) -> Result<Partition> {
        let expected_crc = f.read_u32::<LittleEndian>()?;
        let len = f.read_u32::<LittleEndian>()?;
        if len as usize > MAX_RECORD_BYTES {
            bail!("corrupt data: record length {} exceeds maximum {}", len, MAX_RECORD_BYTES);
        }
        let mut body = vec![0u8; len as usize];
        f.read_exact(&mut body)?;

        let mut hasher = Crc32::new();
        hasher.update(&len.to_le_bytes());
        hasher.update(&body);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            bail!(
                "CRC32 mismatch at offset {}: expected {:#010x}, got {:#010x} (data corruption)",
                offset,
                expected_crc,
                actual_crc
            );
        }

        let ctx = CodecContext::new(
            &self.metadata,
            Some(&self.header),
            DeserializationHelper::new(DeserializationFlag::Local),
        );
        let mut input = body.as_slice();
        let partition = read_partition(&mut input, self.stats.format_version, &ctx)
            .with_context(|| format!("decoding partition at offset {}", offset))?;
        ensure!(
            input.is_empty(),
            "{} trailing bytes after partition at offset {}",
            input.len(),
            offset
        );
        Ok(partition)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn stats(&self) -> &SegmentStats {
        &self.stats
    }

    /// Returns the number of partitions in the segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keys in token order.
    pub fn keys(&self) -> impl Iterator<Item = &DecoratedKey> {
        self.index.keys()
    }
}
