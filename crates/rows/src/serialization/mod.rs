//! Versioned partition serialization.
//!
//! Every partition shares the same framing, whatever the version:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ key_len (u16 BE) | key                                        │
//! │ local_deletion_time (i32 BE) | marked_for_delete_at (i64 BE)  │
//! │ static row                      (version specific)            │
//! │ unfiltered, unfiltered, ...     (version specific)            │
//! │ end-of-partition sentinel       (version specific)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The row/marker encoding is owned by one [`PartitionCodec`] per
//! [`FormatVersion`]:
//!
//! | Version  | Code | Header  | Column refs | Notes                                   |
//! |----------|------|---------|-------------|-----------------------------------------|
//! | `Legacy` | 1    | none    | by name     | fixed-width big-endian fields           |
//! | `V2`     | 2    | needed  | by index    | flag bytes, vint deltas vs. stats       |
//! | `V3`     | 3    | needed  | by index    | V2 + per-entry body and previous sizes  |
//!
//! The codec is picked once, from the version, and every entry of every
//! partition goes through it. All versions decode into the same [`Row`] and
//! [`RangeTombstoneMarker`](crate::RangeTombstoneMarker) values.

mod header;
mod legacy;
pub mod vint;

use std::fmt;
use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::deletion::DeletionTime;
use crate::error::DecodeError;
use crate::partition::Partition;
use crate::row::{Cell, Row, Unfiltered};
use crate::schema::{SerializationHeader, TableMetadata};
use crate::token::DecoratedKey;

pub use header::HeaderCodec;
pub use legacy::LegacyCodec;

/// Maximum cell value size accepted while decoding (10 MiB). Guards against
/// allocating from a corrupt length.
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// On-disk/on-wire row format versions this build reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatVersion {
    Legacy,
    V2,
    V3,
}

static LEGACY: LegacyCodec = LegacyCodec;
static V2: HeaderCodec = HeaderCodec::new(FormatVersion::V2);
static V3: HeaderCodec = HeaderCodec::new(FormatVersion::V3);

impl FormatVersion {
    /// Version written by the local segment writer.
    pub const CURRENT: FormatVersion = FormatVersion::V3;

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            FormatVersion::Legacy => 1,
            FormatVersion::V2 => 2,
            FormatVersion::V3 => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            1 => Ok(FormatVersion::Legacy),
            2 => Ok(FormatVersion::V2),
            3 => Ok(FormatVersion::V3),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }

    /// Header-less formats predate serialization headers.
    #[must_use]
    pub fn requires_header(self) -> bool {
        self != FormatVersion::Legacy
    }

    /// The codec implementing this version.
    #[must_use]
    pub fn codec(self) -> &'static dyn PartitionCodec {
        match self {
            FormatVersion::Legacy => &LEGACY,
            FormatVersion::V2 => &V2,
            FormatVersion::V3 => &V3,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Legacy => write!(f, "legacy"),
            FormatVersion::V2 => write!(f, "v2"),
            FormatVersion::V3 => write!(f, "v3"),
        }
    }
}

/// Where decoded data comes from, which decides how cells are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeserializationFlag {
    /// Read from a local segment. Expired cells become tombstones.
    Local,
    /// Received from a peer for a read. Expired cells become tombstones.
    FromRemote,
    /// Data that will be re-serialized as is (streaming): cells are kept
    /// exactly as received so serialized sizes do not change.
    PreserveSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeserializationHelper {
    pub flag: DeserializationFlag,
    pub now_in_sec: i32,
}

impl DeserializationHelper {
    #[must_use]
    pub fn new(flag: DeserializationFlag) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::with_now(flag, i32::try_from(now).unwrap_or(i32::MAX))
    }

    #[must_use]
    pub fn with_now(flag: DeserializationFlag, now_in_sec: i32) -> Self {
        Self { flag, now_in_sec }
    }

    pub(crate) fn finish_cell(&self, cell: Cell) -> Cell {
        if self.flag != DeserializationFlag::PreserveSize
            && cell.is_expiring()
            && !cell.is_live(self.now_in_sec)
        {
            cell.into_tombstone()
        } else {
            cell
        }
    }
}

/// Everything a codec needs to interpret bytes for one table.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    pub metadata: &'a TableMetadata,
    pub header: Option<&'a SerializationHeader>,
    pub helper: DeserializationHelper,
}

impl<'a> CodecContext<'a> {
    #[must_use]
    pub fn new(
        metadata: &'a TableMetadata,
        header: Option<&'a SerializationHeader>,
        helper: DeserializationHelper,
    ) -> Self {
        Self {
            metadata,
            header,
            helper,
        }
    }

    pub(crate) fn require_header(
        &self,
        version: FormatVersion,
    ) -> Result<&'a SerializationHeader, DecodeError> {
        self.header.ok_or(DecodeError::MissingHeader(version))
    }
}

/// Per-partition codec state. Reset at every partition start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionState {
    /// Serialized size of the previous entry in this partition.
    pub previous_unfiltered_size: u64,
}

/// One row-format version: how static rows, rows, markers and the end of a
/// partition are laid out.
///
/// Readers return `Ok(None)` from [`read_unfiltered`](Self::read_unfiltered)
/// when the end-of-partition sentinel is consumed.
pub trait PartitionCodec: Send + Sync {
    fn version(&self) -> FormatVersion;

    fn read_static_row(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> Result<Row, DecodeError>;

    fn read_unfiltered(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> Result<Option<Unfiltered>, DecodeError>;

    fn write_static_row(
        &self,
        row: &Row,
        out: &mut dyn Write,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> io::Result<()>;

    fn write_unfiltered(
        &self,
        unfiltered: &Unfiltered,
        out: &mut dyn Write,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> io::Result<()>;

    fn write_end_of_partition(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Reads a `u16` length-prefixed byte string.
pub fn read_short_length_bytes<R: Read + ?Sized>(r: &mut R) -> Result<Vec<u8>, DecodeError> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_short_length_bytes<W: Write + ?Sized>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} bytes do not fit a short length", bytes.len()),
        )
    })?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(bytes)
}

/// Reads `len` bytes, refusing lengths above [`MAX_VALUE_BYTES`].
pub(crate) fn read_bytes<R: Read + ?Sized>(r: &mut R, len: usize) -> Result<Vec<u8>, DecodeError> {
    if len > MAX_VALUE_BYTES {
        return Err(DecodeError::malformed(format!(
            "value length {} exceeds maximum {}",
            len, MAX_VALUE_BYTES
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads and decorates a partition key.
pub fn read_partition_key<R: Read + ?Sized>(
    r: &mut R,
    metadata: &TableMetadata,
) -> Result<DecoratedKey, DecodeError> {
    let key = read_short_length_bytes(r)?;
    if key.is_empty() {
        return Err(DecodeError::malformed("empty partition key"));
    }
    Ok(metadata.decorate_key(key))
}

pub fn write_partition_key<W: Write + ?Sized>(w: &mut W, key: &DecoratedKey) -> io::Result<()> {
    write_short_length_bytes(w, key.key())
}

pub fn read_deletion_time<R: Read + ?Sized>(r: &mut R) -> Result<DeletionTime, DecodeError> {
    let local_deletion_time = r.read_i32::<BigEndian>()?;
    let marked_for_delete_at = r.read_i64::<BigEndian>()?;
    Ok(DeletionTime::new(marked_for_delete_at, local_deletion_time))
}

pub fn write_deletion_time<W: Write + ?Sized>(w: &mut W, deletion: DeletionTime) -> io::Result<()> {
    w.write_i32::<BigEndian>(deletion.local_deletion_time)?;
    w.write_i64::<BigEndian>(deletion.marked_for_delete_at)
}

/// Serializes a whole partition with `version`'s codec.
pub fn write_partition(
    out: &mut dyn Write,
    partition: &Partition,
    version: FormatVersion,
    ctx: &CodecContext<'_>,
) -> io::Result<()> {
    let codec = version.codec();
    let mut state = PartitionState::default();
    write_partition_key(out, &partition.key)?;
    write_deletion_time(out, partition.deletion)?;
    codec.write_static_row(&partition.static_row, out, ctx, &mut state)?;
    for unfiltered in &partition.unfiltereds {
        codec.write_unfiltered(unfiltered, out, ctx, &mut state)?;
    }
    codec.write_end_of_partition(out)
}

/// Decodes a whole partition with `version`'s codec.
pub fn read_partition(
    input: &mut dyn Read,
    version: FormatVersion,
    ctx: &CodecContext<'_>,
) -> Result<Partition, DecodeError> {
    let codec = version.codec();
    let mut state = PartitionState::default();
    let key = read_partition_key(input, ctx.metadata)?;
    let deletion = read_deletion_time(input)?;
    let static_row = codec.read_static_row(input, ctx, &mut state)?;
    let mut unfiltereds = Vec::new();
    while let Some(u) = codec.read_unfiltered(input, ctx, &mut state)? {
        unfiltereds.push(u);
    }
    Ok(Partition {
        key,
        deletion,
        static_row,
        unfiltereds,
    })
}

/// Wraps a reader and counts the bytes pulled through it.
pub(crate) struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    count: u64,
}

impl<'a> CountingReader<'a> {
    pub(crate) fn new(inner: &'a mut dyn Read) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

pub(crate) fn invalid_input(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.into())
}
