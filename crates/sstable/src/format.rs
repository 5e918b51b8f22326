//! Segment footer and stats block.
//!
//! ## Footer (28 bytes) - magic `SSP1` (`0x5353_5031`)
//!
//! ```text
//! [partition_count: u64 LE][stats_offset: u64 LE][index_offset: u64 LE][magic: u32 LE]
//! ```
//!
//! ## Stats block
//!
//! ```text
//! table_id (16 B) | repaired_at (i64 LE) | has_pending (u8) [| pending_repair (16 B)]
//! | level (u32 LE) | format_version (u8) | header component
//! | partition_count (u64 LE) | min_token (i64 LE) | max_token (i64 LE)
//! ```
//!
//! The reader reads the last 4 bytes (magic) first, then seeks back for the
//! rest of the footer.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};
use uuid::Uuid;

use rows::{FormatVersion, SerializationHeaderComponent, TableId, Token};

/// Magic number identifying partition segment files (ASCII "SSP1").
pub const SEGMENT_MAGIC: u32 = 0x5353_5031;

/// Size of the footer in bytes: 8 (`partition_count`) + 8 (`stats_offset`)
/// + 8 (`index_offset`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 8 + 8 + 4;

/// Parsed segment footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub partition_count: u64,
    pub stats_offset: u64,
    pub index_offset: u64,
}

pub fn write_footer<W: Write>(w: &mut W, footer: &Footer) -> IoResult<()> {
    w.write_u64::<LittleEndian>(footer.partition_count)?;
    w.write_u64::<LittleEndian>(footer.stats_offset)?;
    w.write_u64::<LittleEndian>(footer.index_offset)?;
    w.write_u32::<LittleEndian>(SEGMENT_MAGIC)?;
    Ok(())
}

/// Reads the footer from the end of `r`.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> IoResult<Footer> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file too small for segment footer",
        ));
    }

    r.seek(SeekFrom::End(-4))?;
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != SEGMENT_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown segment magic: {:#x}", magic),
        ));
    }

    r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
    let partition_count = r.read_u64::<LittleEndian>()?;
    let stats_offset = r.read_u64::<LittleEndian>()?;
    let index_offset = r.read_u64::<LittleEndian>()?;
    Ok(Footer {
        partition_count,
        stats_offset,
        index_offset,
    })
}

/// Per-segment metadata persisted between the index and the footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStats {
    pub table_id: TableId,
    /// Repair time of the data, 0 if unrepaired.
    pub repaired_at: i64,
    pub pending_repair: Option<Uuid>,
    pub level: u32,
    /// Row format the data section is encoded with.
    pub format_version: FormatVersion,
    pub header: SerializationHeaderComponent,
    pub partition_count: u64,
    pub min_token: Token,
    pub max_token: Token,
}

impl SegmentStats {
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_all(self.table_id.0.as_bytes())?;
        w.write_i64::<LittleEndian>(self.repaired_at)?;
        match self.pending_repair {
            Some(id) => {
                w.write_u8(1)?;
                w.write_all(id.as_bytes())?;
            }
            None => w.write_u8(0)?,
        }
        w.write_u32::<LittleEndian>(self.level)?;
        w.write_u8(self.format_version.code())?;
        self.header.write_to(w)?;
        w.write_u64::<LittleEndian>(self.partition_count)?;
        w.write_i64::<LittleEndian>(self.min_token.0)?;
        w.write_i64::<LittleEndian>(self.max_token.0)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> anyhow::Result<Self> {
        let table_id = TableId(read_uuid(r)?);
        let repaired_at = r.read_i64::<LittleEndian>()?;
        let pending_repair = match r.read_u8()? {
            0 => None,
            1 => Some(read_uuid(r)?),
            other => anyhow::bail!("corrupt stats: pending repair flag {}", other),
        };
        let level = r.read_u32::<LittleEndian>()?;
        let format_version = FormatVersion::from_code(r.read_u8()?)?;
        let header = SerializationHeaderComponent::read_from(r)?;
        let partition_count = r.read_u64::<LittleEndian>()?;
        let min_token = Token(r.read_i64::<LittleEndian>()?);
        let max_token = Token(r.read_i64::<LittleEndian>()?);
        Ok(Self {
            table_id,
            repaired_at,
            pending_repair,
            level,
            format_version,
            header,
            partition_count,
            min_token,
            max_token,
        })
    }

    #[must_use]
    pub fn is_repaired(&self) -> bool {
        self.repaired_at != 0
    }
}

fn read_uuid<R: Read>(r: &mut R) -> IoResult<Uuid> {
    let mut bytes = [0u8; 16];
    r.read_exact(&mut bytes)?;
    Ok(Uuid::from_bytes(bytes))
}
