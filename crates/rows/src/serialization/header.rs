//! Header-based formats (V2 and V3).
//!
//! Columns are referenced by their position in the serialization header and
//! timestamps/TTLs are written as vint deltas against the header's
//! [`EncodingStats`]. V3 adds the entry body size and the size of the
//! previous entry after the clustering, which the reader checks.
//!
//! ```text
//! row    : flags (u8) [| ext_flags (u8)] [| clustering] [| body_size | prev_size]
//!          [| ts] [| ttl | local_exp] [| mfda | ldt] [| column subset] | cell*
//! marker : flags (u8) | bound_kind (u8) | prefix_len (u16) | clustering values
//!          [| body_size | prev_size] | deletion [| deletion]
//! cell   : cell_flags (u8) [| ts] [| ldt] [| ttl] [| value]
//! end    : 0x01
//! ```

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::deletion::{DeletionTime, LivenessInfo, NO_DELETION_TIME, NO_TTL};
use crate::error::DecodeError;
use crate::row::{BoundKind, Cell, Clustering, MarkerDeletion, RangeTombstoneMarker, Row, Unfiltered};
use crate::schema::{ColumnType, EncodingStats, HeaderColumn, SerializationHeader};

use super::vint::{read_unsigned_vint, read_vint, write_unsigned_vint, write_vint};
use super::{
    invalid_input, read_bytes, CodecContext, CountingReader, FormatVersion, PartitionCodec,
    PartitionState,
};

const END_OF_PARTITION: u8 = 0x01;
const IS_MARKER: u8 = 0x02;
const HAS_TIMESTAMP: u8 = 0x04;
const HAS_TTL: u8 = 0x08;
const HAS_DELETION: u8 = 0x10;
const HAS_ALL_COLUMNS: u8 = 0x20;
const EXTENSION: u8 = 0x80;
const KNOWN_ROW_FLAGS: u8 =
    HAS_TIMESTAMP | HAS_TTL | HAS_DELETION | HAS_ALL_COLUMNS | EXTENSION;

const EXT_IS_STATIC: u8 = 0x01;
const EXT_COUNTER_LOCAL_CLEAR: u8 = 0x02;
const KNOWN_EXT_FLAGS: u8 = EXT_IS_STATIC | EXT_COUNTER_LOCAL_CLEAR;

const CELL_IS_DELETED: u8 = 0x01;
const CELL_IS_EXPIRING: u8 = 0x02;
const CELL_HAS_EMPTY_VALUE: u8 = 0x04;
const CELL_USE_ROW_TIMESTAMP: u8 = 0x08;
const CELL_USE_ROW_TTL: u8 = 0x10;
const KNOWN_CELL_FLAGS: u8 = CELL_IS_DELETED
    | CELL_IS_EXPIRING
    | CELL_HAS_EMPTY_VALUE
    | CELL_USE_ROW_TIMESTAMP
    | CELL_USE_ROW_TTL;

pub struct HeaderCodec {
    version: FormatVersion,
}

impl HeaderCodec {
    pub const fn new(version: FormatVersion) -> Self {
        Self { version }
    }

    fn has_sizes(&self) -> bool {
        self.version == FormatVersion::V3
    }

    /// Reads the V3 size fields and returns the count at which the entry body
    /// must end.
    fn read_sizes(
        &self,
        input: &mut CountingReader<'_>,
        state: &PartitionState,
    ) -> Result<Option<u64>, DecodeError> {
        if !self.has_sizes() {
            return Ok(None);
        }
        let body_size = read_unsigned_vint(input)?;
        let previous = read_unsigned_vint(input)?;
        if previous != state.previous_unfiltered_size {
            return Err(DecodeError::malformed(format!(
                "previous entry size is {} but the entry claims {}",
                state.previous_unfiltered_size, previous
            )));
        }
        input.count().checked_add(body_size).map(Some).ok_or_else(|| {
            DecodeError::malformed(format!("entry body size {} overflows the stream position", body_size))
        })
    }

    fn check_body_end(input: &CountingReader<'_>, expected_end: Option<u64>) -> Result<(), DecodeError> {
        match expected_end {
            Some(end) if input.count() != end => Err(DecodeError::malformed(format!(
                "entry body ended at byte {} but its size field says {}",
                input.count(),
                end
            ))),
            _ => Ok(()),
        }
    }

    fn read_row_clustering(
        &self,
        input: &mut dyn Read,
        header: &SerializationHeader,
    ) -> Result<Clustering, DecodeError> {
        let mut values = Vec::with_capacity(header.clustering_types().len());
        for column_type in header.clustering_types() {
            let len = read_length(input)?;
            let value = read_bytes(input, len)?;
            column_type.validate(&value)?;
            values.push(value);
        }
        Ok(Clustering(values))
    }

    fn read_marker(
        &self,
        input: &mut CountingReader<'_>,
        header: &SerializationHeader,
        state: &PartitionState,
    ) -> Result<RangeTombstoneMarker, DecodeError> {
        let raw_kind = input.read_u8()?;
        let kind = BoundKind::from_u8(raw_kind)
            .ok_or_else(|| DecodeError::malformed(format!("invalid bound kind {}", raw_kind)))?;
        let prefix = input.read_u16::<BigEndian>()? as usize;
        if prefix > header.clustering_types().len() {
            return Err(DecodeError::malformed(format!(
                "marker prefix of {} values, table has {} clustering columns",
                prefix,
                header.clustering_types().len()
            )));
        }
        let mut values = Vec::with_capacity(prefix);
        for _ in 0..prefix {
            let len = read_length(input)?;
            values.push(read_bytes(input, len)?);
        }
        let clustering = Clustering(values);

        let body_end = self.read_sizes(input, state)?;
        let stats = header.stats();
        let first = read_delta_deletion(input, &stats)?;
        let marker = if kind.is_boundary() {
            let start = read_delta_deletion(input, &stats)?;
            RangeTombstoneMarker::boundary(kind, clustering, first, start)
        } else {
            RangeTombstoneMarker::bound(kind, clustering, first)
        };
        Self::check_body_end(input, body_end)?;
        Ok(marker)
    }

    /// Decodes everything after the size fields: liveness, deletion, the
    /// column subset and the cells.
    fn read_row_body(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        stats: &EncodingStats,
        flags: u8,
        columns: &[HeaderColumn],
        row: &mut Row,
    ) -> Result<(), DecodeError> {
        if flags & HAS_TTL != 0 && flags & HAS_TIMESTAMP == 0 {
            return Err(DecodeError::malformed("row TTL without a row timestamp"));
        }
        if flags & HAS_TIMESTAMP != 0 {
            let timestamp = stats.min_timestamp.wrapping_add(read_vint(input)?);
            row.liveness = if flags & HAS_TTL != 0 {
                let ttl = add_i32(stats.min_ttl, read_vint(input)?, "row ttl")?;
                let local_exp = add_i32(stats.min_local_deletion_time, read_vint(input)?, "row expiration")?;
                LivenessInfo::expiring(timestamp, ttl, local_exp)
            } else {
                LivenessInfo::new(timestamp)
            };
        }
        if flags & HAS_DELETION != 0 {
            row.deletion = read_delta_deletion(input, stats)?;
        }

        let present = if flags & HAS_ALL_COLUMNS != 0 {
            (0..columns.len()).collect::<Vec<_>>()
        } else {
            read_column_subset(input, columns.len())?
        };

        for idx in present {
            let column = &columns[idx];
            let cell = read_cell(input, column, row, stats)?;
            match column {
                HeaderColumn::Live(meta) => {
                    meta.column_type.validate(&cell.value)?;
                    let cell = ctx.helper.finish_cell(cell);
                    if !row.insert_cell(cell) {
                        return Err(DecodeError::malformed(format!(
                            "duplicate cell for column {}",
                            meta.name
                        )));
                    }
                }
                // Dropped locally: consumed, not kept.
                HeaderColumn::Dropped { .. } => {}
            }
        }
        Ok(())
    }

    /// Encodes a whole row entry (static or regular) into `out`.
    fn write_row(
        &self,
        row: &Row,
        out: &mut dyn Write,
        header: &SerializationHeader,
        state: &mut PartitionState,
    ) -> io::Result<()> {
        let columns = if row.is_static() {
            header.static_columns()
        } else {
            header.regular_columns()
        };
        let stats = header.stats();

        let mut body = Vec::new();
        let mut flags = 0u8;
        if !row.liveness.is_empty() {
            flags |= HAS_TIMESTAMP;
            write_vint(&mut body, row.liveness.timestamp.wrapping_sub(stats.min_timestamp))?;
            if row.liveness.is_expiring() {
                flags |= HAS_TTL;
                write_vint(&mut body, sub_i32(row.liveness.ttl, stats.min_ttl))?;
                write_vint(
                    &mut body,
                    sub_i32(row.liveness.local_expiration_time, stats.min_local_deletion_time),
                )?;
            }
        }
        if !row.deletion.is_live() {
            flags |= HAS_DELETION;
            write_delta_deletion(&mut body, row.deletion, &stats)?;
        }

        let mut present = Vec::with_capacity(row.cells().len());
        for cell in row.cells() {
            let idx = columns
                .iter()
                .position(|c| !c.is_dropped() && c.name() == cell.column)
                .ok_or_else(|| invalid_input(format!("column {} is not in the header", cell.column)))?;
            present.push((idx, cell));
        }
        present.sort_by_key(|(idx, _)| *idx);
        if present.len() == columns.len() {
            flags |= HAS_ALL_COLUMNS;
        } else {
            write_unsigned_vint(&mut body, present.len() as u64)?;
            for (idx, _) in &present {
                write_unsigned_vint(&mut body, *idx as u64)?;
            }
        }
        for (idx, cell) in &present {
            write_cell(&mut body, cell, columns[*idx].column_type(), row, &stats)?;
        }

        let mut ext = 0u8;
        if row.is_static() {
            ext |= EXT_IS_STATIC;
        }
        if row.is_counter_local_to_be_cleared() {
            ext |= EXT_COUNTER_LOCAL_CLEAR;
        }
        if ext != 0 {
            flags |= EXTENSION;
        }

        let mut entry = Vec::with_capacity(body.len() + 16);
        entry.write_u8(flags)?;
        if ext != 0 {
            entry.write_u8(ext)?;
        }
        if !row.is_static() {
            if row.clustering.len() != header.clustering_types().len() {
                return Err(invalid_input(format!(
                    "row has {} clustering values, header has {}",
                    row.clustering.len(),
                    header.clustering_types().len()
                )));
            }
            for value in row.clustering.values() {
                write_unsigned_vint(&mut entry, value.len() as u64)?;
                entry.write_all(value)?;
            }
        }
        self.finish_entry(entry, body, out, state)
    }

    fn write_marker(
        &self,
        marker: &RangeTombstoneMarker,
        out: &mut dyn Write,
        header: &SerializationHeader,
        state: &mut PartitionState,
    ) -> io::Result<()> {
        let stats = header.stats();
        let mut entry = Vec::new();
        entry.write_u8(IS_MARKER)?;
        entry.write_u8(marker.kind as u8)?;
        let prefix = u16::try_from(marker.clustering.len())
            .map_err(|_| invalid_input("marker clustering too long"))?;
        entry.write_u16::<BigEndian>(prefix)?;
        for value in marker.clustering.values() {
            write_unsigned_vint(&mut entry, value.len() as u64)?;
            entry.write_all(value)?;
        }

        let mut body = Vec::new();
        match marker.deletion {
            MarkerDeletion::Bound(d) => write_delta_deletion(&mut body, d, &stats)?,
            MarkerDeletion::Boundary { end, start } => {
                write_delta_deletion(&mut body, end, &stats)?;
                write_delta_deletion(&mut body, start, &stats)?;
            }
        }
        self.finish_entry(entry, body, out, state)
    }

    /// Appends the V3 size fields and the body to `entry`, writes it out and
    /// records its size as the previous entry size.
    fn finish_entry(
        &self,
        mut entry: Vec<u8>,
        body: Vec<u8>,
        out: &mut dyn Write,
        state: &mut PartitionState,
    ) -> io::Result<()> {
        if self.has_sizes() {
            write_unsigned_vint(&mut entry, body.len() as u64)?;
            write_unsigned_vint(&mut entry, state.previous_unfiltered_size)?;
        }
        entry.extend_from_slice(&body);
        out.write_all(&entry)?;
        state.previous_unfiltered_size = entry.len() as u64;
        Ok(())
    }

    fn header<'a>(&self, ctx: &CodecContext<'a>) -> io::Result<&'a SerializationHeader> {
        ctx.header.ok_or_else(|| {
            invalid_input(format!("format version {} requires a serialization header", self.version))
        })
    }
}

impl PartitionCodec for HeaderCodec {
    fn version(&self) -> FormatVersion {
        self.version
    }

    fn read_static_row(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> Result<Row, DecodeError> {
        let header = ctx.require_header(self.version)?;
        let mut row = Row::empty_static();
        if !header.has_static() {
            return Ok(row);
        }

        let mut input = CountingReader::new(input);
        let flags = input.read_u8()?;
        if flags & EXTENSION == 0 {
            return Err(DecodeError::malformed("expected a static row"));
        }
        if flags & !KNOWN_ROW_FLAGS != 0 {
            return Err(DecodeError::malformed(format!("invalid static row flags {:#04x}", flags)));
        }
        let ext = input.read_u8()?;
        if ext & EXT_IS_STATIC == 0 || ext & !KNOWN_EXT_FLAGS != 0 {
            return Err(DecodeError::malformed(format!("invalid static row extended flags {:#04x}", ext)));
        }

        let body_end = self.read_sizes(&mut input, state)?;
        let stats = header.stats();
        self.read_row_body(&mut input, ctx, &stats, flags, header.static_columns(), &mut row)?;
        Self::check_body_end(&input, body_end)?;
        row.set_counter_local_to_be_cleared(ext & EXT_COUNTER_LOCAL_CLEAR != 0);
        state.previous_unfiltered_size = input.count();
        Ok(row)
    }

    fn read_unfiltered(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> Result<Option<Unfiltered>, DecodeError> {
        let header = ctx.require_header(self.version)?;
        let mut input = CountingReader::new(input);
        let flags = input.read_u8()?;

        if flags & END_OF_PARTITION != 0 {
            if flags != END_OF_PARTITION {
                return Err(DecodeError::malformed(format!(
                    "end of partition flag combined with {:#04x}",
                    flags
                )));
            }
            return Ok(None);
        }

        let unfiltered = if flags & IS_MARKER != 0 {
            if flags != IS_MARKER {
                return Err(DecodeError::malformed(format!("invalid marker flags {:#04x}", flags)));
            }
            Unfiltered::Marker(self.read_marker(&mut input, header, state)?)
        } else {
            if flags & !KNOWN_ROW_FLAGS != 0 {
                return Err(DecodeError::malformed(format!("invalid row flags {:#04x}", flags)));
            }
            let ext = if flags & EXTENSION != 0 { input.read_u8()? } else { 0 };
            if ext & EXT_IS_STATIC != 0 {
                return Err(DecodeError::malformed("static row found after the partition start"));
            }
            if ext & !KNOWN_EXT_FLAGS != 0 {
                return Err(DecodeError::malformed(format!("invalid row extended flags {:#04x}", ext)));
            }

            let clustering = self.read_row_clustering(&mut input, header)?;
            let body_end = self.read_sizes(&mut input, state)?;
            let mut row = Row::regular(clustering);
            let stats = header.stats();
            self.read_row_body(&mut input, ctx, &stats, flags, header.regular_columns(), &mut row)?;
            Self::check_body_end(&input, body_end)?;
            row.set_counter_local_to_be_cleared(ext & EXT_COUNTER_LOCAL_CLEAR != 0);
            Unfiltered::Row(row)
        };

        state.previous_unfiltered_size = input.count();
        Ok(Some(unfiltered))
    }

    fn write_static_row(
        &self,
        row: &Row,
        out: &mut dyn Write,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> io::Result<()> {
        let header = self.header(ctx)?;
        if !header.has_static() {
            if row.is_empty() {
                return Ok(());
            }
            return Err(invalid_input("static row for a table without static columns"));
        }
        self.write_row(row, out, header, state)
    }

    fn write_unfiltered(
        &self,
        unfiltered: &Unfiltered,
        out: &mut dyn Write,
        ctx: &CodecContext<'_>,
        state: &mut PartitionState,
    ) -> io::Result<()> {
        let header = self.header(ctx)?;
        match unfiltered {
            Unfiltered::Row(row) if row.is_static() => {
                Err(invalid_input("static row inside the row sequence"))
            }
            Unfiltered::Row(row) => self.write_row(row, out, header, state),
            Unfiltered::Marker(marker) => self.write_marker(marker, out, header, state),
        }
    }

    fn write_end_of_partition(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_u8(END_OF_PARTITION)
    }
}

fn read_length(input: &mut dyn Read) -> Result<usize, DecodeError> {
    let len = read_unsigned_vint(input)?;
    usize::try_from(len).map_err(|_| DecodeError::malformed(format!("length {} out of range", len)))
}

fn add_i32(base: i32, delta: i64, what: &str) -> Result<i32, DecodeError> {
    i64::from(base)
        .checked_add(delta)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| DecodeError::malformed(format!("{} delta {} overflows", what, delta)))
}

fn sub_i32(value: i32, base: i32) -> i64 {
    i64::from(value) - i64::from(base)
}

fn read_delta_deletion(input: &mut dyn Read, stats: &EncodingStats) -> Result<DeletionTime, DecodeError> {
    let marked_for_delete_at = stats.min_timestamp.wrapping_add(read_vint(input)?);
    let local_deletion_time = add_i32(stats.min_local_deletion_time, read_vint(input)?, "deletion time")?;
    Ok(DeletionTime::new(marked_for_delete_at, local_deletion_time))
}

fn write_delta_deletion(out: &mut Vec<u8>, deletion: DeletionTime, stats: &EncodingStats) -> io::Result<()> {
    write_vint(out, deletion.marked_for_delete_at.wrapping_sub(stats.min_timestamp))?;
    write_vint(out, sub_i32(deletion.local_deletion_time, stats.min_local_deletion_time))
}

/// Reads the indexes of the columns present in a row. Indexes must be
/// strictly increasing and below `column_count`.
fn read_column_subset(input: &mut dyn Read, column_count: usize) -> Result<Vec<usize>, DecodeError> {
    let count = read_length(input)?;
    if count > column_count {
        return Err(DecodeError::malformed(format!(
            "row claims {} columns, header has {}",
            count, column_count
        )));
    }
    let mut present = Vec::with_capacity(count);
    for _ in 0..count {
        let idx = read_length(input)?;
        if idx >= column_count {
            return Err(DecodeError::malformed(format!("column index {} out of range", idx)));
        }
        if present.last().is_some_and(|&last| idx <= last) {
            return Err(DecodeError::malformed("column indexes are not increasing"));
        }
        present.push(idx);
    }
    Ok(present)
}

fn read_cell(
    input: &mut dyn Read,
    column: &HeaderColumn,
    row: &Row,
    stats: &EncodingStats,
) -> Result<Cell, DecodeError> {
    let flags = input.read_u8()?;
    if flags & !KNOWN_CELL_FLAGS != 0 {
        return Err(DecodeError::malformed(format!("invalid cell flags {:#04x}", flags)));
    }
    let deleted = flags & CELL_IS_DELETED != 0;
    let expiring = flags & CELL_IS_EXPIRING != 0;
    if deleted && expiring {
        return Err(DecodeError::malformed("cell is both deleted and expiring"));
    }

    let timestamp = if flags & CELL_USE_ROW_TIMESTAMP != 0 {
        if row.liveness.is_empty() {
            return Err(DecodeError::malformed("cell uses the timestamp of a row without one"));
        }
        row.liveness.timestamp
    } else {
        stats.min_timestamp.wrapping_add(read_vint(input)?)
    };

    let (ttl, local_deletion_time) = if flags & CELL_USE_ROW_TTL != 0 {
        if !expiring || !row.liveness.is_expiring() {
            return Err(DecodeError::malformed("cell uses the TTL of a row without one"));
        }
        (row.liveness.ttl, row.liveness.local_expiration_time)
    } else {
        let ldt = if deleted || expiring {
            add_i32(stats.min_local_deletion_time, read_vint(input)?, "cell deletion time")?
        } else {
            NO_DELETION_TIME
        };
        let ttl = if expiring {
            add_i32(stats.min_ttl, read_vint(input)?, "cell ttl")?
        } else {
            NO_TTL
        };
        (ttl, ldt)
    };

    let value = if flags & CELL_HAS_EMPTY_VALUE != 0 {
        Vec::new()
    } else {
        let len = match column.column_type().fixed_length() {
            Some(width) => width,
            None => read_length(input)?,
        };
        read_bytes(input, len)?
    };

    Ok(Cell {
        column: column.name().to_string(),
        timestamp,
        ttl,
        local_deletion_time,
        value,
    })
}

fn write_cell(
    out: &mut Vec<u8>,
    cell: &Cell,
    column_type: ColumnType,
    row: &Row,
    stats: &EncodingStats,
) -> io::Result<()> {
    let mut flags = 0u8;
    if cell.is_expiring() {
        flags |= CELL_IS_EXPIRING;
    } else if cell.is_tombstone() {
        flags |= CELL_IS_DELETED;
    }
    if cell.value.is_empty() {
        flags |= CELL_HAS_EMPTY_VALUE;
    }
    let use_row_timestamp = !row.liveness.is_empty() && cell.timestamp == row.liveness.timestamp;
    if use_row_timestamp {
        flags |= CELL_USE_ROW_TIMESTAMP;
    }
    let use_row_ttl = cell.is_expiring()
        && row.liveness.is_expiring()
        && cell.ttl == row.liveness.ttl
        && cell.local_deletion_time == row.liveness.local_expiration_time;
    if use_row_ttl {
        flags |= CELL_USE_ROW_TTL;
    }

    out.write_u8(flags)?;
    if !use_row_timestamp {
        write_vint(out, cell.timestamp.wrapping_sub(stats.min_timestamp))?;
    }
    if !use_row_ttl {
        if flags & (CELL_IS_DELETED | CELL_IS_EXPIRING) != 0 {
            write_vint(out, sub_i32(cell.local_deletion_time, stats.min_local_deletion_time))?;
        }
        if cell.is_expiring() {
            write_vint(out, sub_i32(cell.ttl, stats.min_ttl))?;
        }
    }
    if !cell.value.is_empty() {
        match column_type.fixed_length() {
            Some(width) if width != cell.value.len() => {
                return Err(invalid_input(format!(
                    "{:?} value for {} must be {} bytes",
                    column_type, cell.column, width
                )))
            }
            Some(_) => {}
            None => write_unsigned_vint(out, cell.value.len() as u64)?,
        }
        out.write_all(&cell.value)?;
    }
    Ok(())
}
