//! Header-less legacy format.
//!
//! Written by senders that predate serialization headers, so every cell
//! names its column and every field has a fixed width:
//!
//! ```text
//! static row : cell_count (u16) | cell*
//! entry      : kind (u8: 0 = end of partition, 1 = row, 2 = marker)
//! row        : clustering | ts (i64) | ttl (i32) | local_exp (i32)
//!              | deletion (12 B) | cell_count (u16) | cell*
//! marker     : bound_kind (u8) | clustering | deletion (12 B) [| deletion (12 B) if boundary]
//! clustering : count (u8) | (len (u16) | bytes)*
//! cell       : name (u16 len) | flags (u8) | ts (i64)
//!              [| ttl (i32) | local_exp (i32) if expiring]
//!              [| local_del (i32) if deleted] | value_len (i32) | value
//! ```

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::deletion::{LivenessInfo, NO_DELETION_TIME, NO_TTL};
use crate::error::DecodeError;
use crate::row::{BoundKind, Cell, Clustering, MarkerDeletion, RangeTombstoneMarker, Row, Unfiltered};
use crate::schema::ColumnKind;

use super::{
    invalid_input, read_bytes, read_deletion_time, read_short_length_bytes, write_deletion_time,
    write_short_length_bytes, CodecContext, FormatVersion, PartitionCodec, PartitionState,
};

const KIND_END_OF_PARTITION: u8 = 0;
const KIND_ROW: u8 = 1;
const KIND_MARKER: u8 = 2;

const CELL_DELETED: u8 = 0x01;
const CELL_EXPIRING: u8 = 0x02;

pub struct LegacyCodec;

impl LegacyCodec {
    fn read_cells(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        kind: ColumnKind,
        row: &mut Row,
    ) -> Result<(), DecodeError> {
        let count = input.read_u16::<BigEndian>()?;
        for _ in 0..count {
            let raw_name = read_short_length_bytes(input)?;
            let name = String::from_utf8(raw_name)
                .map_err(|_| DecodeError::malformed("column name is not valid UTF-8"))?;
            let flags = input.read_u8()?;
            if flags & !(CELL_DELETED | CELL_EXPIRING) != 0 {
                return Err(DecodeError::malformed(format!("invalid cell flags {:#04x}", flags)));
            }
            let timestamp = input.read_i64::<BigEndian>()?;
            let (ttl, local_deletion_time) = if flags & CELL_EXPIRING != 0 {
                (input.read_i32::<BigEndian>()?, input.read_i32::<BigEndian>()?)
            } else if flags & CELL_DELETED != 0 {
                (NO_TTL, input.read_i32::<BigEndian>()?)
            } else {
                (NO_TTL, NO_DELETION_TIME)
            };
            let value_len = input.read_i32::<BigEndian>()?;
            let value_len = usize::try_from(value_len)
                .map_err(|_| DecodeError::malformed(format!("negative value length {}", value_len)))?;
            let value = read_bytes(input, value_len)?;

            let column = match ctx.metadata.column(&name) {
                Some(col) if col.kind == kind => col,
                Some(_) => {
                    return Err(DecodeError::malformed(format!(
                        "column {} used in a {:?} row",
                        name, kind
                    )))
                }
                // Dropped locally: consumed, not kept.
                None if ctx.metadata.dropped_at(&name).is_some() => continue,
                None => return Err(DecodeError::UnknownColumn { name }),
            };
            column.column_type.validate(&value)?;

            let cell = ctx.helper.finish_cell(Cell {
                column: name,
                timestamp,
                ttl,
                local_deletion_time,
                value,
            });
            if !row.insert_cell(cell) {
                return Err(DecodeError::malformed(format!(
                    "duplicate cell for column {}",
                    column.name
                )));
            }
        }
        Ok(())
    }

    fn read_clustering(&self, input: &mut dyn Read) -> Result<Clustering, DecodeError> {
        let count = input.read_u8()?;
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(read_short_length_bytes(input)?);
        }
        Ok(Clustering(values))
    }

    fn write_clustering(&self, clustering: &Clustering, out: &mut dyn Write) -> io::Result<()> {
        let count = u8::try_from(clustering.len())
            .map_err(|_| invalid_input("too many clustering values"))?;
        out.write_u8(count)?;
        for v in clustering.values() {
            write_short_length_bytes(out, v)?;
        }
        Ok(())
    }

    fn write_cells(&self, row: &Row, out: &mut dyn Write) -> io::Result<()> {
        let count = u16::try_from(row.cells().len()).map_err(|_| invalid_input("too many cells"))?;
        out.write_u16::<BigEndian>(count)?;
        for cell in row.cells() {
            write_short_length_bytes(out, cell.column.as_bytes())?;
            let flags = if cell.is_expiring() {
                CELL_EXPIRING
            } else if cell.is_tombstone() {
                CELL_DELETED
            } else {
                0
            };
            out.write_u8(flags)?;
            out.write_i64::<BigEndian>(cell.timestamp)?;
            if cell.is_expiring() {
                out.write_i32::<BigEndian>(cell.ttl)?;
            }
            if flags != 0 {
                out.write_i32::<BigEndian>(cell.local_deletion_time)?;
            }
            let len = i32::try_from(cell.value.len()).map_err(|_| invalid_input("cell value too large"))?;
            out.write_i32::<BigEndian>(len)?;
            out.write_all(&cell.value)?;
        }
        Ok(())
    }
}

impl PartitionCodec for LegacyCodec {
    fn version(&self) -> FormatVersion {
        FormatVersion::Legacy
    }

    fn read_static_row(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        _state: &mut PartitionState,
    ) -> Result<Row, DecodeError> {
        let mut row = Row::empty_static();
        self.read_cells(input, ctx, ColumnKind::Static, &mut row)?;
        Ok(row)
    }

    fn read_unfiltered(
        &self,
        input: &mut dyn Read,
        ctx: &CodecContext<'_>,
        _state: &mut PartitionState,
    ) -> Result<Option<Unfiltered>, DecodeError> {
        match input.read_u8()? {
            KIND_END_OF_PARTITION => Ok(None),
            KIND_ROW => {
                let clustering = self.read_clustering(input)?;
                let expected = ctx.metadata.clustering_columns().len();
                if clustering.len() != expected {
                    return Err(DecodeError::malformed(format!(
                        "row has {} clustering values, table has {} clustering columns",
                        clustering.len(),
                        expected
                    )));
                }
                let timestamp = input.read_i64::<BigEndian>()?;
                let ttl = input.read_i32::<BigEndian>()?;
                let local_expiration_time = input.read_i32::<BigEndian>()?;
                let deletion = read_deletion_time(input)?;
                let mut row = Row::regular(clustering)
                    .with_liveness(LivenessInfo::expiring(timestamp, ttl, local_expiration_time))
                    .with_deletion(deletion);
                self.read_cells(input, ctx, ColumnKind::Regular, &mut row)?;
                Ok(Some(Unfiltered::Row(row)))
            }
            KIND_MARKER => {
                let raw_kind = input.read_u8()?;
                let kind = BoundKind::from_u8(raw_kind)
                    .ok_or_else(|| DecodeError::malformed(format!("invalid bound kind {}", raw_kind)))?;
                let clustering = self.read_clustering(input)?;
                if clustering.len() > ctx.metadata.clustering_columns().len() {
                    return Err(DecodeError::malformed("marker clustering longer than table clustering"));
                }
                let first = read_deletion_time(input)?;
                let marker = if kind.is_boundary() {
                    let start = read_deletion_time(input)?;
                    RangeTombstoneMarker::boundary(kind, clustering, first, start)
                } else {
                    RangeTombstoneMarker::bound(kind, clustering, first)
                };
                Ok(Some(Unfiltered::Marker(marker)))
            }
            other => Err(DecodeError::malformed(format!("invalid legacy entry kind {}", other))),
        }
    }

    fn write_static_row(
        &self,
        row: &Row,
        out: &mut dyn Write,
        _ctx: &CodecContext<'_>,
        _state: &mut PartitionState,
    ) -> io::Result<()> {
        self.write_cells(row, out)
    }

    fn write_unfiltered(
        &self,
        unfiltered: &Unfiltered,
        out: &mut dyn Write,
        _ctx: &CodecContext<'_>,
        _state: &mut PartitionState,
    ) -> io::Result<()> {
        match unfiltered {
            Unfiltered::Row(row) => {
                out.write_u8(KIND_ROW)?;
                self.write_clustering(&row.clustering, out)?;
                out.write_i64::<BigEndian>(row.liveness.timestamp)?;
                out.write_i32::<BigEndian>(row.liveness.ttl)?;
                out.write_i32::<BigEndian>(row.liveness.local_expiration_time)?;
                write_deletion_time(out, row.deletion)?;
                self.write_cells(row, out)
            }
            Unfiltered::Marker(marker) => {
                out.write_u8(KIND_MARKER)?;
                out.write_u8(marker.kind as u8)?;
                self.write_clustering(&marker.clustering, out)?;
                match marker.deletion {
                    MarkerDeletion::Bound(d) => write_deletion_time(out, d),
                    MarkerDeletion::Boundary { end, start } => {
                        write_deletion_time(out, end)?;
                        write_deletion_time(out, start)
                    }
                }
            }
        }
    }

    fn write_end_of_partition(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_u8(KIND_END_OF_PARTITION)
    }
}
