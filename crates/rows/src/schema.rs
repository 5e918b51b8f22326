//! Table schema and serialization headers.
//!
//! [`TableMetadata`] is the local node's current view of a table.
//! [`SerializationHeaderComponent`] is the schema snapshot a segment was
//! written with, as shipped alongside streamed data. Before decoding, the
//! component is resolved against the local schema into a
//! [`SerializationHeader`]; a column the local schema neither knows nor has
//! dropped makes the resolution fail with [`DecodeError::UnknownColumn`].

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::serialization::{read_short_length_bytes, write_short_length_bytes};
use crate::token::{DecoratedKey, Partitioner};

/// Stable identifier of a table, independent of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub Uuid);

impl TableId {
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Blob = 0,
    Text = 1,
    Int = 2,
    BigInt = 3,
    Boolean = 4,
    Counter = 5,
}

impl ColumnType {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ColumnType::Blob),
            1 => Some(ColumnType::Text),
            2 => Some(ColumnType::Int),
            3 => Some(ColumnType::BigInt),
            4 => Some(ColumnType::Boolean),
            5 => Some(ColumnType::Counter),
            _ => None,
        }
    }

    /// Width of values of this type, for fixed-width types.
    #[must_use]
    pub fn fixed_length(self) -> Option<usize> {
        match self {
            ColumnType::Int => Some(4),
            ColumnType::BigInt => Some(8),
            ColumnType::Boolean => Some(1),
            ColumnType::Blob | ColumnType::Text | ColumnType::Counter => None,
        }
    }

    #[must_use]
    pub fn is_counter(self) -> bool {
        self == ColumnType::Counter
    }

    /// Checks that a non-empty `value` is well-formed for this type.
    pub fn validate(self, value: &[u8]) -> Result<(), DecodeError> {
        if value.is_empty() {
            return Ok(());
        }
        if let Some(width) = self.fixed_length() {
            if value.len() != width {
                return Err(DecodeError::malformed(format!(
                    "{:?} value must be {} bytes, got {}",
                    self,
                    width,
                    value.len()
                )));
            }
        }
        if self == ColumnType::Text && std::str::from_utf8(value).is_err() {
            return Err(DecodeError::malformed("text value is not valid UTF-8"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Clustering,
    Static,
    Regular,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub kind: ColumnKind,
    pub column_type: ColumnType,
}

/// The local definition of a table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub id: TableId,
    pub keyspace: String,
    pub name: String,
    clustering: Vec<ColumnMetadata>,
    static_columns: Vec<ColumnMetadata>,
    regular_columns: Vec<ColumnMetadata>,
    /// Dropped column name -> timestamp of the drop.
    dropped_columns: HashMap<String, i64>,
    partitioner: Partitioner,
}

impl TableMetadata {
    pub fn builder(keyspace: impl Into<String>, name: impl Into<String>) -> TableMetadataBuilder {
        TableMetadataBuilder {
            id: None,
            keyspace: keyspace.into(),
            name: name.into(),
            clustering: Vec::new(),
            static_columns: Vec::new(),
            regular_columns: Vec::new(),
            dropped_columns: HashMap::new(),
        }
    }

    #[must_use]
    pub fn clustering_columns(&self) -> &[ColumnMetadata] {
        &self.clustering
    }

    #[must_use]
    pub fn static_columns(&self) -> &[ColumnMetadata] {
        &self.static_columns
    }

    #[must_use]
    pub fn regular_columns(&self) -> &[ColumnMetadata] {
        &self.regular_columns
    }

    /// Looks up a static or regular column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.static_columns
            .iter()
            .chain(self.regular_columns.iter())
            .find(|c| c.name == name)
    }

    #[must_use]
    pub fn dropped_at(&self, name: &str) -> Option<i64> {
        self.dropped_columns.get(name).copied()
    }

    #[must_use]
    pub fn has_static_columns(&self) -> bool {
        !self.static_columns.is_empty()
    }

    /// Counter tables are tables whose regular columns are counters.
    #[must_use]
    pub fn is_counter(&self) -> bool {
        self.regular_columns
            .iter()
            .any(|c| c.column_type.is_counter())
    }

    #[must_use]
    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    #[must_use]
    pub fn decorate_key(&self, key: Vec<u8>) -> DecoratedKey {
        self.partitioner.decorate_key(key)
    }
}

pub struct TableMetadataBuilder {
    id: Option<TableId>,
    keyspace: String,
    name: String,
    clustering: Vec<ColumnMetadata>,
    static_columns: Vec<ColumnMetadata>,
    regular_columns: Vec<ColumnMetadata>,
    dropped_columns: HashMap<String, i64>,
}

impl TableMetadataBuilder {
    #[must_use]
    pub fn id(mut self, id: TableId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn clustering(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.clustering.push(ColumnMetadata {
            name: name.into(),
            kind: ColumnKind::Clustering,
            column_type,
        });
        self
    }

    #[must_use]
    pub fn static_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.static_columns.push(ColumnMetadata {
            name: name.into(),
            kind: ColumnKind::Static,
            column_type,
        });
        self
    }

    #[must_use]
    pub fn regular(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.regular_columns.push(ColumnMetadata {
            name: name.into(),
            kind: ColumnKind::Regular,
            column_type,
        });
        self
    }

    /// Records that a column existed and was dropped at `dropped_at`.
    #[must_use]
    pub fn dropped(mut self, name: impl Into<String>, dropped_at: i64) -> Self {
        self.dropped_columns.insert(name.into(), dropped_at);
        self
    }

    #[must_use]
    pub fn build(self) -> TableMetadata {
        TableMetadata {
            id: self.id.unwrap_or_else(TableId::random),
            keyspace: self.keyspace,
            name: self.name,
            clustering: self.clustering,
            static_columns: self.static_columns,
            regular_columns: self.regular_columns,
            dropped_columns: self.dropped_columns,
            partitioner: Partitioner,
        }
    }
}

/// Minimum values of a segment's timestamps, used as the base for delta
/// encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingStats {
    pub min_timestamp: i64,
    pub min_local_deletion_time: i32,
    pub min_ttl: i32,
}

impl EncodingStats {
    pub const NO_STATS: EncodingStats = EncodingStats {
        min_timestamp: 0,
        min_local_deletion_time: 0,
        min_ttl: 0,
    };
}

/// The schema snapshot a segment was serialized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationHeaderComponent {
    pub clustering_types: Vec<ColumnType>,
    pub static_columns: Vec<(String, ColumnType)>,
    pub regular_columns: Vec<(String, ColumnType)>,
    pub stats: EncodingStats,
}

impl SerializationHeaderComponent {
    /// Snapshot of the current local schema.
    #[must_use]
    pub fn from_metadata(metadata: &TableMetadata, stats: EncodingStats) -> Self {
        let pairs = |cols: &[ColumnMetadata]| {
            cols.iter()
                .map(|c| (c.name.clone(), c.column_type))
                .collect::<Vec<_>>()
        };
        Self {
            clustering_types: metadata.clustering.iter().map(|c| c.column_type).collect(),
            static_columns: pairs(&metadata.static_columns),
            regular_columns: pairs(&metadata.regular_columns),
            stats,
        }
    }

    /// Resolves every column of the snapshot against `metadata`.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::UnknownColumn`] if a column is neither in the local
    ///   schema (with the same kind) nor recorded as dropped.
    /// - [`DecodeError::Malformed`] if clustering arity or a column type
    ///   disagrees with the local schema.
    pub fn to_header(&self, metadata: &TableMetadata) -> Result<SerializationHeader, DecodeError> {
        if self.clustering_types.len() != metadata.clustering.len() {
            return Err(DecodeError::malformed(format!(
                "header has {} clustering columns, table {}.{} has {}",
                self.clustering_types.len(),
                metadata.keyspace,
                metadata.name,
                metadata.clustering.len()
            )));
        }

        let resolve = |cols: &[(String, ColumnType)], kind: ColumnKind| {
            cols.iter()
                .map(|(name, column_type)| resolve_column(metadata, name, *column_type, kind))
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(SerializationHeader {
            clustering_types: self.clustering_types.clone(),
            static_columns: resolve(&self.static_columns, ColumnKind::Static)?,
            regular_columns: resolve(&self.regular_columns, ColumnKind::Regular)?,
            stats: self.stats,
        })
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u16::<BigEndian>(len_u16(self.clustering_types.len())?)?;
        for t in &self.clustering_types {
            w.write_u8(*t as u8)?;
        }
        for cols in [&self.static_columns, &self.regular_columns] {
            w.write_u16::<BigEndian>(len_u16(cols.len())?)?;
            for (name, t) in cols {
                write_short_length_bytes(w, name.as_bytes())?;
                w.write_u8(*t as u8)?;
            }
        }
        w.write_i64::<BigEndian>(self.stats.min_timestamp)?;
        w.write_i32::<BigEndian>(self.stats.min_local_deletion_time)?;
        w.write_i32::<BigEndian>(self.stats.min_ttl)?;
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, DecodeError> {
        let n = r.read_u16::<BigEndian>()? as usize;
        let mut clustering_types = Vec::with_capacity(n);
        for _ in 0..n {
            clustering_types.push(read_column_type(r)?);
        }
        let mut lists = [Vec::new(), Vec::new()];
        for list in lists.iter_mut() {
            let n = r.read_u16::<BigEndian>()? as usize;
            for _ in 0..n {
                let name = String::from_utf8(read_short_length_bytes(r)?)
                    .map_err(|_| DecodeError::malformed("column name is not valid UTF-8"))?;
                list.push((name, read_column_type(r)?));
            }
        }
        let [static_columns, regular_columns] = lists;
        let stats = EncodingStats {
            min_timestamp: r.read_i64::<BigEndian>()?,
            min_local_deletion_time: r.read_i32::<BigEndian>()?,
            min_ttl: r.read_i32::<BigEndian>()?,
        };
        Ok(Self {
            clustering_types,
            static_columns,
            regular_columns,
            stats,
        })
    }
}

fn len_u16(len: usize) -> std::io::Result<u16> {
    u16::try_from(len).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "too many columns in header")
    })
}

fn read_column_type<R: Read + ?Sized>(r: &mut R) -> Result<ColumnType, DecodeError> {
    let code = r.read_u8()?;
    ColumnType::from_u8(code)
        .ok_or_else(|| DecodeError::malformed(format!("unknown column type code {}", code)))
}

fn resolve_column(
    metadata: &TableMetadata,
    name: &str,
    column_type: ColumnType,
    kind: ColumnKind,
) -> Result<HeaderColumn, DecodeError> {
    match metadata.column(name) {
        Some(col) if col.kind == kind => {
            if col.column_type != column_type {
                return Err(DecodeError::malformed(format!(
                    "column {} is {:?} locally but {:?} in the stream",
                    name, col.column_type, column_type
                )));
            }
            Ok(HeaderColumn::Live(col.clone()))
        }
        _ => match metadata.dropped_at(name) {
            Some(dropped_at) => Ok(HeaderColumn::Dropped {
                name: name.to_string(),
                column_type,
                dropped_at,
            }),
            None => Err(DecodeError::UnknownColumn {
                name: name.to_string(),
            }),
        },
    }
}

/// A header column after resolution against the local schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderColumn {
    Live(ColumnMetadata),
    /// Present in the sender's schema but dropped locally: values are read
    /// and discarded.
    Dropped {
        name: String,
        column_type: ColumnType,
        dropped_at: i64,
    },
}

impl HeaderColumn {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            HeaderColumn::Live(c) => &c.name,
            HeaderColumn::Dropped { name, .. } => name,
        }
    }

    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            HeaderColumn::Live(c) => c.column_type,
            HeaderColumn::Dropped { column_type, .. } => *column_type,
        }
    }

    #[must_use]
    pub fn is_dropped(&self) -> bool {
        matches!(self, HeaderColumn::Dropped { .. })
    }
}

/// A serialization header resolved against the local schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationHeader {
    clustering_types: Vec<ColumnType>,
    static_columns: Vec<HeaderColumn>,
    regular_columns: Vec<HeaderColumn>,
    stats: EncodingStats,
}

impl SerializationHeader {
    /// Header describing exactly the local schema.
    #[must_use]
    pub fn for_metadata(metadata: &TableMetadata, stats: EncodingStats) -> Self {
        let live = |cols: &[ColumnMetadata]| {
            cols.iter()
                .cloned()
                .map(HeaderColumn::Live)
                .collect::<Vec<_>>()
        };
        Self {
            clustering_types: metadata.clustering.iter().map(|c| c.column_type).collect(),
            static_columns: live(&metadata.static_columns),
            regular_columns: live(&metadata.regular_columns),
            stats,
        }
    }

    #[must_use]
    pub fn clustering_types(&self) -> &[ColumnType] {
        &self.clustering_types
    }

    #[must_use]
    pub fn static_columns(&self) -> &[HeaderColumn] {
        &self.static_columns
    }

    #[must_use]
    pub fn regular_columns(&self) -> &[HeaderColumn] {
        &self.regular_columns
    }

    #[must_use]
    pub fn stats(&self) -> EncodingStats {
        self.stats
    }

    #[must_use]
    pub fn has_static(&self) -> bool {
        !self.static_columns.is_empty()
    }

    /// Converts back into the shippable component form.
    #[must_use]
    pub fn to_component(&self) -> SerializationHeaderComponent {
        let pairs = |cols: &[HeaderColumn]| {
            cols.iter()
                .map(|c| (c.name().to_string(), c.column_type()))
                .collect::<Vec<_>>()
        };
        SerializationHeaderComponent {
            clustering_types: self.clustering_types.clone(),
            static_columns: pairs(&self.static_columns),
            regular_columns: pairs(&self.regular_columns),
            stats: self.stats,
        }
    }
}
