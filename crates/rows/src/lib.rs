//! # Rows - Partition Data Model
//!
//! The canonical in-memory representation of table data shared by the
//! RiptideKV streaming receiver and the local segment format.
//!
//! A table is split into **partitions**. Each partition is identified by a
//! [`DecoratedKey`] (raw key bytes plus the [`Token`] that places it on the
//! ring) and holds:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ partition key      (DecoratedKey)                         │
//! │ partition deletion (DeletionTime, LIVE if not deleted)    │
//! │ static row         (Row, possibly empty)                  │
//! │ unfiltereds        rows and range tombstone markers,      │
//! │                    in clustering order                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Bytes on the wire or on disk are turned into this model by the versioned
//! codecs in [`serialization`]. Every supported [`FormatVersion`] decodes into
//! the same types, so consumers never see which version produced a row.
//!
//! ## Module Responsibilities
//!
//! | Module            | Purpose                                                  |
//! |-------------------|----------------------------------------------------------|
//! | [`token`]         | `Token`, `Partitioner`, `DecoratedKey`                    |
//! | [`range`]         | `TokenRange` with wrap-around semantics, normalization   |
//! | [`deletion`]      | `DeletionTime`, `LivenessInfo`                            |
//! | [`row`]           | `Cell`, `Row`, `RangeTombstoneMarker`, `Unfiltered`       |
//! | [`partition`]     | Materialized `Partition`, `UnfilteredPartition` trait     |
//! | [`schema`]        | `TableMetadata`, serialization headers                    |
//! | [`serialization`] | Versioned partition codecs and vint primitives            |

pub mod deletion;
mod error;
pub mod partition;
pub mod range;
pub mod row;
pub mod schema;
pub mod serialization;
pub mod token;

pub use deletion::{DeletionTime, LivenessInfo, NO_DELETION_TIME, NO_TIMESTAMP, NO_TTL};
pub use error::DecodeError;
pub use partition::{Partition, PartitionIter, UnfilteredPartition};
pub use range::TokenRange;
pub use row::{BoundKind, Cell, Clustering, MarkerDeletion, RangeTombstoneMarker, Row, RowKind, Unfiltered};
pub use schema::{
    ColumnKind, ColumnMetadata, ColumnType, EncodingStats, HeaderColumn, SerializationHeader,
    SerializationHeaderComponent, TableId, TableMetadata, TableMetadataBuilder,
};
pub use serialization::{DeserializationFlag, DeserializationHelper, FormatVersion};
pub use token::{DecoratedKey, Partitioner, Token};

#[cfg(test)]
mod tests;
