//! # SSTable - Partition Segments
//!
//! Immutable, on-disk segment files holding the partitions of one table.
//!
//! A segment is produced incrementally by [`SSTableWriter`] (one
//! [`append`](SSTableWriter::append) per partition, in the order they
//! arrive) and read back by [`SSTableReader`]. Segments are *write-once,
//! read-many*: the writer works on a temp file that only becomes visible
//! under its final name once [`finish`](SSTableWriter::finish) succeeds.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (one record per partition, append order)          │
//! │                                                               │
//! │ crc32 (u32) | len (u32) | partition bytes                     │
//! │                                                               │
//! │ Partition bytes use the current row format (v3). The CRC32    │
//! │ covers len and the partition bytes.                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (key -> data_offset mapping)                     │
//! │                                                               │
//! │ key_len (u32) | key | data_offset (u64)                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ STATS (table id, repairedAt, pending repair, level,            │
//! │        row format, serialization header, partition count,      │
//! │        min/max token)                                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 28 bytes)                                  │
//! │                                                               │
//! │ partition_count (u64 LE) | stats_offset (u64 LE)               │
//! │ index_offset (u64 LE) | magic (u32 LE) "SSP1"                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Framing integers are little-endian; the partition bytes and the
//! serialization header follow the big-endian row format.

mod format;
mod reader;
mod writer;

pub use format::{Footer, SegmentStats, FOOTER_BYTES, SEGMENT_MAGIC};
pub use reader::SSTableReader;
pub use writer::{SSTableWriter, SegmentOptions};

/// Suffix of segments still being written.
pub const TMP_SUFFIX: &str = ".sst.tmp";

#[cfg(test)]
mod tests;
