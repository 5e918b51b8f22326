//! # Streaming - Inbound Segment Receiver
//!
//! Receives one segment streamed by a peer (bootstrap, rebuild, repair or
//! range movement), decodes it partition by partition and hands every
//! partition to a local [`SegmentWriter`].
//!
//! ```text
//! transport bytes
//!      │
//!      ▼
//! TrackedReader ──► StreamDeserializer ──► RangeValidator ──► SegmentWriter::append
//!  (bytes_read)     (versioned codec,      (side check,        (one partition
//!                    PreserveSize)          log / reject)        per call)
//!      ▲                                                             │
//!      └──────────── repeat until bytes_read == total_size ◄─────────┘
//! ```
//!
//! [`StreamReader::read`] returns the writer once the whole segment has been
//! consumed; finishing it is the caller's job. On any failure the writer is
//! aborted before the error is returned, so a failed transfer never leaves a
//! valid-looking segment behind.
//!
//! ## Module Responsibilities
//!
//! | Module           | Purpose                                                 |
//! |------------------|---------------------------------------------------------|
//! | [`cursor`]       | `TrackedReader`: exact count of consumed bytes          |
//! | [`descriptor`]   | `TransferDescriptor` built from the protocol headers    |
//! | [`deserializer`] | `StreamDeserializer`: per-partition decode state machine |
//! | [`validator`]    | `RangeValidator`: monotonic owned-range check            |
//! | [`reader`]       | `StreamReader`: orchestration and abort semantics        |
//! | [`session`]      | Collaborator traits (session, catalog, oracle, writers) |
//! | [`metrics`]      | Advisory counters                                       |
//! | [`nospam`]       | Rate limiter for repeated warnings                      |

pub mod cursor;
pub mod descriptor;
pub mod deserializer;
mod error;
pub mod metrics;
pub mod nospam;
pub mod reader;
pub mod session;
pub mod validator;
mod writer;

pub use cursor::TrackedReader;
pub use descriptor::{SSTableFormat, SectionBounds, TransferDescriptor};
pub use deserializer::{PartitionStream, StreamDeserializer};
pub use error::{BoxError, StreamError};
pub use metrics::{Counter, StorageMetrics};
pub use nospam::NoSpamLogger;
pub use reader::{pretty_print_memory, ReceiveContext, StreamReader};
pub use session::{
    Direction, ProgressInfo, RangeOracle, SegmentWriter, StreamSession, TableCatalog,
    WriterFactory, WriterParams,
};
pub use validator::{OutOfRangePolicy, RangeValidator, ScanPosition};

#[cfg(test)]
mod tests;
