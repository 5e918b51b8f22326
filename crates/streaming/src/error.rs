use thiserror::Error;
use uuid::Uuid;

use rows::{DecodeError, DecoratedKey, TableId};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a segment transfer failed.
///
/// Every variant is fatal to the transfer. Whenever a writer had been
/// created it is aborted before one of these is returned.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The target table was dropped before the transfer started.
    #[error("table {table_id} was dropped before the transfer started")]
    TableGone { table_id: TableId },

    /// No data directory can hold the declared segment size.
    #[error("insufficient disk space to store {required} bytes")]
    NoSpace { required: u64 },

    /// The stream could not be decoded.
    #[error("failed to decode partition {}: {source}", display_key(.key))]
    Decode {
        key: Option<DecoratedKey>,
        #[source]
        source: DecodeError,
    },

    /// A key outside the locally owned ranges, with rejection enabled.
    #[error("received key {key} outside owned ranges {owned_ranges} in segment {segment}")]
    OutOfRange {
        owned_ranges: String,
        key: DecoratedKey,
        segment: String,
    },

    /// The local writer failed.
    #[error("failed to write partition {}: {source}", display_key(.key))]
    Write {
        key: Option<DecoratedKey>,
        #[source]
        source: BoxError,
    },

    /// The stream ended somewhere other than the declared total size.
    #[error("read {bytes_read} bytes, expected exactly {total_size}")]
    SizeMismatch { bytes_read: u64, total_size: u64 },

    /// The owning session was cancelled.
    #[error("stream session cancelled")]
    Cancelled,

    /// The session and the segment disagree on the pending repair.
    #[error("session pending repair {session} does not match segment pending repair {segment:?}")]
    PendingRepairMismatch {
        session: Uuid,
        segment: Option<Uuid>,
    },

    /// The writer could not be set up for a reason other than space.
    #[error("failed to create segment writer: {0}")]
    Setup(#[source] BoxError),
}

impl StreamError {
    pub(crate) fn decode(key: Option<DecoratedKey>, source: DecodeError) -> Self {
        StreamError::Decode { key, source }
    }

    pub(crate) fn write(key: Option<DecoratedKey>, source: impl Into<BoxError>) -> Self {
        StreamError::Write {
            key,
            source: source.into(),
        }
    }

    /// `true` when the fault lies with this node (disk, space, setup)
    /// rather than with the peer or the stream.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            StreamError::Write { .. }
                | StreamError::NoSpace { .. }
                | StreamError::Setup(_)
                | StreamError::TableGone { .. }
        )
    }

    /// Key of the partition being processed when the error happened.
    #[must_use]
    pub fn partition_key(&self) -> Option<&DecoratedKey> {
        match self {
            StreamError::Decode { key, .. } | StreamError::Write { key, .. } => key.as_ref(),
            StreamError::OutOfRange { key, .. } => Some(key),
            _ => None,
        }
    }
}

fn display_key(key: &Option<DecoratedKey>) -> String {
    match key {
        Some(k) => k.to_string(),
        None => "<unknown>".to_string(),
    }
}
