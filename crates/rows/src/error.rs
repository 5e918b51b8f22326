use std::io;

use thiserror::Error;

use crate::serialization::FormatVersion;

/// Errors raised while decoding partitions from a byte stream.
///
/// An unexpected end of input is always reported as [`DecodeError::Truncated`],
/// never as a generic I/O error, so callers can tell a short stream apart from
/// a failing transport.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The underlying reader failed.
    #[error("io error: {0}")]
    Io(io::Error),

    /// The input ended in the middle of a partition.
    #[error("truncated input: stream ended before the partition was complete")]
    Truncated,

    /// A length, flag, size or value did not match the format.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// A column referenced by the stream does not resolve against the local schema.
    #[error("unknown column {name} during deserialization")]
    UnknownColumn { name: String },

    /// The format version requires a serialization header but none was supplied.
    #[error("format version {0} requires a serialization header")]
    MissingHeader(FormatVersion),

    /// The wire carried a version code this build does not understand.
    #[error("unsupported format version code {0}")]
    UnsupportedVersion(u8),
}

impl DecodeError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        DecodeError::Malformed(msg.into())
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::Truncated
        } else {
            DecodeError::Io(e)
        }
    }
}
