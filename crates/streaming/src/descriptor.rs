//! Per-segment transfer metadata.

use std::fmt;

use uuid::Uuid;

use rows::{FormatVersion, SerializationHeaderComponent, TableId};

/// A byte span `[start, end)` of the sender's data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionBounds {
    pub start: u64,
    pub end: u64,
}

impl SectionBounds {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage format variant requested for the local segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SSTableFormat {
    #[default]
    Big,
    Bti,
}

impl fmt::Display for SSTableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SSTableFormat::Big => write!(f, "big"),
            SSTableFormat::Bti => write!(f, "bti"),
        }
    }
}

/// Everything the protocol headers say about one incoming segment.
///
/// Built once per segment and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub table_id: TableId,
    pub estimated_keys: u64,
    /// Spans of the sender's file included in the stream. Only their total
    /// length matters on the receiving side.
    pub sections: Vec<SectionBounds>,
    /// Row format the stream is encoded with.
    pub version: FormatVersion,
    pub format: SSTableFormat,
    pub repaired_at: i64,
    pub pending_repair: Option<Uuid>,
    pub level: u32,
    /// Sender's schema snapshot. Absent for legacy senders.
    pub header: Option<SerializationHeaderComponent>,
    /// Sequence number of this file within the session.
    pub file_seq_num: u32,
}

impl TransferDescriptor {
    /// Number of bytes the stream carries for this segment, or `None` when
    /// the section spans add up past `u64::MAX`.
    #[must_use]
    pub fn total_size(&self) -> Option<u64> {
        self.sections
            .iter()
            .try_fold(0u64, |total, section| total.checked_add(section.len()))
    }
}
