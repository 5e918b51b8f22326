//! Rows, cells and range tombstone markers.

use crate::deletion::{DeletionTime, LivenessInfo, NO_DELETION_TIME, NO_TTL};

/// Clustering prefix of a row or marker: one value per clustering column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Clustering(pub Vec<Vec<u8>>);

impl Clustering {
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn of(values: &[&[u8]]) -> Self {
        Self(values.iter().map(|v| v.to_vec()).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Vec<u8>] {
        &self.0
    }
}

/// A single column value inside a row.
///
/// A cell is either live, expiring (`ttl != NO_TTL`) or a tombstone
/// (`local_deletion_time` set, no TTL, empty value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub column: String,
    pub timestamp: i64,
    pub ttl: i32,
    pub local_deletion_time: i32,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn live(column: impl Into<String>, timestamp: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            timestamp,
            ttl: NO_TTL,
            local_deletion_time: NO_DELETION_TIME,
            value: value.into(),
        }
    }

    pub fn expiring(
        column: impl Into<String>,
        timestamp: i64,
        ttl: i32,
        local_expiration_time: i32,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            column: column.into(),
            timestamp,
            ttl,
            local_deletion_time: local_expiration_time,
            value: value.into(),
        }
    }

    pub fn tombstone(column: impl Into<String>, timestamp: i64, local_deletion_time: i32) -> Self {
        Self {
            column: column.into(),
            timestamp,
            ttl: NO_TTL,
            local_deletion_time,
            value: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.ttl == NO_TTL && self.local_deletion_time != NO_DELETION_TIME
    }

    #[must_use]
    pub fn is_expiring(&self) -> bool {
        self.ttl != NO_TTL
    }

    /// Returns `true` if the cell still carries a value at `now_in_sec`.
    #[must_use]
    pub fn is_live(&self, now_in_sec: i32) -> bool {
        if self.is_tombstone() {
            return false;
        }
        !self.is_expiring() || now_in_sec < self.local_deletion_time
    }

    /// Converts an expired cell into the tombstone it is equivalent to.
    #[must_use]
    pub fn into_tombstone(self) -> Cell {
        let local_deletion_time = if self.is_expiring() {
            self.local_deletion_time.saturating_sub(self.ttl)
        } else {
            self.local_deletion_time
        };
        Cell::tombstone(self.column, self.timestamp, local_deletion_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Static,
    Regular,
}

/// A row: clustering, primary key liveness, row deletion and cells.
///
/// Cells are kept sorted by column name whatever order they were decoded in,
/// so rows produced by different format versions compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub kind: RowKind,
    pub clustering: Clustering,
    pub liveness: LivenessInfo,
    pub deletion: DeletionTime,
    cells: Vec<Cell>,
    counter_local_to_be_cleared: bool,
}

impl Row {
    #[must_use]
    pub fn regular(clustering: Clustering) -> Self {
        Self {
            kind: RowKind::Regular,
            clustering,
            liveness: LivenessInfo::EMPTY,
            deletion: DeletionTime::LIVE,
            cells: Vec::new(),
            counter_local_to_be_cleared: false,
        }
    }

    #[must_use]
    pub fn empty_static() -> Self {
        Self {
            kind: RowKind::Static,
            ..Self::regular(Clustering::empty())
        }
    }

    #[must_use]
    pub fn with_liveness(mut self, liveness: LivenessInfo) -> Self {
        self.liveness = liveness;
        self
    }

    #[must_use]
    pub fn with_deletion(mut self, deletion: DeletionTime) -> Self {
        self.deletion = deletion;
        self
    }

    #[must_use]
    pub fn with_cell(mut self, cell: Cell) -> Self {
        self.insert_cell(cell);
        self
    }

    /// Inserts `cell` in column order. Returns `false` (and leaves the row
    /// unchanged) if the row already holds a cell for that column.
    pub fn insert_cell(&mut self, cell: Cell) -> bool {
        match self
            .cells
            .binary_search_by(|c| c.column.as_str().cmp(cell.column.as_str()))
        {
            Ok(_) => false,
            Err(pos) => {
                self.cells.insert(pos, cell);
                true
            }
        }
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[must_use]
    pub fn cell(&self, column: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.column == column)
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.kind == RowKind::Static
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.liveness.is_empty() && self.deletion.is_live() && self.cells.is_empty()
    }

    /// Flags the counter shards owned by this node as stale.
    ///
    /// Counter rows received from a peer must not be merged with local
    /// increments as if they were local; the flag is persisted with the row
    /// so the shards are cleared on the next local read-repair of the counter.
    #[must_use]
    pub fn mark_counter_local_to_be_cleared(mut self) -> Self {
        self.counter_local_to_be_cleared = true;
        self
    }

    #[must_use]
    pub fn is_counter_local_to_be_cleared(&self) -> bool {
        self.counter_local_to_be_cleared
    }

    pub(crate) fn set_counter_local_to_be_cleared(&mut self, value: bool) {
        self.counter_local_to_be_cleared = value;
    }
}

/// Kind of a range tombstone bound. Boundaries close one deletion and open
/// the next at the same clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoundKind {
    InclStart = 0,
    ExclStart = 1,
    InclEnd = 2,
    ExclEnd = 3,
    InclEndExclStartBoundary = 4,
    ExclEndInclStartBoundary = 5,
}

impl BoundKind {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(BoundKind::InclStart),
            1 => Some(BoundKind::ExclStart),
            2 => Some(BoundKind::InclEnd),
            3 => Some(BoundKind::ExclEnd),
            4 => Some(BoundKind::InclEndExclStartBoundary),
            5 => Some(BoundKind::ExclEndInclStartBoundary),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            BoundKind::InclEndExclStartBoundary | BoundKind::ExclEndInclStartBoundary
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerDeletion {
    Bound(DeletionTime),
    Boundary { end: DeletionTime, start: DeletionTime },
}

/// Opens, closes, or switches a range deletion at a clustering prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstoneMarker {
    pub kind: BoundKind,
    pub clustering: Clustering,
    pub deletion: MarkerDeletion,
}

impl RangeTombstoneMarker {
    #[must_use]
    pub fn bound(kind: BoundKind, clustering: Clustering, deletion: DeletionTime) -> Self {
        debug_assert!(!kind.is_boundary());
        Self {
            kind,
            clustering,
            deletion: MarkerDeletion::Bound(deletion),
        }
    }

    #[must_use]
    pub fn boundary(
        kind: BoundKind,
        clustering: Clustering,
        end: DeletionTime,
        start: DeletionTime,
    ) -> Self {
        debug_assert!(kind.is_boundary());
        Self {
            kind,
            clustering,
            deletion: MarkerDeletion::Boundary { end, start },
        }
    }
}

/// An entry of a partition's row sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unfiltered {
    Row(Row),
    Marker(RangeTombstoneMarker),
}

impl Unfiltered {
    #[must_use]
    pub fn is_row(&self) -> bool {
        matches!(self, Unfiltered::Row(_))
    }

    #[must_use]
    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Unfiltered::Row(r) => Some(r),
            Unfiltered::Marker(_) => None,
        }
    }

    #[must_use]
    pub fn clustering(&self) -> &Clustering {
        match self {
            Unfiltered::Row(r) => &r.clustering,
            Unfiltered::Marker(m) => &m.clustering,
        }
    }
}

impl From<Row> for Unfiltered {
    fn from(row: Row) -> Self {
        Unfiltered::Row(row)
    }
}

impl From<RangeTombstoneMarker> for Unfiltered {
    fn from(marker: RangeTombstoneMarker) -> Self {
        Unfiltered::Marker(marker)
    }
}
