//! Deletion and liveness markers.

/// Local deletion time of data that is not deleted.
pub const NO_DELETION_TIME: i32 = i32::MAX;
/// TTL of data that does not expire.
pub const NO_TTL: i32 = 0;
/// Timestamp of an empty liveness marker.
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// A deletion: everything written at or before `marked_for_delete_at` is
/// shadowed. `local_deletion_time` is the server time (seconds) the deletion
/// was recorded, used for tombstone collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeletionTime {
    pub marked_for_delete_at: i64,
    pub local_deletion_time: i32,
}

impl DeletionTime {
    /// The absence of a deletion.
    pub const LIVE: DeletionTime = DeletionTime {
        marked_for_delete_at: i64::MIN,
        local_deletion_time: NO_DELETION_TIME,
    };

    #[must_use]
    pub fn new(marked_for_delete_at: i64, local_deletion_time: i32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        *self == Self::LIVE
    }

    /// Returns `true` if this deletion shadows data written at `timestamp`.
    #[must_use]
    pub fn deletes(&self, timestamp: i64) -> bool {
        timestamp <= self.marked_for_delete_at
    }
}

impl Default for DeletionTime {
    fn default() -> Self {
        Self::LIVE
    }
}

/// Primary key liveness of a row: when it was inserted and whether it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LivenessInfo {
    pub timestamp: i64,
    pub ttl: i32,
    pub local_expiration_time: i32,
}

impl LivenessInfo {
    pub const EMPTY: LivenessInfo = LivenessInfo {
        timestamp: NO_TIMESTAMP,
        ttl: NO_TTL,
        local_expiration_time: NO_DELETION_TIME,
    };

    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::EMPTY
        }
    }

    #[must_use]
    pub fn expiring(timestamp: i64, ttl: i32, local_expiration_time: i32) -> Self {
        Self {
            timestamp,
            ttl,
            local_expiration_time,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamp == NO_TIMESTAMP
    }

    #[must_use]
    pub fn is_expiring(&self) -> bool {
        self.ttl != NO_TTL
    }
}

impl Default for LivenessInfo {
    fn default() -> Self {
        Self::EMPTY
    }
}
