//! Owned-range check for streamed partition keys.
//!
//! Partitions of a segment arrive in token order, so the validator walks
//! the sorted range list once per segment: the caller threads a
//! [`ScanPosition`] through consecutive [`RangeValidator::verify`] calls and
//! the index only ever moves forward. Over a whole segment this costs at
//! most `ranges + keys` range comparisons.
//!
//! Keys that arrive out of token order are a sender bug. The scan does not
//! rewind for them: such a key is reported as out of range even if an
//! earlier range would hold it.
//!
//! The range snapshot is taken when the validator is built. Ownership
//! changes during the transfer are not seen, so this is a safety net that
//! bounds the damage of misrouted data, not a guarantee.

use tracing::warn;
use uuid::Uuid;

use config::StreamingConfig;
use rows::range::format_ranges;
use rows::{DecoratedKey, TokenRange};

use crate::error::StreamError;
use crate::metrics::StorageMetrics;
use crate::nospam::NoSpamLogger;

/// What to do with a key outside the owned ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRangePolicy {
    /// Emit a rate-limited warning.
    pub log: bool,
    /// Fail the transfer.
    pub reject: bool,
}

impl OutOfRangePolicy {
    /// Accept everything silently.
    pub const PERMISSIVE: OutOfRangePolicy = OutOfRangePolicy {
        log: false,
        reject: false,
    };
}

impl From<&StreamingConfig> for OutOfRangePolicy {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            log: config.log_out_of_token_range_requests,
            reject: config.reject_out_of_token_range_requests,
        }
    }
}

/// Scan state carried from one key to the next within a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanPosition {
    /// Index of the first range that may still contain later keys.
    pub index: usize,
    /// Range comparisons made so far.
    pub comparisons: u64,
}

pub struct RangeValidator<'a> {
    ranges: Vec<TokenRange>,
    policy: OutOfRangePolicy,
    metrics: &'a StorageMetrics,
    nospam: &'a NoSpamLogger,
    plan_id: Uuid,
    segment: String,
    peer: String,
}

impl<'a> RangeValidator<'a> {
    /// `ranges` may be given in any shape, they are normalized here.
    pub fn new(
        ranges: Vec<TokenRange>,
        policy: OutOfRangePolicy,
        metrics: &'a StorageMetrics,
        nospam: &'a NoSpamLogger,
        plan_id: Uuid,
        segment: impl Into<String>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            ranges: TokenRange::normalize(ranges),
            policy,
            metrics,
            nospam,
            plan_id,
            segment: segment.into(),
            peer: peer.into(),
        }
    }

    #[must_use]
    pub fn ranges(&self) -> &[TokenRange] {
        &self.ranges
    }

    /// Checks `key` against the owned ranges, starting at `position`.
    ///
    /// Returns the position to use for the next key. A key outside every
    /// remaining range bumps `total_ops_for_invalid_token`, is logged
    /// (rate limited) if the policy says so, and fails with
    /// [`StreamError::OutOfRange`] if rejection is enabled.
    pub fn verify(
        &self,
        key: &DecoratedKey,
        position: ScanPosition,
    ) -> Result<ScanPosition, StreamError> {
        let token = key.token();
        let mut index = position.index;
        let mut comparisons = position.comparisons;

        while let Some(range) = self.ranges.get(index) {
            comparisons += 1;
            if !range.right.is_minimum() && range.right < token {
                index += 1;
                continue;
            }
            if range.contains(token) {
                return Ok(ScanPosition { index, comparisons });
            }
            break;
        }

        self.metrics.total_ops_for_invalid_token.inc();
        if self.policy.log && self.nospam.should_log() {
            warn!(
                plan_id = %self.plan_id,
                segment = %self.segment,
                peer = %self.peer,
                "[Stream #{}] Received streamed SSTable {} from {} containing key(s) outside valid ranges {}. Example: {}",
                self.plan_id,
                self.segment,
                self.peer,
                format_ranges(&self.ranges),
                key
            );
        }
        if self.policy.reject {
            return Err(StreamError::OutOfRange {
                owned_ranges: format_ranges(&self.ranges),
                key: key.clone(),
                segment: self.segment.clone(),
            });
        }
        Ok(ScanPosition { index, comparisons })
    }
}
