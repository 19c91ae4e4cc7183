//! # Checkpoints
//!
//! A [`LockPoint`] is a linear function frozen at a moment:
//!
//! ```text
//! balance(t) = max(0, bias - slope * (t - ts))      for t >= ts
//! ```
//!
//! Histories of points are append-only vectors sorted by `ts` (and by `blk`,
//! since both only move forward). "What was the value at time T" is a binary
//! search for the last point at or before T followed by one evaluation.
//!
//! Every loop that walks time forward reports a [`Progress`]. A loop that hit
//! its step bound returns `caught_up = false`; calling it again resumes where
//! it stopped. Nothing is lost, only deferred.

use serde::{Deserialize, Serialize};

use crate::math::{secs, Amount, FixedMath};
use crate::time::{BlockHeight, Timestamp};

/// One checkpoint of a decaying balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockPoint {
    /// Value at `ts`.
    pub bias: Amount,
    /// Decay per second after `ts`.
    pub slope: Amount,
    /// When the point was recorded.
    pub ts: Timestamp,
    /// Block height at `ts`.
    pub blk: BlockHeight,
}

impl LockPoint {
    /// A flat zero at the given moment.
    pub fn zero(ts: Timestamp, blk: BlockHeight) -> Self {
        Self {
            bias: Amount::zero(),
            slope: Amount::zero(),
            ts,
            blk,
        }
    }

    /// Value at `t`, clamped at zero. Times before `ts` read as `bias`:
    /// points never extrapolate backwards.
    pub fn balance_at(&self, t: Timestamp) -> Amount {
        let dt = t.saturating_sub(self.ts);
        self.bias.floor_sub(self.slope.saturating_mul(secs(dt)))
    }

    /// Time at which the linear function reaches zero, if it decays at all.
    pub fn zero_at(&self) -> Option<Timestamp> {
        if self.slope.is_zero() {
            return None;
        }
        let dt = self.bias.try_div(self.slope).ok()?;
        Some(self.ts.saturating_add(dt.low_u64()))
    }
}

/// Outcome of one bounded catch-up call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    /// Units of work done (weeks advanced, points consumed, ...).
    pub steps: u64,
    /// `true` when the cursor reached its target.
    pub caught_up: bool,
}

impl Progress {
    /// Reached the target after `steps` units of work.
    pub fn done(steps: u64) -> Self {
        Self {
            steps,
            caught_up: true,
        }
    }

    /// Hit the step bound before reaching the target.
    pub fn partial(steps: u64) -> Self {
        Self {
            steps,
            caught_up: false,
        }
    }

    /// Nothing to do.
    pub fn idle() -> Self {
        Self::done(0)
    }

    /// Combines two reports: work adds up, convergence requires both.
    pub fn and(self, other: Progress) -> Self {
        Self {
            steps: self.steps + other.steps,
            caught_up: self.caught_up && other.caught_up,
        }
    }
}

/// Index of the last element whose key is `<= target`, for a slice sorted
/// by non-decreasing key. `None` if every key is greater.
pub fn last_at_or_before<T, F>(items: &[T], key: F, target: u64) -> Option<usize>
where
    F: Fn(&T) -> u64,
{
    let idx = items.partition_point(|item| key(item) <= target);
    idx.checked_sub(1)
}

/// Last point recorded at or before time `t`.
pub fn find_timestamp_epoch(points: &[LockPoint], t: Timestamp) -> Option<usize> {
    last_at_or_before(points, |p| p.ts, t)
}

/// Last point recorded at or before block `height`.
pub fn find_block_epoch(points: &[LockPoint], height: BlockHeight) -> Option<usize> {
    last_at_or_before(points, |p| p.blk, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(bias: u64, slope: u64, ts: u64, blk: u64) -> LockPoint {
        LockPoint {
            bias: Amount::from(bias),
            slope: Amount::from(slope),
            ts,
            blk,
        }
    }

    #[test]
    fn balance_decays_linearly_and_clamps() {
        let p = point(1_000, 10, 100, 1);
        assert_eq!(p.balance_at(100), Amount::from(1_000u64));
        assert_eq!(p.balance_at(150), Amount::from(500u64));
        assert_eq!(p.balance_at(200), Amount::zero());
        assert_eq!(p.balance_at(10_000), Amount::zero());
        // No backwards extrapolation.
        assert_eq!(p.balance_at(50), Amount::from(1_000u64));
        assert_eq!(p.zero_at(), Some(200));
    }

    #[test]
    fn binary_search_picks_latest_at_or_before() {
        let history = vec![
            point(0, 0, 10, 1),
            point(0, 0, 20, 2),
            point(0, 0, 20, 3),
            point(0, 0, 30, 4),
        ];
        assert_eq!(find_timestamp_epoch(&history, 5), None);
        assert_eq!(find_timestamp_epoch(&history, 10), Some(0));
        assert_eq!(find_timestamp_epoch(&history, 25), Some(2));
        assert_eq!(find_timestamp_epoch(&history, 99), Some(3));
        assert_eq!(find_block_epoch(&history, 2), Some(1));
    }

    #[test]
    fn progress_combines() {
        let p = Progress::done(3).and(Progress::partial(4));
        assert_eq!(p.steps, 7);
        assert!(!p.caught_up);
        assert!(Progress::idle().and(Progress::done(1)).caught_up);
    }
}
