//! Week arithmetic and the block context.
//!
//! The engine has exactly one clock: the timestamp of the block a call
//! executes in. It never reads wall time on its own.

use serde::{Deserialize, Serialize};

use crate::config::WEEK;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// Monotonic block number.
pub type BlockHeight = u64;

/// Start of the week containing `t`.
pub fn week_floor(t: Timestamp) -> Timestamp {
    t / WEEK * WEEK
}

/// First week boundary at or after `t`.
pub fn week_ceil(t: Timestamp) -> Timestamp {
    week_floor(t.saturating_add(WEEK - 1))
}

/// The week boundary strictly after `t`.
pub fn next_week(t: Timestamp) -> Timestamp {
    week_floor(t) + WEEK
}

/// Whole weeks between the week of `from` and the week of `to`.
pub fn weeks_between(from: Timestamp, to: Timestamp) -> u64 {
    week_floor(to).saturating_sub(week_floor(from)) / WEEK
}

/// Where and when a call executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Block timestamp in seconds.
    pub timestamp: Timestamp,
    /// Block number.
    pub height: BlockHeight,
}

impl BlockContext {
    pub fn new(timestamp: Timestamp, height: BlockHeight) -> Self {
        Self { timestamp, height }
    }

    /// A later block, `secs` seconds and `blocks` heights ahead.
    pub fn advance(&self, secs: u64, blocks: u64) -> Self {
        Self {
            timestamp: self.timestamp + secs,
            height: self.height + blocks,
        }
    }

    /// `true` if `self` is not earlier than `prev` in either dimension.
    pub fn follows(&self, prev: &BlockContext) -> bool {
        self.timestamp >= prev.timestamp && self.height >= prev.height
    }
}
