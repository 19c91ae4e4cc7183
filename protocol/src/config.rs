//! # Protocol Configuration & Constants
//!
//! Every magic number in velock lives here. If you're hardcoding a week
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Two kinds of values live in this file:
//!
//! - **Constants** that define the accounting itself (week length, maximum
//!   lock time, fixed-point scale). Changing these changes every number the
//!   engine has ever produced.
//! - **Tunables** ([`CatchUpLimits`], [`InflationParams`]) that operators may
//!   set from a config file. Defaults match the values the protocol was
//!   designed and tested with.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::math::{decimal, Amount};
use crate::time::Timestamp;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// One day in seconds.
pub const DAY: Timestamp = 86_400;

/// One week in seconds. All attribution buckets are aligned to multiples of
/// this value counted from the Unix epoch.
pub const WEEK: Timestamp = 7 * DAY;

/// One inflation year. 365 days flat, no leap years, no calendar.
pub const YEAR: Timestamp = 365 * DAY;

/// Longest lock a user can take out. Four years of voting power, decaying
/// linearly to zero.
pub const MAXTIME: Timestamp = 4 * YEAR;

/// A user may re-vote for the same channel at most once per this interval.
pub const WEIGHT_VOTE_DELAY: Timestamp = 10 * DAY;

/// A fee claim only re-buckets deposits when the token cursor is older
/// than this.
pub const TOKEN_CHECKPOINT_DEADLINE: Timestamp = DAY;

// ---------------------------------------------------------------------------
// Fixed point
// ---------------------------------------------------------------------------

/// The fixed-point scale: 1.0 == 10^18.
pub const MULTIPLIER: Amount = U256([1_000_000_000_000_000_000, 0, 0, 0]);

/// Voting power allocations are in basis points. 10_000 bps == all of it.
pub const MAX_VOTE_POWER_BPS: u32 = 10_000;

/// Upper bound on channels a single `mint_many` call can touch.
pub const MINT_MANY_LIMIT: usize = 8;

// ---------------------------------------------------------------------------
// Inflation defaults
// ---------------------------------------------------------------------------

/// Supply minted at deployment: 1,303,030,303 tokens with 18 decimals.
pub const INITIAL_SUPPLY: u128 = 1_303_030_303_000_000_000_000_000_000;

/// Emission rate in the first inflation year, in base units per second.
/// 274,815,283 tokens spread over one `YEAR`.
pub const INITIAL_RATE: u128 = 8_714_335_457_889_396_245;

/// Rate is divided by this (scaled by `RATE_DENOMINATOR`) every year.
/// 2^(1/4) * 10^18, i.e. the rate halves every four years.
pub const RATE_REDUCTION_COEFFICIENT: u128 = 1_189_207_115_002_721_024;

/// Scale of `RATE_REDUCTION_COEFFICIENT`.
pub const RATE_DENOMINATOR: u128 = 1_000_000_000_000_000_000;

/// Delay between deployment and the first emitted token.
pub const INFLATION_DELAY: Timestamp = DAY;

// ---------------------------------------------------------------------------
// Tunables
// ---------------------------------------------------------------------------

/// Per-call work bounds for every catch-up loop in the engine.
///
/// Each bounded loop stops after this many steps and reports
/// `caught_up = false`. Whoever called it calls again. The exact numbers are
/// not load-bearing; their order of magnitude is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchUpLimits {
    /// Weeks of global lock history the escrow ledger advances per call.
    pub ledger_weeks: u32,
    /// Weeks a single weight history (channel, type sum, total) advances per call.
    pub weight_weeks: u32,
    /// Weeks of emission an accountant buckets per call.
    pub token_weeks: u32,
    /// Weeks of ve-supply an accountant snapshots per call.
    pub supply_weeks: u32,
    /// Loop iterations (points consumed plus weeks credited) per user checkpoint.
    pub user_epochs: u32,
    /// Inflation epochs the schedule rolls forward per sync round.
    pub inflation_epochs: u32,
}

impl Default for CatchUpLimits {
    fn default() -> Self {
        Self {
            ledger_weeks: 255,
            weight_weeks: 500,
            token_weeks: 20,
            supply_weeks: 20,
            user_epochs: 50,
            inflation_epochs: 4,
        }
    }
}

/// Parameters of the stepped emission curve.
///
/// Amounts are written as decimal strings in config files so that values
/// above `i64::MAX` survive a round trip through TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InflationParams {
    /// Supply minted to the admin at deployment.
    #[serde(with = "decimal")]
    pub initial_supply: Amount,
    /// First-year emission rate, base units per second.
    #[serde(with = "decimal")]
    pub initial_rate: Amount,
    /// Length of one inflation epoch in seconds.
    pub rate_reduction_time: Timestamp,
    /// Divisor applied to the rate at each epoch, scaled by `rate_denominator`.
    #[serde(with = "decimal")]
    pub rate_reduction_coefficient: Amount,
    /// Scale of `rate_reduction_coefficient`.
    #[serde(with = "decimal")]
    pub rate_denominator: Amount,
    /// Seconds between deployment and the start of epoch 0.
    pub inflation_delay: Timestamp,
}

impl Default for InflationParams {
    fn default() -> Self {
        Self {
            initial_supply: Amount::from(INITIAL_SUPPLY),
            initial_rate: Amount::from(INITIAL_RATE),
            rate_reduction_time: YEAR,
            rate_reduction_coefficient: Amount::from(RATE_REDUCTION_COEFFICIENT),
            rate_denominator: Amount::from(RATE_DENOMINATOR),
            inflation_delay: INFLATION_DELAY,
        }
    }
}
