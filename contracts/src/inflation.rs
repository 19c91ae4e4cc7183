//! # Inflation Schedule
//!
//! A stepped emission curve. The rate is constant for one inflation epoch
//! (a year by default) and is divided by `2^(1/4)` at every epoch boundary,
//! so it halves every four years:
//!
//! ```text
//! epoch:   -1        0               1                    2
//!          |---------|---------------|--------------------|----
//! rate:     0         r0              r0 / c               r0 / c^2
//!                   ^ deployment + inflation_delay
//! ```
//!
//! Epoch `-1` is the delay between deployment and the first emitted token.
//!
//! ## Bounded work
//!
//! [`mintable_in_timeframe`](InflationSchedule::mintable_in_timeframe) looks
//! at most one epoch past the recorded one. Asking about a later interval
//! fails with [`InflationError::TooFarInFuture`]: advance the schedule first
//! with [`update_mining_parameters`](InflationSchedule::update_mining_parameters).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use velock_protocol::math::secs;
use velock_protocol::{
    Address, AdminError, Amount, FixedMath, InflationParams, MathError, Ownership, Progress,
    Timestamp,
};

use crate::token::{TokenError, TokenLedger};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur in the inflation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InflationError {
    /// The current epoch has not elapsed yet.
    #[error("too soon: next epoch starts at {next_epoch}")]
    TooSoon {
        /// Start of the next epoch.
        next_epoch: Timestamp,
    },

    /// The timeframe ends beyond the schedule's lookahead.
    #[error("too far in future: timeframe ends at {end}, lookahead ends at {limit}")]
    TooFarInFuture {
        /// Requested end.
        end: Timestamp,
        /// Furthest computable end.
        limit: Timestamp,
    },

    /// `start > end`.
    #[error("invalid timeframe: start {start} is after end {end}")]
    InvalidTimeframe {
        /// Requested start.
        start: Timestamp,
        /// Requested end.
        end: Timestamp,
    },

    /// Minting would push total supply past what the curve allows by now.
    #[error("exceeds allowable mint amount: supply would be {requested}, available {available}")]
    ExceedsAllowableMint {
        /// Supply after the requested mint.
        requested: Amount,
        /// Supply allowed at this time.
        available: Amount,
    },

    /// Only the designated minter may mint.
    #[error("minter only: {caller} is not the minter")]
    NotMinter {
        /// Address that attempted to mint.
        caller: Address,
    },

    /// The minter can be set once.
    #[error("minter already set")]
    MinterAlreadySet,

    /// Zero address given as mint recipient or minter.
    #[error("zero address")]
    ZeroAddress,

    /// Deployment time minus one epoch would precede the Unix epoch.
    #[error("deployment at {now} is earlier than one inflation epoch")]
    DeploymentTooEarly {
        /// Deployment timestamp.
        now: Timestamp,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Epoch state
// ---------------------------------------------------------------------------

/// Parameters in force during one inflation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct EpochState {
    /// Epoch index; `-1` before inflation begins.
    epoch: i64,
    /// When this epoch started.
    start_time: Timestamp,
    /// Emission per second during this epoch.
    rate: Amount,
    /// Supply allowed at `start_time`.
    start_supply: Amount,
}

impl EpochState {
    /// The epoch after this one.
    fn next(&self, params: &InflationParams) -> Result<EpochState, MathError> {
        let (rate, start_supply) = if self.rate.is_zero() {
            (params.initial_rate, self.start_supply)
        } else {
            let emitted = self.rate.try_mul(secs(params.rate_reduction_time))?;
            (
                self.rate
                    .mul_div(params.rate_denominator, params.rate_reduction_coefficient)?,
                self.start_supply.try_add(emitted)?,
            )
        };
        Ok(EpochState {
            epoch: self.epoch + 1,
            start_time: self.start_time + params.rate_reduction_time,
            rate,
            start_supply,
        })
    }

    fn end(&self, params: &InflationParams) -> Timestamp {
        self.start_time + params.rate_reduction_time
    }
}

// ---------------------------------------------------------------------------
// InflationSchedule
// ---------------------------------------------------------------------------

/// The emission curve plus the minting gate that enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InflationSchedule {
    params: InflationParams,
    ownership: Ownership,
    /// The only address allowed to mint. Set once.
    minter: Option<Address>,
    /// Epoch currently recorded. May lag behind wall time until updated.
    current: EpochState,
    /// Start of epoch 0.
    inflation_start: Timestamp,
}

impl InflationSchedule {
    /// Deploys the schedule at `now`, minting the initial supply to `admin`.
    ///
    /// # Errors
    ///
    /// Returns [`InflationError::DeploymentTooEarly`] if `now + delay` is less
    /// than one epoch, and propagates token errors from the initial mint.
    pub fn new(
        params: InflationParams,
        admin: Address,
        now: Timestamp,
        token: &mut TokenLedger,
    ) -> Result<Self, InflationError> {
        let ownership = Ownership::new(admin)?;
        let inflation_start = now + params.inflation_delay;
        let start_time = inflation_start
            .checked_sub(params.rate_reduction_time)
            .ok_or(InflationError::DeploymentTooEarly { now })?;

        token.mint(admin, params.initial_supply)?;

        Ok(Self {
            current: EpochState {
                epoch: -1,
                start_time,
                rate: Amount::zero(),
                start_supply: params.initial_supply,
            },
            params,
            ownership,
            minter: None,
            inflation_start,
        })
    }

    // -- queries -------------------------------------------------------------

    pub fn params(&self) -> &InflationParams {
        &self.params
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn minter(&self) -> Option<Address> {
        self.minter
    }

    /// Emission rate of the recorded epoch.
    pub fn rate(&self) -> Amount {
        self.current.rate
    }

    /// Start of the recorded epoch.
    pub fn start_epoch_time(&self) -> Timestamp {
        self.current.start_time
    }

    /// Recorded epoch index (`-1` before inflation).
    pub fn mining_epoch(&self) -> i64 {
        self.current.epoch
    }

    /// When the first token is emitted.
    pub fn inflation_start(&self) -> Timestamp {
        self.inflation_start
    }

    /// `true` once emission has begun at `now`.
    pub fn has_started(&self, now: Timestamp) -> bool {
        now >= self.inflation_start
    }

    /// `true` when the recorded epoch has elapsed at `now`.
    pub fn epoch_due(&self, now: Timestamp) -> bool {
        now >= self.current.end(&self.params)
    }

    /// Emission rate in force during epoch `epoch`, derived from the initial
    /// rate with the same truncating recurrence the schedule itself applies.
    pub fn rate_for_epoch(&self, epoch: i64) -> Result<Amount, InflationError> {
        if epoch < 0 {
            return Ok(Amount::zero());
        }
        let mut rate = self.params.initial_rate;
        for _ in 0..epoch {
            rate = rate.mul_div(
                self.params.rate_denominator,
                self.params.rate_reduction_coefficient,
            )?;
        }
        Ok(rate)
    }

    /// Total supply the curve allows at `now`: initial supply plus
    /// everything emitted since epoch 0 started.
    pub fn available_supply(&self, now: Timestamp) -> Result<Amount, InflationError> {
        let mut state = self.current;
        while now >= state.end(&self.params) {
            state = state.next(&self.params)?;
        }
        let elapsed = now.saturating_sub(state.start_time);
        Ok(state.start_supply.try_add(state.rate.try_mul(secs(elapsed))?)?)
    }

    /// Exact number of tokens emitted over `[start, end]`.
    ///
    /// Works epoch by epoch backwards from the epoch containing `end`. `end`
    /// may lie at most one epoch past the recorded one.
    ///
    /// # Errors
    ///
    /// [`InflationError::InvalidTimeframe`] if `start > end`,
    /// [`InflationError::TooFarInFuture`] if `end` is beyond the lookahead.
    pub fn mintable_in_timeframe(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Amount, InflationError> {
        self.walk_timeframe(start, end).map(|(amount, _)| amount)
    }

    /// Integrates the rate over `[start, end]`, newest epoch first. Returns
    /// the amount and the number of epochs visited.
    fn walk_timeframe(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<(Amount, u32), InflationError> {
        if start > end {
            return Err(InflationError::InvalidTimeframe { start, end });
        }
        let span = self.params.rate_reduction_time;
        let mut epoch = self.current.epoch;
        let mut epoch_time = self.current.start_time;

        // Lookahead: at most one epoch past the recorded one.
        if end > epoch_time + span {
            epoch_time += span;
            epoch += 1;
        }
        if end > epoch_time + span {
            return Err(InflationError::TooFarInFuture {
                end,
                limit: epoch_time + span,
            });
        }

        // Walks back until the epoch holding `start`. A timeframe inside the
        // recorded and lookahead epochs touches at most two.
        let mut to_mint = Amount::zero();
        let mut visited = 0u32;
        while epoch >= 0 {
            visited += 1;
            if end >= epoch_time {
                if start >= epoch_time + span {
                    break;
                }
                let current_end = end.min(epoch_time + span);
                let current_start = start.max(epoch_time);
                let rate = self.rate_for_epoch(epoch)?;
                to_mint = to_mint.try_add(rate.try_mul(secs(current_end - current_start))?)?;
                if start >= epoch_time {
                    break;
                }
            }
            match epoch_time.checked_sub(span) {
                Some(previous) => epoch_time = previous,
                None => break,
            }
            epoch -= 1;
        }
        debug_assert!(start < self.current.start_time || visited <= 2);
        Ok((to_mint, visited))
    }

    // -- mutations -----------------------------------------------------------

    /// Moves to the next epoch.
    ///
    /// # Errors
    ///
    /// [`InflationError::TooSoon`] if the recorded epoch has not ended.
    pub fn update_mining_parameters(&mut self, now: Timestamp) -> Result<(), InflationError> {
        let next_epoch = self.current.end(&self.params);
        if now < next_epoch {
            return Err(InflationError::TooSoon { next_epoch });
        }
        self.advance_epoch()
    }

    /// Advances one epoch if due, then returns the start of the recorded epoch.
    pub fn start_epoch_time_write(&mut self, now: Timestamp) -> Result<Timestamp, InflationError> {
        if self.epoch_due(now) {
            self.advance_epoch()?;
        }
        Ok(self.current.start_time)
    }

    /// Advances one epoch if due, then returns the start of the next epoch.
    pub fn future_epoch_time_write(&mut self, now: Timestamp) -> Result<Timestamp, InflationError> {
        if self.epoch_due(now) {
            self.advance_epoch()?;
        }
        Ok(self.current.end(&self.params))
    }

    /// Advances as many elapsed epochs as `max_epochs` allows.
    pub fn catch_up(&mut self, now: Timestamp, max_epochs: u32) -> Result<Progress, InflationError> {
        let mut steps = 0u64;
        while self.epoch_due(now) {
            if steps >= u64::from(max_epochs) {
                return Ok(Progress::partial(steps));
            }
            self.advance_epoch()?;
            steps += 1;
        }
        Ok(Progress::done(steps))
    }

    /// Mints `amount` to `to`, bounded by the curve.
    ///
    /// # Errors
    ///
    /// [`InflationError::NotMinter`], [`InflationError::ZeroAddress`], or
    /// [`InflationError::ExceedsAllowableMint`] when the cumulative supply
    /// would pass [`available_supply`](Self::available_supply).
    pub fn mint(
        &mut self,
        caller: Address,
        to: Address,
        amount: Amount,
        now: Timestamp,
        token: &mut TokenLedger,
    ) -> Result<(), InflationError> {
        if self.minter != Some(caller) {
            return Err(InflationError::NotMinter { caller });
        }
        if to.is_zero() {
            return Err(InflationError::ZeroAddress);
        }
        if self.epoch_due(now) {
            self.advance_epoch()?;
        }
        let requested = token.total_supply().try_add(amount)?;
        let available = self.available_supply(now)?;
        if requested > available {
            return Err(InflationError::ExceedsAllowableMint {
                requested,
                available,
            });
        }
        token.mint(to, amount)?;
        Ok(())
    }

    /// Designates the minter. Admin only, once.
    pub fn set_minter(&mut self, caller: Address, minter: Address) -> Result<(), InflationError> {
        self.ownership.ensure_admin(caller)?;
        if self.minter.is_some() {
            return Err(InflationError::MinterAlreadySet);
        }
        if minter.is_zero() {
            return Err(InflationError::ZeroAddress);
        }
        self.minter = Some(minter);
        tracing::info!(minter = %minter, "inflation minter set");
        Ok(())
    }

    /// Hands the schedule's admin role to `admin` in one call.
    pub fn set_admin(&mut self, caller: Address, admin: Address) -> Result<(), InflationError> {
        self.ownership.commit_transfer(caller, admin)?;
        self.ownership.apply_transfer(caller)?;
        Ok(())
    }

    pub fn commit_transfer_ownership(
        &mut self,
        caller: Address,
        future: Address,
    ) -> Result<(), InflationError> {
        Ok(self.ownership.commit_transfer(caller, future)?)
    }

    pub fn apply_transfer_ownership(&mut self, caller: Address) -> Result<(), InflationError> {
        self.ownership.apply_transfer(caller)?;
        Ok(())
    }

    fn advance_epoch(&mut self) -> Result<(), InflationError> {
        self.current = self.current.next(&self.params)?;
        tracing::info!(
            epoch = self.current.epoch,
            start = self.current.start_time,
            rate = %self.current.rate,
            "mining parameters updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velock_protocol::config::{WEEK, YEAR};

    const ADMIN: Address = Address::from_low_u64(0xAD);
    const MINTER: Address = Address::from_low_u64(0x3);
    const ALICE: Address = Address::from_low_u64(0xA);
    const DEPLOY: Timestamp = 1_700_000_000;

    fn deploy() -> (InflationSchedule, TokenLedger) {
        let mut token = TokenLedger::new("VLK");
        let schedule =
            InflationSchedule::new(InflationParams::default(), ADMIN, DEPLOY, &mut token).unwrap();
        (schedule, token)
    }

    fn initial_rate() -> Amount {
        InflationParams::default().initial_rate
    }

    #[test]
    fn starts_in_epoch_minus_one_with_zero_rate() {
        let (schedule, token) = deploy();
        assert_eq!(schedule.mining_epoch(), -1);
        assert_eq!(schedule.rate(), Amount::zero());
        assert_eq!(token.total_supply(), InflationParams::default().initial_supply);
        assert!(!schedule.has_started(DEPLOY));
        assert!(schedule.has_started(schedule.inflation_start()));
    }

    #[test]
    fn update_too_soon_rejected() {
        let (mut schedule, _) = deploy();
        let err = schedule.update_mining_parameters(DEPLOY + 10).unwrap_err();
        assert_eq!(
            err,
            InflationError::TooSoon {
                next_epoch: schedule.inflation_start()
            }
        );
    }

    #[test]
    fn first_update_sets_initial_rate() {
        let (mut schedule, _) = deploy();
        schedule
            .update_mining_parameters(schedule.inflation_start())
            .unwrap();
        assert_eq!(schedule.mining_epoch(), 0);
        assert_eq!(schedule.rate(), initial_rate());
        assert_eq!(schedule.start_epoch_time(), schedule.inflation_start());
    }

    #[test]
    fn rate_decays_each_epoch() {
        let (mut schedule, _) = deploy();
        let start = schedule.inflation_start();
        schedule.update_mining_parameters(start).unwrap();
        schedule.update_mining_parameters(start + YEAR).unwrap();
        let expected = initial_rate()
            .mul_div(
                InflationParams::default().rate_denominator,
                InflationParams::default().rate_reduction_coefficient,
            )
            .unwrap();
        assert_eq!(schedule.rate(), expected);
        assert_eq!(schedule.rate_for_epoch(1).unwrap(), expected);
    }

    #[test]
    fn mintable_zero_before_inflation() {
        let (schedule, _) = deploy();
        let m = schedule
            .mintable_in_timeframe(DEPLOY, schedule.inflation_start())
            .unwrap();
        assert_eq!(m, Amount::zero());
    }

    #[test]
    fn mintable_looks_one_epoch_ahead() {
        let (schedule, _) = deploy();
        let start = schedule.inflation_start();
        let m = schedule.mintable_in_timeframe(start, start + WEEK).unwrap();
        assert_eq!(m, initial_rate() * Amount::from(WEEK));
    }

    #[test]
    fn mintable_too_far_in_future() {
        let (schedule, _) = deploy();
        let start = schedule.inflation_start();
        let err = schedule
            .mintable_in_timeframe(start, start + YEAR + 1)
            .unwrap_err();
        assert!(matches!(err, InflationError::TooFarInFuture { .. }));
    }

    #[test]
    fn mintable_rejects_inverted_timeframe() {
        let (schedule, _) = deploy();
        assert_eq!(
            schedule.mintable_in_timeframe(10, 5),
            Err(InflationError::InvalidTimeframe { start: 10, end: 5 })
        );
    }

    #[test]
    fn mintable_spans_epoch_boundary_exactly() {
        let (mut schedule, _) = deploy();
        let start = schedule.inflation_start();
        schedule.update_mining_parameters(start).unwrap();
        schedule.update_mining_parameters(start + YEAR).unwrap();

        let boundary = start + YEAR;
        let m = schedule
            .mintable_in_timeframe(boundary - 100, boundary + 50)
            .unwrap();
        let r0 = schedule.rate_for_epoch(0).unwrap();
        let r1 = schedule.rate_for_epoch(1).unwrap();
        assert_eq!(m, r0 * Amount::from(100u64) + r1 * Amount::from(50u64));
    }

    #[test]
    fn mintable_is_additive() {
        let (mut schedule, _) = deploy();
        let start = schedule.inflation_start();
        schedule.update_mining_parameters(start).unwrap();
        let a = start + 3 * WEEK + 17;
        let b = start + YEAR + 5 * WEEK;
        let c = start + YEAR + 9 * WEEK + 3;
        let whole = schedule.mintable_in_timeframe(a, c).unwrap();
        let parts = schedule.mintable_in_timeframe(a, b).unwrap()
            + schedule.mintable_in_timeframe(b, c).unwrap();
        assert_eq!(whole, parts);
    }

    #[test]
    fn available_supply_tracks_emission() {
        let (schedule, _) = deploy();
        let start = schedule.inflation_start();
        let initial = InflationParams::default().initial_supply;
        assert_eq!(schedule.available_supply(start).unwrap(), initial);
        assert_eq!(
            schedule.available_supply(start + 10).unwrap(),
            initial + initial_rate() * Amount::from(10u64)
        );
    }

    #[test]
    fn mint_gated_by_minter_and_curve() {
        let (mut schedule, mut token) = deploy();
        let start = schedule.inflation_start();

        assert!(matches!(
            schedule.mint(MINTER, ALICE, Amount::one(), start, &mut token),
            Err(InflationError::NotMinter { .. })
        ));

        schedule.set_minter(ADMIN, MINTER).unwrap();
        assert_eq!(
            schedule.set_minter(ADMIN, ALICE),
            Err(InflationError::MinterAlreadySet)
        );

        assert_eq!(
            schedule.mint(MINTER, Address::ZERO, Amount::one(), start, &mut token),
            Err(InflationError::ZeroAddress)
        );

        // Nothing emitted yet at the first second of inflation.
        assert!(matches!(
            schedule.mint(MINTER, ALICE, Amount::one(), start, &mut token),
            Err(InflationError::ExceedsAllowableMint { .. })
        ));

        let emitted = initial_rate() * Amount::from(100u64);
        schedule
            .mint(MINTER, ALICE, emitted, start + 100, &mut token)
            .unwrap();
        assert_eq!(token.balance_of(&ALICE), emitted);
        assert!(schedule
            .mint(MINTER, ALICE, Amount::one(), start + 100, &mut token)
            .is_err());
    }

    #[test]
    fn catch_up_is_bounded() {
        let (mut schedule, _) = deploy();
        let later = schedule.inflation_start() + 5 * YEAR;
        let first = schedule.catch_up(later, 2).unwrap();
        assert_eq!(first, Progress::partial(2));
        let second = schedule.catch_up(later, 10).unwrap();
        assert_eq!(second, Progress::done(4));
        assert_eq!(schedule.mining_epoch(), 5);
        assert_eq!(schedule.catch_up(later, 10).unwrap(), Progress::idle());
    }

    #[test]
    fn weekly_timeframes_touch_at_most_two_epochs() {
        let (mut schedule, _) = deploy();
        let start = schedule.inflation_start();
        schedule.catch_up(start + 3 * YEAR + 1, 10).unwrap();
        assert_eq!(schedule.mining_epoch(), 3);

        let recorded = schedule.start_epoch_time();
        for k in 0..104 {
            let week = recorded + k * WEEK;
            let (_, visited) = schedule.walk_timeframe(week, week + WEEK).unwrap();
            assert!(visited <= 2, "week {k} visited {visited} epochs");
        }

        // Older timeframes walk one epoch per year spanned.
        let (whole, visited) = schedule
            .walk_timeframe(start + YEAR - 100, start + 4 * YEAR + 50)
            .unwrap();
        assert_eq!(visited, 5);
        assert_eq!(
            whole,
            schedule.mintable_in_timeframe(start + YEAR - 100, start + 4 * YEAR + 50).unwrap()
        );
    }

    #[test]
    fn available_supply_projects_unrecorded_epochs() {
        let (mut schedule, _) = deploy();
        let t = schedule.inflation_start() + 2 * YEAR + 77;
        let projected = schedule.available_supply(t).unwrap();
        schedule.catch_up(t, 10).unwrap();
        assert_eq!(schedule.available_supply(t).unwrap(), projected);
    }
}
