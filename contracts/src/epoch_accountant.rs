//! # Epoch Reward Accountant
//!
//! Turns a continuously accruing quantity (freshly minted tokens, collected
//! fees) into exact per-user claimable totals. Three cursors move forward
//! independently:
//!
//! ```text
//!   start_time                                      now
//!       |--- week ---|--- week ---|--- week ---|-----x
//!       ^            ^                         ^
//!  time_cursor_of    |                   token_time_cursor
//!    (per user)   time_cursor
//! ```
//!
//! - **Token bucketing** writes `tokens_per_week` up to `token_time_cursor`.
//! - **Supply bucketing** writes the escrow's `ve_supply` at every week
//!   boundary before `time_cursor`.
//! - **User accrual** credits a user for every week before
//!   `min(week(token_time_cursor), time_cursor)`:
//!   `tokens_per_week[w] × balance(user, w) / ve_supply[w]`.
//!
//! Each step is bounded by [`CatchUpLimits`] and resumable. A user's cursor
//! never passes a week whose bucket or supply is not final, so a week is
//! credited exactly once whatever the call cadence.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use velock_protocol::checkpoint::find_timestamp_epoch;
use velock_protocol::config::WEEK;
use velock_protocol::math::secs;
use velock_protocol::time::{week_ceil, week_floor, weeks_between};
use velock_protocol::{
    Address, Amount, CatchUpLimits, FixedMath, LockPoint, MathError, Progress, Timestamp,
};

use crate::voting_escrow::VotingEscrow;

/// Errors that can occur while bucketing or crediting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountantError {
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Weekly buckets, weekly supply snapshots and per-user credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochAccountant {
    start_time: Timestamp,
    /// Next week whose ve-supply is not recorded.
    time_cursor: Timestamp,
    /// Time up to which the source has been bucketed.
    token_time_cursor: Timestamp,
    /// Lump received but not yet attributed to a week.
    pending: Amount,
    tokens_per_week: BTreeMap<Timestamp, Amount>,
    ve_supply: BTreeMap<Timestamp, Amount>,
    time_cursor_of: HashMap<Address, Timestamp>,
    /// Index of the user's last consumed escrow point.
    user_epoch_of: HashMap<Address, u64>,
    integrate_fraction: HashMap<Address, Amount>,
    limits: CatchUpLimits,
}

impl EpochAccountant {
    /// An accountant whose first week starts at `week_floor(start_time)`.
    pub fn new(start_time: Timestamp, limits: CatchUpLimits) -> Self {
        let start_time = week_floor(start_time);
        Self {
            start_time,
            time_cursor: start_time,
            token_time_cursor: start_time,
            pending: Amount::zero(),
            tokens_per_week: BTreeMap::new(),
            ve_supply: BTreeMap::new(),
            time_cursor_of: HashMap::new(),
            user_epoch_of: HashMap::new(),
            integrate_fraction: HashMap::new(),
            limits,
        }
    }

    // -- queries -------------------------------------------------------------

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn time_cursor(&self) -> Timestamp {
        self.time_cursor
    }

    pub fn token_time_cursor(&self) -> Timestamp {
        self.token_time_cursor
    }

    /// Quantity received but not yet split into weeks.
    pub fn pending(&self) -> Amount {
        self.pending
    }

    pub fn tokens_per_week(&self, week: Timestamp) -> Amount {
        self.tokens_per_week.get(&week).copied().unwrap_or_default()
    }

    pub fn ve_supply(&self, week: Timestamp) -> Amount {
        self.ve_supply.get(&week).copied().unwrap_or_default()
    }

    /// Every written bucket, oldest first.
    pub fn buckets(&self) -> impl Iterator<Item = (Timestamp, Amount)> + '_ {
        self.tokens_per_week.iter().map(|(&w, &a)| (w, a))
    }

    pub fn time_cursor_of(&self, user: &Address) -> Timestamp {
        self.time_cursor_of.get(user).copied().unwrap_or_default()
    }

    pub fn user_epoch_of(&self, user: &Address) -> u64 {
        self.user_epoch_of.get(user).copied().unwrap_or_default()
    }

    /// Everything credited to `user` so far.
    pub fn integrate_fraction(&self, user: &Address) -> Amount {
        self.integrate_fraction
            .get(user)
            .copied()
            .unwrap_or_default()
    }

    /// The user's ve-balance at `week`.
    pub fn ve_for_at(&self, escrow: &VotingEscrow, user: &Address, week: Timestamp) -> Amount {
        escrow.balance_of(user, week)
    }

    /// Last week users can currently be credited up to (exclusive).
    pub fn claimable_until(&self) -> Timestamp {
        week_floor(self.token_time_cursor).min(self.time_cursor)
    }

    /// Weeks of supply snapshots still missing before `now`.
    pub fn supply_weeks_behind(&self, now: Timestamp) -> u64 {
        if now <= self.time_cursor {
            return 0;
        }
        weeks_between(self.time_cursor, now - 1) + 1
    }

    /// Weeks between the token cursor and `now`.
    pub fn token_weeks_behind(&self, now: Timestamp) -> u64 {
        if now <= self.token_time_cursor {
            return 0;
        }
        weeks_between(self.token_time_cursor, now)
    }

    // -- token bucketing -----------------------------------------------------

    /// Adds a lump `amount` that accrued evenly over
    /// `[token_time_cursor, now]` and splits it across the weeks of that
    /// interval pro rata to elapsed time. The last segment takes the
    /// rounding remainder. When the weekly bound stops the split early the
    /// rest stays pending for the next call.
    pub fn distribute_lump(
        &mut self,
        now: Timestamp,
        amount: Amount,
    ) -> Result<Progress, AccountantError> {
        self.pending = self.pending.try_add(amount)?;
        if now < self.start_time || now < self.token_time_cursor {
            return Ok(Progress::idle());
        }

        let mut t = self.token_time_cursor;
        let lump = self.pending;
        let since_last = now - t;
        let mut remaining = lump;
        let mut steps = 0u64;

        loop {
            if steps >= u64::from(self.limits.token_weeks) {
                self.pending = remaining;
                self.token_time_cursor = t;
                tracing::warn!(cursor = t, target = now, "token bucketing stopped at its weekly bound");
                return Ok(Progress::partial(steps));
            }
            let this_week = week_floor(t);
            let next = this_week + WEEK;
            steps += 1;
            if now <= next {
                self.credit_week(this_week, remaining)?;
                self.pending = Amount::zero();
                self.token_time_cursor = now;
                return Ok(Progress::done(steps));
            }
            let share = lump.mul_div(secs(next - t), secs(since_last))?;
            self.credit_week(this_week, share)?;
            remaining = remaining.try_sub(share)?;
            t = next;
        }
    }

    /// Recomputes the bucket of every week from the token cursor's week up to
    /// `now` as `source(week_start, min(now, week_end))`. Recomputing from
    /// the week start makes a closed week's bucket independent of how often
    /// this is called.
    pub fn accrue_with<E, F>(&mut self, now: Timestamp, mut source: F) -> Result<Progress, E>
    where
        E: From<AccountantError>,
        F: FnMut(Timestamp, Timestamp) -> Result<Amount, E>,
    {
        if now < self.start_time || now < self.token_time_cursor {
            return Ok(Progress::idle());
        }
        let mut week = week_floor(self.token_time_cursor);
        let mut steps = 0u64;
        loop {
            if steps >= u64::from(self.limits.token_weeks) {
                self.token_time_cursor = week;
                tracing::warn!(cursor = week, target = now, "reward bucketing stopped at its weekly bound");
                return Ok(Progress::partial(steps));
            }
            let week_end = week + WEEK;
            let amount = source(week, now.min(week_end))?;
            self.tokens_per_week.insert(week, amount);
            steps += 1;
            if now < week_end {
                self.token_time_cursor = now;
                return Ok(Progress::done(steps));
            }
            week = week_end;
        }
    }

    fn credit_week(&mut self, week: Timestamp, amount: Amount) -> Result<(), MathError> {
        let bucket = self.tokens_per_week(week).try_add(amount)?;
        self.tokens_per_week.insert(week, bucket);
        Ok(())
    }

    // -- supply bucketing ----------------------------------------------------

    /// Records the escrow's total supply at each week boundary before `now`.
    pub fn checkpoint_total_supply(
        &mut self,
        now: Timestamp,
        escrow: &VotingEscrow,
    ) -> Result<Progress, AccountantError> {
        let mut t = self.time_cursor;
        let mut steps = 0u64;
        while t < now {
            if steps >= u64::from(self.limits.supply_weeks) {
                self.time_cursor = t;
                tracing::warn!(cursor = t, target = now, "supply bucketing stopped at its weekly bound");
                return Ok(Progress::partial(steps));
            }
            self.ve_supply.insert(t, escrow.total_supply_at(t));
            t += WEEK;
            steps += 1;
        }
        self.time_cursor = t;
        Ok(Progress::done(steps))
    }

    // -- user accrual --------------------------------------------------------

    /// Credits `user` for every settled week not yet credited, walking their
    /// escrow history at most `user_epochs` steps.
    pub fn user_checkpoint(
        &mut self,
        user: Address,
        escrow: &VotingEscrow,
    ) -> Result<Progress, AccountantError> {
        let points = escrow.user_points(&user);
        if points.is_empty() {
            return Ok(Progress::idle());
        }
        let limit = self.claimable_until();

        let mut week_cursor = self.time_cursor_of(&user);
        let mut next = if week_cursor == 0 {
            find_timestamp_epoch(points, self.start_time).unwrap_or(0)
        } else {
            self.user_epoch_of(&user) as usize
        };
        if week_cursor == 0 {
            week_cursor = week_ceil(points[next].ts).max(self.start_time);
        }
        if week_cursor >= limit {
            return Ok(Progress::idle());
        }

        let mut upcoming = points.get(next).copied();
        let mut current = LockPoint::default();
        let mut earned = Amount::zero();
        let mut steps = 0u64;
        let mut caught_up = true;

        while week_cursor < limit {
            if steps >= u64::from(self.limits.user_epochs) {
                caught_up = false;
                break;
            }
            steps += 1;
            match upcoming {
                Some(point) if week_cursor >= point.ts => {
                    current = point;
                    next += 1;
                    upcoming = points.get(next).copied();
                }
                _ => {
                    let balance = current.balance_at(week_cursor);
                    if balance.is_zero() && upcoming.is_none() {
                        break;
                    }
                    if !balance.is_zero() {
                        let supply = self.ve_supply(week_cursor);
                        if !supply.is_zero() {
                            let share = balance.mul_div(self.tokens_per_week(week_cursor), supply)?;
                            earned = earned.try_add(share)?;
                        }
                    }
                    week_cursor += WEEK;
                }
            }
        }

        let total = self.integrate_fraction(&user).try_add(earned)?;
        self.integrate_fraction.insert(user, total);
        let last_consumed = next.saturating_sub(1).min(points.len() - 1);
        self.user_epoch_of.insert(user, last_consumed as u64);
        self.time_cursor_of.insert(user, week_cursor);

        tracing::debug!(
            user = %user,
            week_cursor,
            earned = %earned,
            caught_up,
            "user checkpoint"
        );
        Ok(Progress { steps, caught_up })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenLedger;
    use velock_protocol::config::MAXTIME;
    use velock_protocol::BlockContext;

    const ADMIN: Address = Address::from_low_u64(0xAD);
    const ALICE: Address = Address::from_low_u64(0xA);
    const BOB: Address = Address::from_low_u64(0xB);
    const T0: Timestamp = 2_810 * WEEK;

    fn e18(n: u64) -> Amount {
        Amount::from(n) * Amount::exp10(18)
    }

    fn escrow() -> (VotingEscrow, TokenLedger) {
        let ctx = BlockContext::new(T0, 1);
        let mut token = TokenLedger::new("VLK");
        token.mint(ALICE, e18(100)).unwrap();
        token.mint(BOB, e18(100)).unwrap();
        let ve = VotingEscrow::new(ADMIN, Address::from_low_u64(0xE5), ctx, 255).unwrap();
        (ve, token)
    }

    fn limits(token_weeks: u32, user_epochs: u32) -> CatchUpLimits {
        CatchUpLimits {
            token_weeks,
            user_epochs,
            ..CatchUpLimits::default()
        }
    }

    #[test]
    fn lump_split_pro_rata_with_exact_remainder() {
        let mut acc = EpochAccountant::new(T0, CatchUpLimits::default());
        let now = T0 + WEEK + WEEK / 2;
        let progress = acc.distribute_lump(now, Amount::from(1_000u64)).unwrap();
        assert!(progress.caught_up);
        assert_eq!(acc.tokens_per_week(T0), Amount::from(666u64));
        assert_eq!(acc.tokens_per_week(T0 + WEEK), Amount::from(334u64));
        assert_eq!(acc.token_time_cursor(), now);
        assert_eq!(acc.pending(), Amount::zero());
    }

    #[test]
    fn lump_at_cursor_lands_in_current_week() {
        let mut acc = EpochAccountant::new(T0 + 3, CatchUpLimits::default());
        acc.distribute_lump(T0, Amount::from(10u64)).unwrap();
        assert_eq!(acc.tokens_per_week(T0), Amount::from(10u64));
    }

    #[test]
    fn bounded_lump_keeps_remainder_pending() {
        let mut acc = EpochAccountant::new(T0, limits(2, 50));
        let now = T0 + 5 * WEEK;
        let first = acc.distribute_lump(now, Amount::from(500u64)).unwrap();
        assert_eq!(first, Progress::partial(2));
        assert_eq!(acc.pending(), Amount::from(300u64));
        assert_eq!(acc.token_time_cursor(), T0 + 2 * WEEK);

        while !acc.distribute_lump(now, Amount::zero()).unwrap().caught_up {}
        let total: Amount = acc.buckets().fold(Amount::zero(), |s, (_, a)| s + a);
        assert_eq!(total, Amount::from(500u64));
        for w in 0..5 {
            assert_eq!(acc.tokens_per_week(T0 + w * WEEK), Amount::from(100u64));
        }
    }

    #[test]
    fn accrue_recomputes_open_week() {
        let mut acc = EpochAccountant::new(T0, CatchUpLimits::default());
        let rate = |start: Timestamp, end: Timestamp| -> Result<Amount, AccountantError> {
            Ok(Amount::from(end - start))
        };
        acc.accrue_with(T0 + 100, rate).unwrap();
        assert_eq!(acc.tokens_per_week(T0), Amount::from(100u64));
        acc.accrue_with(T0 + WEEK + 7, rate).unwrap();
        assert_eq!(acc.tokens_per_week(T0), Amount::from(WEEK));
        assert_eq!(acc.tokens_per_week(T0 + WEEK), Amount::from(7u64));
        assert_eq!(acc.token_time_cursor(), T0 + WEEK + 7);
    }

    #[test]
    fn no_op_before_start() {
        let mut acc = EpochAccountant::new(T0 + WEEK, CatchUpLimits::default());
        let progress = acc
            .accrue_with(T0, |_, _| -> Result<Amount, AccountantError> {
                Ok(Amount::one())
            })
            .unwrap();
        assert_eq!(progress, Progress::idle());
        assert_eq!(acc.token_time_cursor(), T0 + WEEK);
    }

    #[test]
    fn supply_recorded_strictly_before_now() {
        let (mut ve, mut token) = escrow();
        let ctx = BlockContext::new(T0, 1);
        ve.create_lock(ctx, ALICE, e18(4), T0 + MAXTIME, &mut token)
            .unwrap();
        let mut acc = EpochAccountant::new(T0, CatchUpLimits::default());

        acc.checkpoint_total_supply(T0 + 2 * WEEK, &ve).unwrap();
        assert_eq!(acc.time_cursor(), T0 + 2 * WEEK);
        assert_eq!(acc.ve_supply(T0), ve.total_supply_at(T0));
        assert_eq!(acc.ve_supply(T0 + WEEK), ve.total_supply_at(T0 + WEEK));

        acc.checkpoint_total_supply(T0 + 2 * WEEK + 1, &ve).unwrap();
        assert_eq!(acc.time_cursor(), T0 + 3 * WEEK);
        assert_eq!(
            acc.checkpoint_total_supply(T0 + 2 * WEEK + 1, &ve).unwrap(),
            Progress::idle()
        );
    }

    #[test]
    fn sole_locker_receives_every_bucket() {
        let (mut ve, mut token) = escrow();
        let ctx = BlockContext::new(T0, 1);
        ve.create_lock(ctx, ALICE, e18(4), T0 + MAXTIME, &mut token)
            .unwrap();
        let mut acc = EpochAccountant::new(T0, CatchUpLimits::default());

        let now = T0 + 3 * WEEK + 1;
        acc.distribute_lump(now, e18(31)).unwrap();
        acc.checkpoint_total_supply(now, &ve).unwrap();
        let progress = acc.user_checkpoint(ALICE, &ve).unwrap();
        assert!(progress.caught_up);

        let expected = (0..3).fold(Amount::zero(), |s, w| s + acc.tokens_per_week(T0 + w * WEEK));
        assert_eq!(acc.integrate_fraction(&ALICE), expected);
        assert_eq!(acc.time_cursor_of(&ALICE), T0 + 3 * WEEK);
        assert_eq!(acc.user_epoch_of(&ALICE), 0);

        // Nothing new to credit.
        assert_eq!(acc.user_checkpoint(ALICE, &ve).unwrap(), Progress::idle());
        assert_eq!(acc.integrate_fraction(&ALICE), expected);
        assert_eq!(acc.user_checkpoint(BOB, &ve).unwrap(), Progress::idle());
    }

    #[test]
    fn bounded_user_walk_resumes_to_same_total() {
        let (mut ve, mut token) = escrow();
        let ctx = BlockContext::new(T0, 1);
        ve.create_lock(ctx, ALICE, e18(4), T0 + MAXTIME, &mut token)
            .unwrap();
        ve.create_lock(ctx, BOB, e18(1), T0 + 20 * WEEK, &mut token)
            .unwrap();
        let mut step = ctx;
        for _ in 0..4 {
            step = step.advance(WEEK + 11, 5);
            ve.increase_amount(step, ALICE, e18(1), &mut token).unwrap();
        }

        let now = T0 + 30 * WEEK + 5;
        let build = |user_epochs| {
            let mut acc = EpochAccountant::new(T0, limits(20, user_epochs));
            let mut progress = acc.distribute_lump(now, e18(1_000)).unwrap();
            while !progress.caught_up {
                progress = acc.distribute_lump(now, Amount::zero()).unwrap();
            }
            acc.checkpoint_total_supply(now, &ve).unwrap();
            acc.checkpoint_total_supply(now, &ve).unwrap();
            acc
        };

        let mut whole = build(50);
        whole.user_checkpoint(ALICE, &ve).unwrap();

        let mut chunked = build(3);
        let mut calls = 0;
        while !chunked.user_checkpoint(ALICE, &ve).unwrap().caught_up {
            calls += 1;
        }
        assert!(calls > 5);
        assert_eq!(
            chunked.integrate_fraction(&ALICE),
            whole.integrate_fraction(&ALICE)
        );
        assert_eq!(chunked.time_cursor_of(&ALICE), whole.time_cursor_of(&ALICE));
    }

    #[test]
    fn credit_sums_to_buckets_within_truncation() {
        let (mut ve, mut token) = escrow();
        let ctx = BlockContext::new(T0 + 1_000, 1);
        ve.create_lock(ctx, ALICE, e18(4), T0 + MAXTIME, &mut token)
            .unwrap();
        ve.create_lock(ctx, BOB, e18(5), T0 + 104 * WEEK, &mut token)
            .unwrap();
        let mut acc = EpochAccountant::new(T0, CatchUpLimits::default());

        let now = T0 + 10 * WEEK;
        acc.distribute_lump(now, e18(777)).unwrap();
        acc.checkpoint_total_supply(now, &ve).unwrap();
        acc.user_checkpoint(ALICE, &ve).unwrap();
        acc.user_checkpoint(BOB, &ve).unwrap();

        // The first week has no supply at its start, so nobody earns it.
        let settled: Amount = (1..10).fold(Amount::zero(), |s, w| s + acc.tokens_per_week(T0 + w * WEEK));
        let credited = acc.integrate_fraction(&ALICE) + acc.integrate_fraction(&BOB);
        assert!(credited <= settled);
        assert!(settled - credited <= Amount::from(2u64 * 9));
    }
}
