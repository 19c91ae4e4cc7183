//! # Escrow Ledger
//!
//! Users lock tokens until a week-aligned unlock time and receive voting
//! power that decays linearly to zero at that time:
//!
//! ```text
//! power
//!   ^
//!   |\
//!   | \         slope = amount / MAXTIME
//!   |  \        bias  = slope * (end - now)
//!   |   \
//!   +----\------------> t
//!        end
//! ```
//!
//! Each user owns an append-only history of [`LockPoint`]s. The global
//! aggregate owns another, advanced week by week: at every week boundary the
//! slopes of the locks expiring there are subtracted (`slope_changes`).
//!
//! ## Bounded catch-up
//!
//! [`checkpoint`](VotingEscrow::checkpoint) writes at most
//! `CatchUpLimits::ledger_weeks` weekly points per call and reports whether
//! it reached `now`. User operations refuse to run while the global history
//! is further behind than that ([`EscrowError::CheckpointBehind`]).
//!
//! Read-only queries never depend on how far the history has been advanced:
//! `total_supply_at` projects the last stored point through the scheduled
//! slope changes, which is the same computation catch-up performs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use velock_protocol::checkpoint::{find_block_epoch, find_timestamp_epoch};
use velock_protocol::config::{MAXTIME, WEEK};
use velock_protocol::math::secs;
use velock_protocol::time::{next_week, week_floor, weeks_between};
use velock_protocol::{
    Address, AdminError, Amount, BlockContext, BlockHeight, FixedMath, LockPoint, MathError,
    Ownership, Progress, Timestamp,
};

use crate::token::{TokenError, TokenLedger};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during escrow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    /// Deposits must be non-zero.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The user still has tokens locked.
    #[error("withdraw old tokens first (lock ends at {end})")]
    LockExists {
        /// End of the existing lock.
        end: Timestamp,
    },

    /// The user has nothing locked.
    #[error("no existing lock found")]
    NoLock,

    /// The lock expired; it can only be withdrawn.
    #[error("lock expired at {end}, withdraw first")]
    LockExpired {
        /// End of the expired lock.
        end: Timestamp,
    },

    /// The (week-rounded) unlock time is not after now.
    #[error("can only lock until a time in the future: {unlock_time} <= {now}")]
    UnlockTimeNotFuture {
        /// Requested unlock time, rounded down to a week.
        unlock_time: Timestamp,
        /// Current time.
        now: Timestamp,
    },

    /// The unlock time is more than four years away.
    #[error("voting lock can be 4 years max: {unlock_time} > {max}")]
    LockTooLong {
        /// Requested unlock time, rounded down to a week.
        unlock_time: Timestamp,
        /// Latest allowed unlock time.
        max: Timestamp,
    },

    /// Extending a lock must push its end later.
    #[error("can only increase lock duration: {requested} <= {current}")]
    CanOnlyIncrease {
        /// Current end.
        current: Timestamp,
        /// Requested end, rounded down to a week.
        requested: Timestamp,
    },

    /// Withdrawal before the unlock time.
    #[error("the lock didn't expire (ends at {end})")]
    LockNotExpired {
        /// End of the lock.
        end: Timestamp,
    },

    /// Block queries only answer for heights already produced.
    #[error("block {height} is in the future (current {current})")]
    FutureBlock {
        /// Requested height.
        height: BlockHeight,
        /// Current height.
        current: BlockHeight,
    },

    /// The global history must be advanced with `checkpoint` first.
    #[error("global history is {weeks} weeks behind, more than {limit} per call")]
    CheckpointBehind {
        /// Weeks the history is behind.
        weeks: u64,
        /// Weeks one call may advance.
        limit: u32,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Tokens a user has locked and when they unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockedBalance {
    pub amount: Amount,
    /// Week-aligned unlock time.
    pub end: Timestamp,
}

impl LockedBalance {
    /// The user's contribution to voting power at `now`.
    fn point_at(&self, now: Timestamp) -> Result<(Amount, Amount), MathError> {
        if self.end <= now || self.amount.is_zero() {
            return Ok((Amount::zero(), Amount::zero()));
        }
        let slope = self.amount.try_div(secs(MAXTIME))?;
        let bias = slope.try_mul(secs(self.end - now))?;
        Ok((bias, slope))
    }
}

// ---------------------------------------------------------------------------
// VotingEscrow
// ---------------------------------------------------------------------------

/// Vote-escrow ledger: locks, per-user and global point histories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingEscrow {
    ownership: Ownership,
    /// Account holding locked tokens in the token ledger.
    custody: Address,
    /// Weeks of global history one call may write.
    max_weeks: u32,
    /// Total tokens locked.
    supply: Amount,
    locked: HashMap<Address, LockedBalance>,
    /// Global history. Index 0 is the deployment point; the last index is the epoch.
    point_history: Vec<LockPoint>,
    user_point_history: HashMap<Address, Vec<LockPoint>>,
    /// Slope leaving the global aggregate at each week boundary.
    slope_changes: BTreeMap<Timestamp, Amount>,
}

impl VotingEscrow {
    /// Deploys the ledger at `ctx`. Locked tokens are held by `custody`.
    pub fn new(
        admin: Address,
        custody: Address,
        ctx: BlockContext,
        max_weeks: u32,
    ) -> Result<Self, EscrowError> {
        Ok(Self {
            ownership: Ownership::new(admin)?,
            custody,
            max_weeks,
            supply: Amount::zero(),
            locked: HashMap::new(),
            point_history: vec![LockPoint::zero(ctx.timestamp, ctx.height)],
            user_point_history: HashMap::new(),
            slope_changes: BTreeMap::new(),
        })
    }

    // -- queries -------------------------------------------------------------

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn ownership_mut(&mut self) -> &mut Ownership {
        &mut self.ownership
    }

    pub fn custody(&self) -> Address {
        self.custody
    }

    /// Total tokens locked.
    pub fn supply(&self) -> Amount {
        self.supply
    }

    /// Index of the latest global point.
    pub fn epoch(&self) -> u64 {
        (self.point_history.len() - 1) as u64
    }

    pub fn point_history(&self, idx: u64) -> Option<LockPoint> {
        self.point_history.get(idx as usize).copied()
    }

    pub fn global_points(&self) -> &[LockPoint] {
        &self.point_history
    }

    pub fn last_point(&self) -> LockPoint {
        self.point_history[self.point_history.len() - 1]
    }

    /// Timestamp of the latest global point.
    pub fn last_checkpoint_time(&self) -> Timestamp {
        self.last_point().ts
    }

    /// Number of points in the user's history.
    pub fn user_point_epoch(&self, user: &Address) -> u64 {
        self.user_points(user).len() as u64
    }

    /// The user's `idx`-th point, zero-based.
    pub fn user_point_history(&self, user: &Address, idx: u64) -> Option<LockPoint> {
        self.user_points(user).get(idx as usize).copied()
    }

    pub fn user_points(&self, user: &Address) -> &[LockPoint] {
        self.user_point_history
            .get(user)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn locked(&self, user: &Address) -> LockedBalance {
        self.locked.get(user).copied().unwrap_or_default()
    }

    pub fn locked_end(&self, user: &Address) -> Timestamp {
        self.locked(user).end
    }

    /// Current decay rate of the user's voting power.
    pub fn get_last_user_slope(&self, user: &Address) -> Amount {
        self.user_points(user)
            .last()
            .map(|p| p.slope)
            .unwrap_or_default()
    }

    pub fn slope_change(&self, t: Timestamp) -> Amount {
        self.slope_changes.get(&t).copied().unwrap_or_default()
    }

    /// Week boundaries between the latest global point and `now`.
    pub fn weeks_behind(&self, now: Timestamp) -> u64 {
        weeks_between(self.last_checkpoint_time(), now)
    }

    /// Voting power of `user` at `t`.
    pub fn balance_of(&self, user: &Address, t: Timestamp) -> Amount {
        let points = self.user_points(user);
        match find_timestamp_epoch(points, t) {
            Some(idx) => points[idx].balance_at(t),
            None => Amount::zero(),
        }
    }

    /// Total voting power at `t`.
    pub fn total_supply_at(&self, t: Timestamp) -> Amount {
        match find_timestamp_epoch(&self.point_history, t) {
            Some(idx) => self.supply_at(self.point_history[idx], t),
            None => Amount::zero(),
        }
    }

    /// Voting power of `user` at block `height`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::FutureBlock`] if `height` is after `current`.
    pub fn balance_of_at_block(
        &self,
        user: &Address,
        height: BlockHeight,
        current: BlockContext,
    ) -> Result<Amount, EscrowError> {
        self.ensure_past_block(height, current)?;
        let points = self.user_points(user);
        let Some(user_idx) = find_block_epoch(points, height) else {
            return Ok(Amount::zero());
        };
        let Some(epoch) = find_block_epoch(&self.point_history, height) else {
            return Ok(Amount::zero());
        };
        let t = self.block_time(epoch, height, current);
        Ok(points[user_idx].balance_at(t))
    }

    /// Total voting power at block `height`.
    pub fn total_supply_at_block(
        &self,
        height: BlockHeight,
        current: BlockContext,
    ) -> Result<Amount, EscrowError> {
        self.ensure_past_block(height, current)?;
        let Some(epoch) = find_block_epoch(&self.point_history, height) else {
            return Ok(Amount::zero());
        };
        let t = self.block_time(epoch, height, current);
        Ok(self.supply_at(self.point_history[epoch], t))
    }

    // -- mutations -----------------------------------------------------------

    /// Advances the global history towards `ctx.timestamp`, at most
    /// `max_weeks` week boundaries per call. Once caught up, records a point
    /// at `now` unless one already exists.
    pub fn checkpoint(&mut self, ctx: BlockContext) -> Result<Progress, EscrowError> {
        let progress = self.catch_up(ctx)?;
        if progress.caught_up && self.last_checkpoint_time() < ctx.timestamp {
            let point = self.point_now(ctx)?;
            self.point_history.push(point);
        }
        tracing::debug!(
            epoch = self.epoch(),
            steps = progress.steps,
            caught_up = progress.caught_up,
            "escrow checkpoint"
        );
        Ok(progress)
    }

    /// Locks `amount` of the user's tokens until `unlock_time`, rounded down
    /// to a week.
    pub fn create_lock(
        &mut self,
        ctx: BlockContext,
        user: Address,
        amount: Amount,
        unlock_time: Timestamp,
        token: &mut TokenLedger,
    ) -> Result<(), EscrowError> {
        let now = ctx.timestamp;
        let unlock_time = week_floor(unlock_time);
        let old = self.locked(&user);

        if amount.is_zero() {
            return Err(EscrowError::ZeroAmount);
        }
        if !old.amount.is_zero() {
            return Err(EscrowError::LockExists { end: old.end });
        }
        if unlock_time <= now {
            return Err(EscrowError::UnlockTimeNotFuture { unlock_time, now });
        }
        let max = now + MAXTIME;
        if unlock_time > max {
            return Err(EscrowError::LockTooLong { unlock_time, max });
        }
        self.ensure_synced(now)?;

        self.deposit(ctx, user, user, amount, unlock_time, old, token)?;
        tracing::debug!(user = %user, amount = %amount, end = unlock_time, "lock created");
        Ok(())
    }

    /// Adds `amount` of the user's tokens to their lock without changing its end.
    pub fn increase_amount(
        &mut self,
        ctx: BlockContext,
        user: Address,
        amount: Amount,
        token: &mut TokenLedger,
    ) -> Result<(), EscrowError> {
        let old = self.ensure_active(ctx.timestamp, &user, amount)?;
        self.ensure_synced(ctx.timestamp)?;
        self.deposit(ctx, user, user, amount, 0, old, token)
    }

    /// Adds `amount` of `payer`'s tokens to `user`'s lock.
    pub fn deposit_for(
        &mut self,
        ctx: BlockContext,
        payer: Address,
        user: Address,
        amount: Amount,
        token: &mut TokenLedger,
    ) -> Result<(), EscrowError> {
        let old = self.ensure_active(ctx.timestamp, &user, amount)?;
        self.ensure_synced(ctx.timestamp)?;
        self.deposit(ctx, payer, user, amount, 0, old, token)
    }

    /// Pushes the end of the user's lock to `unlock_time`, rounded down to a week.
    pub fn increase_unlock_time(
        &mut self,
        ctx: BlockContext,
        user: Address,
        unlock_time: Timestamp,
        token: &mut TokenLedger,
    ) -> Result<(), EscrowError> {
        let now = ctx.timestamp;
        let unlock_time = week_floor(unlock_time);
        let old = self.locked(&user);

        if old.amount.is_zero() {
            return Err(EscrowError::NoLock);
        }
        if old.end <= now {
            return Err(EscrowError::LockExpired { end: old.end });
        }
        if unlock_time <= old.end {
            return Err(EscrowError::CanOnlyIncrease {
                current: old.end,
                requested: unlock_time,
            });
        }
        let max = now + MAXTIME;
        if unlock_time > max {
            return Err(EscrowError::LockTooLong { unlock_time, max });
        }
        self.ensure_synced(now)?;

        self.deposit(ctx, user, user, Amount::zero(), unlock_time, old, token)
    }

    /// Returns an expired lock's tokens to the user.
    pub fn withdraw(
        &mut self,
        ctx: BlockContext,
        user: Address,
        token: &mut TokenLedger,
    ) -> Result<Amount, EscrowError> {
        let old = self.locked(&user);
        if old.amount.is_zero() {
            return Err(EscrowError::NoLock);
        }
        if ctx.timestamp < old.end {
            return Err(EscrowError::LockNotExpired { end: old.end });
        }
        self.ensure_synced(ctx.timestamp)?;

        let supply = self.supply.try_sub(old.amount)?;
        token.transfer(self.custody, user, old.amount)?;

        self.supply = supply;
        self.locked.insert(user, LockedBalance::default());
        self.checkpoint_user(ctx, user, old, LockedBalance::default())?;
        tracing::debug!(user = %user, amount = %old.amount, "lock withdrawn");
        Ok(old.amount)
    }

    // -- internals -----------------------------------------------------------

    fn ensure_active(
        &self,
        now: Timestamp,
        user: &Address,
        amount: Amount,
    ) -> Result<LockedBalance, EscrowError> {
        let old = self.locked(user);
        if amount.is_zero() {
            return Err(EscrowError::ZeroAmount);
        }
        if old.amount.is_zero() {
            return Err(EscrowError::NoLock);
        }
        if old.end <= now {
            return Err(EscrowError::LockExpired { end: old.end });
        }
        Ok(old)
    }

    fn ensure_synced(&self, now: Timestamp) -> Result<(), EscrowError> {
        let weeks = self.weeks_behind(now);
        if weeks > u64::from(self.max_weeks) {
            return Err(EscrowError::CheckpointBehind {
                weeks,
                limit: self.max_weeks,
            });
        }
        Ok(())
    }

    fn ensure_past_block(
        &self,
        height: BlockHeight,
        current: BlockContext,
    ) -> Result<(), EscrowError> {
        if height > current.height {
            return Err(EscrowError::FutureBlock {
                height,
                current: current.height,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn deposit(
        &mut self,
        ctx: BlockContext,
        payer: Address,
        user: Address,
        amount: Amount,
        unlock_time: Timestamp,
        old: LockedBalance,
        token: &mut TokenLedger,
    ) -> Result<(), EscrowError> {
        let supply = self.supply.try_add(amount)?;
        let mut new = old;
        new.amount = new.amount.try_add(amount)?;
        if unlock_time != 0 {
            new.end = unlock_time;
        }
        if !amount.is_zero() {
            token.transfer(payer, self.custody, amount)?;
        }

        self.supply = supply;
        self.locked.insert(user, new);
        self.checkpoint_user(ctx, user, old, new)
    }

    /// Records the user's change in the global history, the slope schedule
    /// and the user's own history.
    fn checkpoint_user(
        &mut self,
        ctx: BlockContext,
        user: Address,
        old: LockedBalance,
        new: LockedBalance,
    ) -> Result<(), EscrowError> {
        let now = ctx.timestamp;
        let (old_bias, old_slope) = old.point_at(now)?;
        let (new_bias, new_slope) = new.point_at(now)?;

        let progress = self.catch_up(ctx)?;
        debug_assert!(progress.caught_up);

        let mut point = self.point_now(ctx)?;
        point.slope = point.slope.try_add(new_slope)?.floor_sub(old_slope);
        point.bias = point.bias.try_add(new_bias)?.floor_sub(old_bias);
        self.point_history.push(point);

        if old.end > now {
            let remaining = self.slope_change(old.end).floor_sub(old_slope);
            self.set_slope_change(old.end, remaining);
        }
        if new.end > now {
            let scheduled = self.slope_change(new.end).try_add(new_slope)?;
            self.set_slope_change(new.end, scheduled);
        }

        self.user_point_history
            .entry(user)
            .or_default()
            .push(LockPoint {
                bias: new_bias,
                slope: new_slope,
                ts: now,
                blk: ctx.height,
            });
        Ok(())
    }

    fn set_slope_change(&mut self, t: Timestamp, slope: Amount) {
        if slope.is_zero() {
            self.slope_changes.remove(&t);
        } else {
            self.slope_changes.insert(t, slope);
        }
    }

    /// Writes one point per week boundary in `(last.ts, now]`, up to `max_weeks`.
    fn catch_up(&mut self, ctx: BlockContext) -> Result<Progress, EscrowError> {
        let now = ctx.timestamp;
        let anchor = self.last_point();
        let mut last = anchor;
        let mut steps = 0u64;
        let mut t_i = next_week(last.ts);

        while t_i <= now {
            if steps >= u64::from(self.max_weeks) {
                tracing::warn!(
                    reached = last.ts,
                    target = now,
                    "escrow catch-up stopped at its weekly bound"
                );
                return Ok(Progress::partial(steps));
            }
            last = LockPoint {
                bias: last.balance_at(t_i),
                slope: last.slope.floor_sub(self.slope_change(t_i)),
                ts: t_i,
                blk: interpolate_block(&anchor, ctx, t_i),
            };
            self.point_history.push(last);
            steps += 1;
            t_i += WEEK;
        }
        Ok(Progress::done(steps))
    }

    /// The latest global point carried forward to `now`. No week boundary
    /// may lie between the two.
    fn point_now(&self, ctx: BlockContext) -> Result<LockPoint, EscrowError> {
        let last = self.last_point();
        Ok(LockPoint {
            bias: last.balance_at(ctx.timestamp),
            slope: last.slope,
            ts: ctx.timestamp,
            blk: ctx.height,
        })
    }

    /// Projects a global point forward to `t` through the slope schedule.
    fn supply_at(&self, point: LockPoint, t: Timestamp) -> Amount {
        let mut p = point;
        if t > p.ts {
            for (&boundary, &d_slope) in self.slope_changes.range(p.ts + 1..=t) {
                p.bias = p.balance_at(boundary);
                p.slope = p.slope.floor_sub(d_slope);
                p.ts = boundary;
            }
        }
        p.balance_at(t)
    }

    /// Estimated timestamp of block `height`, which lies at or after the
    /// global point `epoch`.
    fn block_time(&self, epoch: usize, height: BlockHeight, current: BlockContext) -> Timestamp {
        let point = self.point_history[epoch];
        let (d_block, d_t) = match self.point_history.get(epoch + 1) {
            Some(next) => (next.blk - point.blk, next.ts - point.ts),
            None => (
                current.height.saturating_sub(point.blk),
                current.timestamp.saturating_sub(point.ts),
            ),
        };
        if d_block == 0 {
            return point.ts;
        }
        let offset = u128::from(height - point.blk) * u128::from(d_t) / u128::from(d_block);
        point.ts + offset as u64
    }
}

/// Height of the block at time `t`, interpolated between `anchor` and `ctx`.
fn interpolate_block(anchor: &LockPoint, ctx: BlockContext, t: Timestamp) -> BlockHeight {
    let d_t = ctx.timestamp.saturating_sub(anchor.ts);
    if d_t == 0 {
        return anchor.blk;
    }
    let d_block = ctx.height.saturating_sub(anchor.blk);
    let offset = u128::from(d_block) * u128::from(t - anchor.ts) / u128::from(d_t);
    anchor.blk + offset as u64
}
