//! # Weight Controller
//!
//! Decides how emission is split between reward channels ("gauges").
//!
//! Every channel belongs to one type. Each type carries a weight of its own,
//! and the controller tracks per week:
//!
//! - the weight of each channel (admin-set, plus decaying user votes),
//! - the sum of channel weights per type,
//! - the weight of each type,
//! - the total `Σ_type typeWeight × typeSum`.
//!
//! ```text
//! relative(channel, t) = 1e18 × typeWeight(type, t) × weight(channel, t) / total(t)
//! ```
//!
//! All changes take effect at the next week boundary. Until then the
//! channel's relative weight is unchanged (zero for a channel added this
//! week).
//!
//! Each history is advanced one week at a time, at most
//! `CatchUpLimits::weight_weeks` weeks per call. Reads past the last written
//! week project the stored history forward through the scheduled slope
//! changes, without writing anything.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use velock_protocol::config::{MAX_VOTE_POWER_BPS, MULTIPLIER, WEEK, WEIGHT_VOTE_DELAY};
use velock_protocol::math::secs;
use velock_protocol::time::{next_week, week_floor};
use velock_protocol::{
    Address, AdminError, Amount, FixedMath, MathError, Ownership, Progress, Timestamp,
};

use crate::voting_escrow::VotingEscrow;

/// Index of a channel type.
pub type TypeId = u32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur in the weight controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeightError {
    /// No type with this id.
    #[error("unknown gauge type {type_id}")]
    UnknownType {
        /// Requested type.
        type_id: TypeId,
    },

    /// Each channel can be added once.
    #[error("cannot add the same gauge twice: {channel}")]
    GaugeExists {
        /// Channel address.
        channel: Address,
    },

    /// The channel was never added.
    #[error("gauge not added: {channel}")]
    GaugeNotAdded {
        /// Channel address.
        channel: Address,
    },

    /// The voter's lock ends before the vote would take effect.
    #[error("your token lock expires too soon: {lock_end} <= {next_time}")]
    LockExpiresTooSoon {
        /// End of the voter's lock.
        lock_end: Timestamp,
        /// When the vote would take effect.
        next_time: Timestamp,
    },

    /// One vote may use at most 10 000 bps.
    #[error("you used all your voting power: {power} bps")]
    PowerTooHigh {
        /// Requested power.
        power: u32,
    },

    /// The voter's votes together may use at most 10 000 bps.
    #[error("used too much power: {used} bps")]
    TooMuchPowerUsed {
        /// Total power after the vote.
        used: u32,
    },

    /// The same channel was voted on less than `WEIGHT_VOTE_DELAY` ago.
    #[error("cannot vote so often: next vote at {next_vote}")]
    VoteTooSoon {
        /// Earliest time of the next vote.
        next_vote: Timestamp,
    },

    /// Weight histories must be advanced with `checkpoint` first.
    #[error("weight history is {weeks} weeks behind, more than {limit} per call")]
    CheckpointBehind {
        /// Weeks behind.
        weeks: u64,
        /// Weeks one call may advance.
        limit: u32,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Weight histories
// ---------------------------------------------------------------------------

/// Weight of a channel or type sum at one week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeightPoint {
    pub bias: Amount,
    /// Decay per second.
    pub slope: Amount,
}

/// A user's vote on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VotedSlope {
    pub slope: Amount,
    /// Basis points of the user's voting power.
    pub power: u32,
    /// When the vote expires (the user's lock end).
    pub end: Timestamp,
}

/// Weekly points plus the slope leaving at each future week.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WeightHistory {
    points: BTreeMap<Timestamp, WeightPoint>,
    changes: BTreeMap<Timestamp, Amount>,
    /// Latest week with a written point; zero until the first write.
    cursor: Timestamp,
}

/// `pt` moved `dt` seconds forward, then `d_slope` removed. A weight that
/// would reach zero is zeroed together with its slope.
fn decay(pt: WeightPoint, dt: Timestamp, d_slope: Amount) -> Result<WeightPoint, MathError> {
    let d_bias = pt.slope.try_mul(secs(dt))?;
    if pt.bias > d_bias {
        Ok(WeightPoint {
            bias: pt.bias - d_bias,
            slope: pt.slope.floor_sub(d_slope),
        })
    } else {
        Ok(WeightPoint::default())
    }
}

impl WeightHistory {
    fn point(&self, t: Timestamp) -> WeightPoint {
        self.points.get(&t).copied().unwrap_or_default()
    }

    fn current(&self) -> WeightPoint {
        self.point(self.cursor)
    }

    fn change(&self, t: Timestamp) -> Amount {
        self.changes.get(&t).copied().unwrap_or_default()
    }

    fn set(&mut self, t: Timestamp, point: WeightPoint) {
        self.points.insert(t, point);
        self.cursor = t;
    }

    fn init_cursor(&mut self, t: Timestamp) {
        if self.cursor == 0 {
            self.cursor = t;
        }
    }

    fn schedule_change(&mut self, t: Timestamp, slope: Amount) -> Result<(), MathError> {
        let total = self.change(t).try_add(slope)?;
        self.changes.insert(t, total);
        Ok(())
    }

    fn cancel_change(&mut self, t: Timestamp, slope: Amount) {
        let remaining = self.change(t).floor_sub(slope);
        if remaining.is_zero() {
            self.changes.remove(&t);
        } else {
            self.changes.insert(t, remaining);
        }
    }

    /// Weeks `advance` still has to write to pass `now`.
    fn pending_weeks(&self, now: Timestamp) -> u64 {
        if self.cursor == 0 || self.cursor > now {
            0
        } else {
            (now - self.cursor) / WEEK + 1
        }
    }

    /// Writes weekly points until the cursor is past `now`, at most
    /// `max_weeks` of them.
    fn advance(&mut self, now: Timestamp, max_weeks: u32) -> Result<Progress, MathError> {
        if self.cursor == 0 {
            return Ok(Progress::idle());
        }
        let mut t = self.cursor;
        let mut pt = self.point(t);
        let mut steps = 0u64;
        while t <= now {
            if steps >= u64::from(max_weeks) {
                self.cursor = t;
                return Ok(Progress::partial(steps));
            }
            t += WEEK;
            pt = decay(pt, WEEK, self.change(t))?;
            self.points.insert(t, pt);
            steps += 1;
        }
        self.cursor = t;
        Ok(Progress::done(steps))
    }

    /// Point at week `t`, projected through scheduled changes when `t` is
    /// past the cursor.
    fn at(&self, t: Timestamp) -> Result<WeightPoint, MathError> {
        if self.cursor == 0 || t <= self.cursor {
            return Ok(self.point(t));
        }
        let mut pt = self.current();
        let mut from = self.cursor;
        for (&boundary, &d_slope) in self.changes.range(from + 1..=t) {
            pt = decay(pt, boundary - from, d_slope)?;
            from = boundary;
        }
        decay(pt, t - from, Amount::zero())
    }
}

// ---------------------------------------------------------------------------
// GaugeController
// ---------------------------------------------------------------------------

/// Channel registry and weekly weight accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaugeController {
    ownership: Ownership,
    max_weeks: u32,
    type_names: Vec<String>,
    type_weights: Vec<WeightHistory>,
    type_sums: Vec<WeightHistory>,
    /// Channels in registration order.
    gauges: Vec<Address>,
    gauge_types: HashMap<Address, TypeId>,
    gauge_weights: HashMap<Address, WeightHistory>,
    totals: BTreeMap<Timestamp, Amount>,
    time_total: Timestamp,
    vote_user_slopes: HashMap<Address, HashMap<Address, VotedSlope>>,
    vote_user_power: HashMap<Address, u32>,
    last_user_vote: HashMap<Address, HashMap<Address, Timestamp>>,
}

impl GaugeController {
    pub fn new(admin: Address, max_weeks: u32) -> Result<Self, WeightError> {
        Ok(Self {
            ownership: Ownership::new(admin)?,
            max_weeks,
            type_names: Vec::new(),
            type_weights: Vec::new(),
            type_sums: Vec::new(),
            gauges: Vec::new(),
            gauge_types: HashMap::new(),
            gauge_weights: HashMap::new(),
            totals: BTreeMap::new(),
            time_total: 0,
            vote_user_slopes: HashMap::new(),
            vote_user_power: HashMap::new(),
            last_user_vote: HashMap::new(),
        })
    }

    // -- registry queries ----------------------------------------------------

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn ownership_mut(&mut self) -> &mut Ownership {
        &mut self.ownership
    }

    pub fn n_gauge_types(&self) -> u32 {
        self.type_names.len() as u32
    }

    pub fn n_gauges(&self) -> u32 {
        self.gauges.len() as u32
    }

    pub fn gauges(&self) -> &[Address] {
        &self.gauges
    }

    /// Type of `channel`, `None` if it was never added.
    pub fn gauge_types(&self, channel: &Address) -> Option<TypeId> {
        self.gauge_types.get(channel).copied()
    }

    pub fn gauge_type_names(&self, type_id: TypeId) -> Option<&str> {
        self.type_names.get(type_id as usize).map(String::as_str)
    }

    pub fn is_gauge(&self, channel: &Address) -> bool {
        self.gauge_types.contains_key(channel)
    }

    // -- weight queries ------------------------------------------------------

    /// Channel weight at the latest written week.
    pub fn get_gauge_weight(&self, channel: &Address) -> Amount {
        self.gauge_weights
            .get(channel)
            .map(|h| h.current().bias)
            .unwrap_or_default()
    }

    /// Type weight at the latest written week.
    pub fn get_type_weight(&self, type_id: TypeId) -> Amount {
        self.type_weights
            .get(type_id as usize)
            .map(|h| h.current().bias)
            .unwrap_or_default()
    }

    /// Sum of channel weights in a type, at the latest written week.
    pub fn get_weights_sum_per_type(&self, type_id: TypeId) -> Amount {
        self.type_sums
            .get(type_id as usize)
            .map(|h| h.current().bias)
            .unwrap_or_default()
    }

    /// Total weight at the latest written week.
    pub fn get_total_weight(&self) -> Amount {
        self.totals
            .get(&self.time_total)
            .copied()
            .unwrap_or_default()
    }

    pub fn gauge_weight_at(&self, channel: &Address, t: Timestamp) -> Result<Amount, WeightError> {
        match self.gauge_weights.get(channel) {
            Some(history) => Ok(history.at(week_floor(t))?.bias),
            None => Ok(Amount::zero()),
        }
    }

    pub fn type_weight_at(&self, type_id: TypeId, t: Timestamp) -> Result<Amount, WeightError> {
        match self.type_weights.get(type_id as usize) {
            Some(history) => Ok(history.at(week_floor(t))?.bias),
            None => Ok(Amount::zero()),
        }
    }

    /// Total weight during the week containing `t`.
    pub fn total_weight_at(&self, t: Timestamp) -> Result<Amount, WeightError> {
        let t = week_floor(t);
        if t <= self.time_total {
            return Ok(self.totals.get(&t).copied().unwrap_or_default());
        }
        Ok(self.compute_total(t)?)
    }

    /// Share of emission going to `channel` during the week containing `t`,
    /// scaled by `1e18`. Zero for an unknown channel or a zero total.
    pub fn gauge_relative_weight(
        &self,
        channel: &Address,
        t: Timestamp,
    ) -> Result<Amount, WeightError> {
        let Some(type_id) = self.gauge_types(channel) else {
            return Ok(Amount::zero());
        };
        let total = self.total_weight_at(t)?;
        if total.is_zero() {
            return Ok(Amount::zero());
        }
        let type_weight = self.type_weight_at(type_id, t)?;
        let gauge_weight = self.gauge_weight_at(channel, t)?;
        Ok(MULTIPLIER
            .try_mul(type_weight)?
            .mul_div(gauge_weight, total)?)
    }

    pub fn vote_user_power(&self, user: &Address) -> u32 {
        self.vote_user_power.get(user).copied().unwrap_or_default()
    }

    pub fn vote_user_slopes(&self, user: &Address, channel: &Address) -> VotedSlope {
        self.vote_user_slopes
            .get(user)
            .and_then(|votes| votes.get(channel))
            .copied()
            .unwrap_or_default()
    }

    pub fn last_user_vote(&self, user: &Address, channel: &Address) -> Timestamp {
        self.last_user_vote
            .get(user)
            .and_then(|votes| votes.get(channel))
            .copied()
            .unwrap_or_default()
    }

    /// Largest number of weeks any history still has to write to pass `now`.
    pub fn weeks_behind(&self, now: Timestamp) -> u64 {
        let total = if self.time_total == 0 || self.time_total > now {
            0
        } else {
            (now - self.time_total) / WEEK + 1
        };
        self.type_weights
            .iter()
            .chain(self.type_sums.iter())
            .chain(self.gauge_weights.values())
            .map(|h| h.pending_weeks(now))
            .fold(total, u64::max)
    }

    // -- checkpoints ---------------------------------------------------------

    /// Advances type weights, type sums and the total past `now`.
    pub fn checkpoint(&mut self, now: Timestamp) -> Result<Progress, WeightError> {
        let mut progress = Progress::idle();
        for history in self.type_weights.iter_mut().chain(self.type_sums.iter_mut()) {
            progress = progress.and(history.advance(now, self.max_weeks)?);
        }
        progress = progress.and(self.advance_total(now)?);
        if !progress.caught_up {
            tracing::warn!(now, "weight checkpoint stopped at its weekly bound");
        }
        Ok(progress)
    }

    /// [`checkpoint`](Self::checkpoint) plus the channel's own history.
    pub fn checkpoint_gauge(
        &mut self,
        channel: &Address,
        now: Timestamp,
    ) -> Result<Progress, WeightError> {
        let own = self.advance_gauge(channel, now)?;
        Ok(own.and(self.checkpoint(now)?))
    }

    /// Advances every history once: the shared type and total histories,
    /// then each channel's own. No history moves more than `max_weeks`.
    pub fn checkpoint_all(&mut self, now: Timestamp) -> Result<Progress, WeightError> {
        let max_weeks = self.max_weeks;
        let mut progress = self.checkpoint(now)?;
        for history in self.gauge_weights.values_mut() {
            progress = progress.and(history.advance(now, max_weeks)?);
        }
        Ok(progress)
    }

    fn advance_gauge(&mut self, channel: &Address, now: Timestamp) -> Result<Progress, WeightError> {
        let max_weeks = self.max_weeks;
        match self.gauge_weights.get_mut(channel) {
            Some(history) => Ok(history.advance(now, max_weeks)?),
            None => Err(WeightError::GaugeNotAdded { channel: *channel }),
        }
    }

    // -- admin ---------------------------------------------------------------

    /// Registers a channel type. Returns its id.
    pub fn add_type(
        &mut self,
        caller: Address,
        name: impl Into<String>,
        weight: Amount,
        now: Timestamp,
    ) -> Result<TypeId, WeightError> {
        self.ownership.ensure_admin(caller)?;
        self.ensure_synced(now, None)?;
        let name = name.into();

        let type_id = self.n_gauge_types();
        self.type_names.push(name.clone());
        self.type_weights.push(WeightHistory::default());
        self.type_sums.push(WeightHistory::default());
        if !weight.is_zero() {
            self.set_type_weight(type_id, weight, now)?;
        }
        tracing::info!(type_id, name = %name, weight = %weight, "gauge type added");
        Ok(type_id)
    }

    /// Registers `channel` under `type_id` with an initial weight.
    pub fn add_gauge(
        &mut self,
        caller: Address,
        channel: Address,
        type_id: TypeId,
        weight: Amount,
        now: Timestamp,
    ) -> Result<(), WeightError> {
        self.ownership.ensure_admin(caller)?;
        if type_id >= self.n_gauge_types() {
            return Err(WeightError::UnknownType { type_id });
        }
        if self.is_gauge(&channel) {
            return Err(WeightError::GaugeExists { channel });
        }
        self.ensure_synced(now, None)?;
        self.checkpoint(now)?;

        let next_time = next_week(now);
        let mut history = WeightHistory::default();
        if !weight.is_zero() {
            let sums = &mut self.type_sums[type_id as usize];
            let mut sum = sums.point(next_time);
            sum.bias = sum.bias.try_add(weight)?;
            sums.set(next_time, sum);
            history.set(
                next_time,
                WeightPoint {
                    bias: weight,
                    slope: Amount::zero(),
                },
            );
        }
        self.type_sums[type_id as usize].init_cursor(next_time);
        history.init_cursor(next_time);

        self.gauges.push(channel);
        self.gauge_types.insert(channel, type_id);
        self.gauge_weights.insert(channel, history);
        self.refresh_total(next_time)?;
        tracing::info!(channel = %channel, type_id, weight = %weight, "gauge added");
        Ok(())
    }

    /// Sets the weight of a type from next week on.
    pub fn change_type_weight(
        &mut self,
        caller: Address,
        type_id: TypeId,
        weight: Amount,
        now: Timestamp,
    ) -> Result<(), WeightError> {
        self.ownership.ensure_admin(caller)?;
        if type_id >= self.n_gauge_types() {
            return Err(WeightError::UnknownType { type_id });
        }
        self.ensure_synced(now, None)?;
        self.set_type_weight(type_id, weight, now)?;
        tracing::info!(type_id, weight = %weight, "type weight changed");
        Ok(())
    }

    /// Sets the admin weight of a channel from next week on. Vote slopes
    /// on the channel keep decaying from the new value.
    pub fn change_gauge_weight(
        &mut self,
        caller: Address,
        channel: Address,
        weight: Amount,
        now: Timestamp,
    ) -> Result<(), WeightError> {
        self.ownership.ensure_admin(caller)?;
        let type_id = self
            .gauge_types(&channel)
            .ok_or(WeightError::GaugeNotAdded { channel })?;
        self.ensure_synced(now, Some(&channel))?;
        self.checkpoint_gauge(&channel, now)?;

        let next_time = next_week(now);
        let gauge = self
            .gauge_weights
            .get_mut(&channel)
            .ok_or(WeightError::GaugeNotAdded { channel })?;
        let mut point = gauge.point(next_time);
        let old_weight = point.bias;
        point.bias = weight;
        gauge.set(next_time, point);

        let sums = &mut self.type_sums[type_id as usize];
        let mut sum = sums.point(next_time);
        sum.bias = sum.bias.try_add(weight)?.floor_sub(old_weight);
        sums.set(next_time, sum);

        self.refresh_total(next_time)?;
        tracing::info!(channel = %channel, weight = %weight, "gauge weight changed");
        Ok(())
    }

    // -- voting --------------------------------------------------------------

    /// Directs `power_bps` of the user's voting power at `channel`. A second
    /// vote on the same channel replaces the first.
    pub fn vote_for_gauge_weights(
        &mut self,
        user: Address,
        channel: Address,
        power_bps: u32,
        now: Timestamp,
        escrow: &VotingEscrow,
    ) -> Result<(), WeightError> {
        let slope = escrow.get_last_user_slope(&user);
        let lock_end = escrow.locked_end(&user);
        let next_time = next_week(now);

        if lock_end <= next_time {
            return Err(WeightError::LockExpiresTooSoon {
                lock_end,
                next_time,
            });
        }
        if power_bps > MAX_VOTE_POWER_BPS {
            return Err(WeightError::PowerTooHigh { power: power_bps });
        }
        let last_vote = self.last_user_vote(&user, &channel);
        if last_vote != 0 && now < last_vote + WEIGHT_VOTE_DELAY {
            return Err(WeightError::VoteTooSoon {
                next_vote: last_vote + WEIGHT_VOTE_DELAY,
            });
        }
        let type_id = self
            .gauge_types(&channel)
            .ok_or(WeightError::GaugeNotAdded { channel })?;

        let old = self.vote_user_slopes(&user, &channel);
        let old_bias = if old.end > next_time {
            old.slope.try_mul(secs(old.end - next_time))?
        } else {
            Amount::zero()
        };
        let new = VotedSlope {
            slope: slope.mul_div(Amount::from(power_bps), Amount::from(MAX_VOTE_POWER_BPS))?,
            power: power_bps,
            end: lock_end,
        };
        let new_bias = new.slope.try_mul(secs(lock_end - next_time))?;

        let power_used = (self.vote_user_power(&user) + new.power)
            .checked_sub(old.power)
            .unwrap_or_default();
        if power_used > MAX_VOTE_POWER_BPS {
            return Err(WeightError::TooMuchPowerUsed { used: power_used });
        }

        self.ensure_synced(now, Some(&channel))?;
        self.checkpoint_gauge(&channel, now)?;

        let gauge = self
            .gauge_weights
            .get_mut(&channel)
            .ok_or(WeightError::GaugeNotAdded { channel })?;
        apply_vote(gauge, next_time, now, &old, old_bias, &new, new_bias)?;
        apply_vote(
            &mut self.type_sums[type_id as usize],
            next_time,
            now,
            &old,
            old_bias,
            &new,
            new_bias,
        )?;
        self.refresh_total(next_time)?;

        self.vote_user_power.insert(user, power_used);
        self.vote_user_slopes
            .entry(user)
            .or_default()
            .insert(channel, new);
        self.last_user_vote
            .entry(user)
            .or_default()
            .insert(channel, now);
        tracing::debug!(user = %user, channel = %channel, power_bps, "gauge vote recorded");
        Ok(())
    }

    // -- internals -----------------------------------------------------------

    fn ensure_synced(&self, now: Timestamp, channel: Option<&Address>) -> Result<(), WeightError> {
        let mut weeks = if self.time_total == 0 || self.time_total > now {
            0
        } else {
            (now - self.time_total) / WEEK + 1
        };
        for history in self.type_weights.iter().chain(self.type_sums.iter()) {
            weeks = weeks.max(history.pending_weeks(now));
        }
        if let Some(history) = channel.and_then(|c| self.gauge_weights.get(c)) {
            weeks = weeks.max(history.pending_weeks(now));
        }
        if weeks > u64::from(self.max_weeks) {
            return Err(WeightError::CheckpointBehind {
                weeks,
                limit: self.max_weeks,
            });
        }
        Ok(())
    }

    fn set_type_weight(
        &mut self,
        type_id: TypeId,
        weight: Amount,
        now: Timestamp,
    ) -> Result<(), WeightError> {
        self.checkpoint(now)?;
        let next_time = next_week(now);
        self.type_weights[type_id as usize].set(
            next_time,
            WeightPoint {
                bias: weight,
                slope: Amount::zero(),
            },
        );
        self.refresh_total(next_time)
    }

    /// `Σ_type typeWeight(t) × typeSum(t)`.
    fn compute_total(&self, t: Timestamp) -> Result<Amount, MathError> {
        let mut total = Amount::zero();
        for (weights, sums) in self.type_weights.iter().zip(&self.type_sums) {
            let product = sums.at(t)?.bias.try_mul(weights.at(t)?.bias)?;
            total = total.try_add(product)?;
        }
        Ok(total)
    }

    fn refresh_total(&mut self, t: Timestamp) -> Result<(), WeightError> {
        let total = self.compute_total(t)?;
        self.totals.insert(t, total);
        self.time_total = t;
        Ok(())
    }

    fn advance_total(&mut self, now: Timestamp) -> Result<Progress, WeightError> {
        if self.time_total == 0 {
            return Ok(Progress::idle());
        }
        let mut t = self.time_total;
        let mut steps = 0u64;
        while t <= now {
            if steps >= u64::from(self.max_weeks) {
                self.time_total = t;
                return Ok(Progress::partial(steps));
            }
            t += WEEK;
            let total = self.compute_total(t)?;
            self.totals.insert(t, total);
            steps += 1;
        }
        self.time_total = t;
        Ok(Progress::done(steps))
    }
}

/// Swaps a user's old vote for the new one in a history's next-week point
/// and its slope schedule.
fn apply_vote(
    history: &mut WeightHistory,
    next_time: Timestamp,
    now: Timestamp,
    old: &VotedSlope,
    old_bias: Amount,
    new: &VotedSlope,
    new_bias: Amount,
) -> Result<(), MathError> {
    let mut point = history.point(next_time);
    point.bias = point.bias.try_add(new_bias)?.floor_sub(old_bias);
    point.slope = if old.end > next_time {
        point.slope.try_add(new.slope)?.floor_sub(old.slope)
    } else {
        point.slope.try_add(new.slope)?
    };
    history.set(next_time, point);

    if old.end > now {
        history.cancel_change(old.end, old.slope);
    }
    history.schedule_change(new.end, new.slope)
}
