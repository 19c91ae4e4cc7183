//! # Reward Channels
//!
//! One [`RewardChannel`] per registered gauge. Its weekly bucket is the
//! channel's cut of that week's emission:
//!
//! ```text
//! bucket(w) = mintable(w, min(now, w + WEEK)) × relativeWeight(channel, w) / 1e18
//! ```
//!
//! Buckets are split among lockers by the shared [`EpochAccountant`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use velock_protocol::config::MULTIPLIER;
use velock_protocol::{Address, Amount, CatchUpLimits, FixedMath, MathError, Progress, Timestamp};

use crate::epoch_accountant::{AccountantError, EpochAccountant};
use crate::gauge_controller::{GaugeController, WeightError};
use crate::inflation::{InflationError, InflationSchedule};
use crate::voting_escrow::VotingEscrow;

/// Errors that can occur while accruing channel rewards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Only the user or the gateway may checkpoint a user.
    #[error("unauthorized: {caller} cannot checkpoint {user}")]
    Unauthorized {
        /// Address that made the call.
        caller: Address,
        /// User whose checkpoint was requested.
        user: Address,
    },

    #[error(transparent)]
    Inflation(#[from] InflationError),

    #[error(transparent)]
    Weight(#[from] WeightError),

    #[error(transparent)]
    Accountant(#[from] AccountantError),

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Emission accounting for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardChannel {
    channel: Address,
    accountant: EpochAccountant,
}

impl RewardChannel {
    /// Starts accounting at the week containing `start`.
    pub fn new(channel: Address, start: Timestamp, limits: CatchUpLimits) -> Self {
        Self {
            channel,
            accountant: EpochAccountant::new(start, limits),
        }
    }

    pub fn channel(&self) -> Address {
        self.channel
    }

    pub fn accountant(&self) -> &EpochAccountant {
        &self.accountant
    }

    /// Total rewards credited to `user` on this channel.
    pub fn integrate_fraction(&self, user: &Address) -> Amount {
        self.accountant.integrate_fraction(user)
    }

    /// One bounded round of emission bucketing and supply snapshots.
    /// Does nothing before inflation starts.
    pub fn checkpoint(
        &mut self,
        now: Timestamp,
        schedule: &InflationSchedule,
        controller: &GaugeController,
        escrow: &VotingEscrow,
    ) -> Result<Progress, ChannelError> {
        if !schedule.has_started(now) {
            return Ok(Progress::idle());
        }
        let channel = self.channel;
        let tokens = self
            .accountant
            .accrue_with(now, |week, end| -> Result<Amount, ChannelError> {
                let minted = schedule.mintable_in_timeframe(week, end)?;
                let weight = controller.gauge_relative_weight(&channel, week)?;
                Ok(minted.mul_div(weight, MULTIPLIER)?)
            })?;
        let supply = self.accountant.checkpoint_total_supply(now, escrow)?;
        Ok(tokens.and(supply))
    }

    /// Brings the channel up to date, then credits `user`.
    #[allow(clippy::too_many_arguments)]
    pub fn user_checkpoint(
        &mut self,
        caller: Address,
        user: Address,
        gateway: Address,
        now: Timestamp,
        schedule: &InflationSchedule,
        controller: &GaugeController,
        escrow: &VotingEscrow,
    ) -> Result<Progress, ChannelError> {
        if caller != user && caller != gateway {
            return Err(ChannelError::Unauthorized { caller, user });
        }
        if !schedule.has_started(now) {
            return Ok(Progress::idle());
        }
        let channel = self.checkpoint(now, schedule, controller, escrow)?;
        let own = self.accountant.user_checkpoint(user, escrow)?;
        Ok(channel.and(own))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenLedger;
    use velock_protocol::config::{MAXTIME, WEEK};
    use velock_protocol::{BlockContext, InflationParams};

    const ADMIN: Address = Address::from_low_u64(0xAD);
    const GATEWAY: Address = Address::from_low_u64(0x3);
    const ALICE: Address = Address::from_low_u64(0xA);
    const BOB: Address = Address::from_low_u64(0xB);
    const GAUGE: Address = Address::from_low_u64(0x6A);
    const W0: Timestamp = 2_810 * WEEK;

    struct World {
        schedule: InflationSchedule,
        controller: GaugeController,
        escrow: VotingEscrow,
        channel: RewardChannel,
    }

    /// Inflation starts at `W0`; the channel carries all weight from `W0 + WEEK`.
    fn world() -> World {
        let params = InflationParams::default();
        let deploy = W0 - params.inflation_delay;
        let mut token = TokenLedger::new("VLK");
        let schedule = InflationSchedule::new(params, ADMIN, deploy, &mut token).unwrap();

        let mut controller = GaugeController::new(ADMIN, 500).unwrap();
        controller
            .add_type(ADMIN, "liquidity", MULTIPLIER, W0)
            .unwrap();
        controller
            .add_gauge(ADMIN, GAUGE, 0, MULTIPLIER, W0)
            .unwrap();

        let ctx = BlockContext::new(W0, 1);
        token.transfer(ADMIN, ALICE, MULTIPLIER * Amount::from(10u64)).unwrap();
        let mut escrow = VotingEscrow::new(ADMIN, Address::from_low_u64(0xE5), ctx, 255).unwrap();
        escrow
            .create_lock(ctx, ALICE, MULTIPLIER * Amount::from(10u64), W0 + MAXTIME, &mut token)
            .unwrap();

        World {
            schedule,
            controller,
            escrow,
            channel: RewardChannel::new(GAUGE, W0, CatchUpLimits::default()),
        }
    }

    #[test]
    fn buckets_follow_emission_and_weight() {
        let mut w = world();
        let now = W0 + 3 * WEEK;
        w.channel
            .checkpoint(now, &w.schedule, &w.controller, &w.escrow)
            .unwrap();

        let weekly = w.schedule.rate_for_epoch(0).unwrap() * Amount::from(WEEK);
        // No weight before the gauge's first week.
        assert_eq!(w.channel.accountant().tokens_per_week(W0), Amount::zero());
        assert_eq!(w.channel.accountant().tokens_per_week(W0 + WEEK), weekly);
        assert_eq!(w.channel.accountant().tokens_per_week(W0 + 2 * WEEK), weekly);
    }

    #[test]
    fn only_user_or_gateway_checkpoints_user() {
        let mut w = world();
        let now = W0 + 3 * WEEK;
        assert_eq!(
            w.channel.user_checkpoint(
                BOB,
                ALICE,
                GATEWAY,
                now,
                &w.schedule,
                &w.controller,
                &w.escrow
            ),
            Err(ChannelError::Unauthorized {
                caller: BOB,
                user: ALICE
            })
        );
        w.channel
            .user_checkpoint(GATEWAY, ALICE, GATEWAY, now, &w.schedule, &w.controller, &w.escrow)
            .unwrap();

        let weekly = w.schedule.rate_for_epoch(0).unwrap() * Amount::from(WEEK);
        assert_eq!(w.channel.integrate_fraction(&ALICE), weekly * Amount::from(2u64));
    }

    #[test]
    fn idle_before_inflation() {
        let mut w = world();
        let early = w.schedule.inflation_start() - 1;
        let progress = w
            .channel
            .checkpoint(early, &w.schedule, &w.controller, &w.escrow)
            .unwrap();
        assert_eq!(progress, Progress::idle());
        assert_eq!(w.channel.accountant().token_time_cursor(), W0);
    }
}
