//! # Mint/Claim Gateway
//!
//! Turns a channel's credited rewards into freshly minted governance tokens.
//! The gateway remembers how much it already minted per `(user, channel)`
//! and only ever mints the difference, so repeated mints never pay twice.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use velock_protocol::config::MINT_MANY_LIMIT;
use velock_protocol::{Address, Amount, FixedMath, MathError, Timestamp};

use crate::gauge_controller::GaugeController;
use crate::inflation::{InflationError, InflationSchedule};
use crate::reward_channel::{ChannelError, RewardChannel};
use crate::token::TokenLedger;
use crate::voting_escrow::VotingEscrow;

/// Errors that can occur while minting rewards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    /// The channel was never registered with the weight controller.
    #[error("unknown channel {channel}")]
    UnknownChannel {
        /// The unregistered channel.
        channel: Address,
    },

    /// `delegate` is not approved to mint on behalf of `owner`.
    #[error("{delegate} is not approved to mint for {owner}")]
    NotApproved {
        /// Address that attempted the mint.
        delegate: Address,
        /// Beneficiary of the attempted mint.
        owner: Address,
    },

    /// `mint_many` takes at most `MINT_MANY_LIMIT` channels.
    #[error("too many channels: {count} (max 8)")]
    TooManyChannels {
        /// Number of channels requested.
        count: usize,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Inflation(#[from] InflationError),

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Everything a mint touches besides the gateway itself.
pub struct Collaborators<'a> {
    pub channels: &'a mut BTreeMap<Address, RewardChannel>,
    pub schedule: &'a mut InflationSchedule,
    pub token: &'a mut TokenLedger,
    pub controller: &'a GaugeController,
    pub escrow: &'a VotingEscrow,
}

/// The gateway's own state: minted totals and delegate approvals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Minter {
    address: Address,
    minted: HashMap<Address, HashMap<Address, Amount>>,
    /// `(delegate, owner)` pairs allowed to call `mint_for`.
    approvals: HashSet<(Address, Address)>,
}

impl Minter {
    /// A gateway acting as `address`, which must be the schedule's minter.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            minted: HashMap::new(),
            approvals: HashSet::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Total already minted to `user` from `channel`.
    pub fn minted(&self, user: &Address, channel: &Address) -> Amount {
        self.minted
            .get(user)
            .and_then(|per_channel| per_channel.get(channel))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowed_to_mint_for(&self, delegate: &Address, owner: &Address) -> bool {
        self.approvals.contains(&(*delegate, *owner))
    }

    /// Flips whether `delegate` may mint for `owner`. Returns the new flag.
    pub fn toggle_approve_mint(&mut self, owner: Address, delegate: Address) -> bool {
        let key = (delegate, owner);
        let approved = if self.approvals.remove(&key) {
            false
        } else {
            self.approvals.insert(key);
            true
        };
        tracing::debug!(owner = %owner, delegate = %delegate, approved, "mint approval toggled");
        approved
    }

    /// Mints everything `user` has earned on `channel` and not yet received.
    pub fn mint(
        &mut self,
        user: Address,
        channel: Address,
        now: Timestamp,
        mut collab: Collaborators<'_>,
    ) -> Result<Amount, MintError> {
        self.mint_one(user, channel, now, &mut collab)
    }

    /// [`mint`](Self::mint) on behalf of `user`, if `caller` is approved.
    pub fn mint_for(
        &mut self,
        caller: Address,
        channel: Address,
        user: Address,
        now: Timestamp,
        collab: Collaborators<'_>,
    ) -> Result<Amount, MintError> {
        if caller != user && !self.allowed_to_mint_for(&caller, &user) {
            return Err(MintError::NotApproved {
                delegate: caller,
                owner: user,
            });
        }
        self.mint(user, channel, now, collab)
    }

    /// Mints for up to `MINT_MANY_LIMIT` channels. Returns the total.
    pub fn mint_many(
        &mut self,
        user: Address,
        channels: &[Address],
        now: Timestamp,
        mut collab: Collaborators<'_>,
    ) -> Result<Amount, MintError> {
        if channels.len() > MINT_MANY_LIMIT {
            return Err(MintError::TooManyChannels {
                count: channels.len(),
            });
        }
        let mut total = Amount::zero();
        for channel in channels {
            let minted = self.mint_one(user, *channel, now, &mut collab)?;
            total = total.try_add(minted)?;
        }
        Ok(total)
    }

    fn mint_one(
        &mut self,
        user: Address,
        channel: Address,
        now: Timestamp,
        collab: &mut Collaborators<'_>,
    ) -> Result<Amount, MintError> {
        if !collab.controller.is_gauge(&channel) {
            return Err(MintError::UnknownChannel { channel });
        }
        let ch = collab
            .channels
            .get_mut(&channel)
            .ok_or(MintError::UnknownChannel { channel })?;
        if !collab.schedule.has_started(now) {
            return Ok(Amount::zero());
        }

        collab.schedule.start_epoch_time_write(now)?;
        ch.user_checkpoint(
            self.address,
            user,
            self.address,
            now,
            collab.schedule,
            collab.controller,
            collab.escrow,
        )?;

        let earned = ch.integrate_fraction(&user);
        let already = self.minted(&user, &channel);
        let delta = earned.floor_sub(already);
        if delta.is_zero() {
            return Ok(delta);
        }
        collab
            .schedule
            .mint(self.address, user, delta, now, collab.token)?;
        self.minted.entry(user).or_default().insert(channel, earned);

        tracing::debug!(user = %user, channel = %channel, amount = %delta, "rewards minted");
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velock_protocol::config::{MAXTIME, MULTIPLIER, WEEK};
    use velock_protocol::{BlockContext, CatchUpLimits, InflationParams};

    const ADMIN: Address = Address::from_low_u64(0xAD);
    const GATEWAY: Address = Address::from_low_u64(0x3);
    const ALICE: Address = Address::from_low_u64(0xA);
    const BOB: Address = Address::from_low_u64(0xB);
    const GAUGE: Address = Address::from_low_u64(0x6A);
    const W0: Timestamp = 2_810 * WEEK;

    struct World {
        minter: Minter,
        channels: BTreeMap<Address, RewardChannel>,
        schedule: InflationSchedule,
        token: TokenLedger,
        controller: GaugeController,
        escrow: VotingEscrow,
    }

    impl World {
        fn collab(&mut self) -> (&mut Minter, Collaborators<'_>) {
            (
                &mut self.minter,
                Collaborators {
                    channels: &mut self.channels,
                    schedule: &mut self.schedule,
                    token: &mut self.token,
                    controller: &self.controller,
                    escrow: &self.escrow,
                },
            )
        }
    }

    fn world() -> World {
        let params = InflationParams::default();
        let deploy = W0 - params.inflation_delay;
        let mut token = TokenLedger::new("VLK");
        let mut schedule = InflationSchedule::new(params, ADMIN, deploy, &mut token).unwrap();
        schedule.set_minter(ADMIN, GATEWAY).unwrap();

        let mut controller = GaugeController::new(ADMIN, 500).unwrap();
        controller.add_type(ADMIN, "liquidity", MULTIPLIER, W0).unwrap();
        controller.add_gauge(ADMIN, GAUGE, 0, MULTIPLIER, W0).unwrap();

        let ctx = BlockContext::new(W0, 1);
        let stake = MULTIPLIER * Amount::from(10u64);
        token.transfer(ADMIN, ALICE, stake).unwrap();
        let mut escrow = VotingEscrow::new(ADMIN, Address::from_low_u64(0xE5), ctx, 255).unwrap();
        escrow
            .create_lock(ctx, ALICE, stake, W0 + MAXTIME, &mut token)
            .unwrap();

        let mut channels = BTreeMap::new();
        channels.insert(GAUGE, RewardChannel::new(GAUGE, W0, CatchUpLimits::default()));
        World {
            minter: Minter::new(GATEWAY),
            channels,
            schedule,
            token,
            controller,
            escrow,
        }
    }

    #[test]
    fn mint_pays_delta_once() {
        let mut w = world();
        let now = W0 + 3 * WEEK;
        let before = w.token.balance_of(&ALICE);

        let (minter, collab) = w.collab();
        let paid = minter.mint(ALICE, GAUGE, now, collab).unwrap();
        assert!(!paid.is_zero());
        assert_eq!(w.token.balance_of(&ALICE), before + paid);
        assert_eq!(w.minter.minted(&ALICE, &GAUGE), paid);

        let (minter, collab) = w.collab();
        assert_eq!(minter.mint(ALICE, GAUGE, now, collab).unwrap(), Amount::zero());
        assert_eq!(w.token.balance_of(&ALICE), before + paid);
    }

    #[test]
    fn unknown_channel_rejected() {
        let mut w = world();
        let stray = Address::from_low_u64(0xDEAD);
        let (minter, collab) = w.collab();
        assert_eq!(
            minter.mint(ALICE, stray, W0 + WEEK, collab),
            Err(MintError::UnknownChannel { channel: stray })
        );
    }

    #[test]
    fn nothing_before_inflation() {
        let mut w = world();
        let (minter, collab) = w.collab();
        let paid = minter.mint(ALICE, GAUGE, W0 - 1, collab).unwrap();
        assert_eq!(paid, Amount::zero());
    }

    #[test]
    fn mint_for_requires_approval() {
        let mut w = world();
        let now = W0 + 2 * WEEK;
        let (minter, collab) = w.collab();
        assert_eq!(
            minter.mint_for(BOB, GAUGE, ALICE, now, collab),
            Err(MintError::NotApproved {
                delegate: BOB,
                owner: ALICE
            })
        );

        assert!(w.minter.toggle_approve_mint(ALICE, BOB));
        assert!(w.minter.allowed_to_mint_for(&BOB, &ALICE));
        let (minter, collab) = w.collab();
        let paid = minter.mint_for(BOB, GAUGE, ALICE, now, collab).unwrap();
        assert!(!paid.is_zero());
        assert_eq!(w.token.balance_of(&BOB), Amount::zero());

        assert!(!w.minter.toggle_approve_mint(ALICE, BOB));
    }

    #[test]
    fn mint_many_bounded() {
        let mut w = world();
        let channels = vec![GAUGE; MINT_MANY_LIMIT + 1];
        let (minter, collab) = w.collab();
        assert_eq!(
            minter.mint_many(ALICE, &channels, W0 + WEEK, collab),
            Err(MintError::TooManyChannels {
                count: MINT_MANY_LIMIT + 1
            })
        );

        let (minter, collab) = w.collab();
        let total = minter
            .mint_many(ALICE, &[GAUGE, GAUGE], W0 + 2 * WEEK, collab)
            .unwrap();
        assert_eq!(total, w.minter.minted(&ALICE, &GAUGE));
    }
}
