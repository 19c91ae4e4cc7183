//! # Engine
//!
//! Wires every component into one value with a single entry point per
//! operation. The engine owns the clock: each mutating call carries a
//! [`BlockContext`], and a context earlier than the last one seen is
//! rejected before anything else happens.
//!
//! ## Catch-up
//!
//! Every cursor in the system advances in bounded steps. [`Engine::sync`]
//! runs one round of all of them in dependency order and reports whether
//! everything converged; a keeper calls it until it does.
//!
//! ## Snapshots
//!
//! [`Engine::snapshot`] encodes the whole state as `bincode` behind a
//! version tag; [`Engine::restore`] refuses any other version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use velock_protocol::{
    Address, AdminError, Amount, BlockContext, BlockHeight, CatchUpLimits, InflationParams,
    MathError, Progress, Timestamp,
};

use crate::epoch_accountant::AccountantError;
use crate::fee_distributor::{FeeDistributor, FeeError};
use crate::gauge_controller::{GaugeController, TypeId, WeightError};
use crate::inflation::{InflationError, InflationSchedule};
use crate::minter::{Collaborators, MintError, Minter};
use crate::reward_channel::{ChannelError, RewardChannel};
use crate::token::{TokenError, TokenLedger};
use crate::voting_escrow::{EscrowError, LockedBalance, VotingEscrow};

/// Governance-token account holding every locked balance.
pub const ESCROW_ACCOUNT: Address = Address::from_low_u64(0xE5C0);
/// Fee-token account holding undistributed fees.
pub const FEE_ACCOUNT: Address = Address::from_low_u64(0xFEE0);
/// Identity of the mint gateway, the schedule's only minter.
pub const MINTER_ACCOUNT: Address = Address::from_low_u64(0x313E);

/// Bumped whenever the serialized layout of [`Engine`] changes.
pub const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad arguments. Retrying the same call will fail again.
    InputValidation,
    /// Not yet. Retry later, or after running the catch-up loops.
    TemporalGuard,
    /// Wrong caller or an unregistered target.
    Authorization,
    /// Overflow, underflow or division by zero.
    Arithmetic,
    /// The engine itself is in a state the call cannot proceed from.
    State,
}

/// Every failure the engine can surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A mutating call arrived with a context older than the last one.
    #[error(
        "clock regression: last ({last_timestamp}, #{last_height}), got ({timestamp}, #{height})"
    )]
    ClockRegression {
        last_timestamp: Timestamp,
        last_height: BlockHeight,
        timestamp: Timestamp,
        height: BlockHeight,
    },

    /// The channel has no reward accounting.
    #[error("unknown channel {channel}")]
    UnknownChannel { channel: Address },

    /// The snapshot was written by an incompatible version.
    #[error("snapshot version {found} is not supported (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    /// Snapshot encoding or decoding failed.
    #[error("snapshot codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Weight(#[from] WeightError),

    #[error(transparent)]
    Inflation(#[from] InflationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Accountant(#[from] AccountantError),

    #[error(transparent)]
    Fee(#[from] FeeError),

    #[error(transparent)]
    Mint(#[from] MintError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Math(#[from] MathError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ClockRegression { .. }
            | EngineError::SnapshotVersion { .. }
            | EngineError::Codec(_) => ErrorKind::State,
            EngineError::UnknownChannel { .. } => ErrorKind::Authorization,
            EngineError::Escrow(e) => escrow_kind(e),
            EngineError::Weight(e) => weight_kind(e),
            EngineError::Inflation(e) => inflation_kind(e),
            EngineError::Channel(e) => channel_kind(e),
            EngineError::Accountant(AccountantError::Math(_)) => ErrorKind::Arithmetic,
            EngineError::Fee(e) => fee_kind(e),
            EngineError::Mint(e) => mint_kind(e),
            EngineError::Token(e) => token_kind(e),
            EngineError::Admin(_) => ErrorKind::Authorization,
            EngineError::Math(_) => ErrorKind::Arithmetic,
        }
    }
}

fn token_kind(e: &TokenError) -> ErrorKind {
    match e {
        TokenError::Math(_) => ErrorKind::Arithmetic,
        _ => ErrorKind::InputValidation,
    }
}

fn escrow_kind(e: &EscrowError) -> ErrorKind {
    match e {
        EscrowError::CheckpointBehind { .. } => ErrorKind::TemporalGuard,
        EscrowError::Admin(_) => ErrorKind::Authorization,
        EscrowError::Token(t) => token_kind(t),
        EscrowError::Math(_) => ErrorKind::Arithmetic,
        _ => ErrorKind::InputValidation,
    }
}

fn weight_kind(e: &WeightError) -> ErrorKind {
    match e {
        WeightError::VoteTooSoon { .. } | WeightError::CheckpointBehind { .. } => {
            ErrorKind::TemporalGuard
        }
        WeightError::GaugeNotAdded { .. } | WeightError::Admin(_) => ErrorKind::Authorization,
        WeightError::Math(_) => ErrorKind::Arithmetic,
        _ => ErrorKind::InputValidation,
    }
}

fn inflation_kind(e: &InflationError) -> ErrorKind {
    match e {
        InflationError::TooSoon { .. } | InflationError::TooFarInFuture { .. } => {
            ErrorKind::TemporalGuard
        }
        InflationError::NotMinter { .. } | InflationError::Admin(_) => ErrorKind::Authorization,
        InflationError::MinterAlreadySet => ErrorKind::State,
        InflationError::Token(t) => token_kind(t),
        InflationError::Math(_) => ErrorKind::Arithmetic,
        _ => ErrorKind::InputValidation,
    }
}

fn channel_kind(e: &ChannelError) -> ErrorKind {
    match e {
        ChannelError::Unauthorized { .. } => ErrorKind::Authorization,
        ChannelError::Inflation(i) => inflation_kind(i),
        ChannelError::Weight(w) => weight_kind(w),
        ChannelError::Accountant(_) | ChannelError::Math(_) => ErrorKind::Arithmetic,
    }
}

fn fee_kind(e: &FeeError) -> ErrorKind {
    match e {
        FeeError::ZeroAmount => ErrorKind::InputValidation,
        FeeError::Unauthorized { .. } | FeeError::Admin(_) => ErrorKind::Authorization,
        FeeError::Token(t) => token_kind(t),
        FeeError::Accountant(_) | FeeError::Math(_) => ErrorKind::Arithmetic,
    }
}

fn mint_kind(e: &MintError) -> ErrorKind {
    match e {
        MintError::UnknownChannel { .. } | MintError::NotApproved { .. } => {
            ErrorKind::Authorization
        }
        MintError::TooManyChannels { .. } => ErrorKind::InputValidation,
        MintError::Channel(c) => channel_kind(c),
        MintError::Inflation(i) => inflation_kind(i),
        MintError::Math(_) => ErrorKind::Arithmetic,
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Components that carry their own admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Escrow,
    Controller,
    Schedule,
    Fees,
}

/// Result of one [`Engine::sync`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub escrow: Progress,
    pub schedule: Progress,
    pub controller: Progress,
    pub channels: Progress,
    pub fees: Progress,
}

impl SyncReport {
    /// `true` when every cursor reached `now`.
    pub fn caught_up(&self) -> bool {
        [
            self.escrow,
            self.schedule,
            self.controller,
            self.channels,
            self.fees,
        ]
        .iter()
        .all(|p| p.caught_up)
    }

    pub fn steps(&self) -> u64 {
        self.escrow.steps
            + self.schedule.steps
            + self.controller.steps
            + self.channels.steps
            + self.fees.steps
    }
}

/// Lag of one reward channel's cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: Address,
    pub token_time_cursor: Timestamp,
    pub time_cursor: Timestamp,
    pub token_weeks_behind: u64,
    pub supply_weeks_behind: u64,
}

/// Where every cursor stands relative to `now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub now: Timestamp,
    pub last_timestamp: Timestamp,
    pub last_height: BlockHeight,
    pub escrow_epoch: u64,
    pub escrow_weeks_behind: u64,
    pub controller_weeks_behind: u64,
    pub mining_epoch: i64,
    pub inflation_started: bool,
    pub rate: Amount,
    pub n_gauge_types: u32,
    pub n_gauges: u32,
    pub channels: Vec<ChannelStatus>,
    pub fee_token_weeks_behind: u64,
    pub fee_supply_weeks_behind: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The whole accounting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    limits: CatchUpLimits,
    last_ctx: BlockContext,
    token: TokenLedger,
    fee_token: TokenLedger,
    schedule: InflationSchedule,
    escrow: VotingEscrow,
    controller: GaugeController,
    channels: BTreeMap<Address, RewardChannel>,
    fees: FeeDistributor,
    minter: Minter,
}

impl Engine {
    /// Deploys every component at `ctx` with `admin` as their admin.
    ///
    /// The initial governance supply is minted to `admin`; the gateway is
    /// installed as the schedule's minter.
    pub fn new(
        admin: Address,
        ctx: BlockContext,
        params: InflationParams,
        limits: CatchUpLimits,
    ) -> EngineResult<Self> {
        let mut token = TokenLedger::new("VLK");
        let mut schedule = InflationSchedule::new(params, admin, ctx.timestamp, &mut token)?;
        schedule.set_minter(admin, MINTER_ACCOUNT)?;

        let engine = Self {
            limits,
            last_ctx: ctx,
            token,
            fee_token: TokenLedger::new("FEE"),
            schedule,
            escrow: VotingEscrow::new(admin, ESCROW_ACCOUNT, ctx, limits.ledger_weeks)?,
            controller: GaugeController::new(admin, limits.weight_weeks)?,
            channels: BTreeMap::new(),
            fees: FeeDistributor::new(admin, FEE_ACCOUNT, ctx.timestamp, limits)?,
            minter: Minter::new(MINTER_ACCOUNT),
        };
        tracing::info!(
            admin = %admin,
            timestamp = ctx.timestamp,
            height = ctx.height,
            inflation_start = engine.schedule.inflation_start(),
            "engine deployed"
        );
        Ok(engine)
    }

    fn advance_clock(&mut self, ctx: BlockContext) -> EngineResult<()> {
        if !ctx.follows(&self.last_ctx) {
            return Err(EngineError::ClockRegression {
                last_timestamp: self.last_ctx.timestamp,
                last_height: self.last_ctx.height,
                timestamp: ctx.timestamp,
                height: ctx.height,
            });
        }
        self.last_ctx = ctx;
        Ok(())
    }

    // -- component access ----------------------------------------------------

    pub fn limits(&self) -> CatchUpLimits {
        self.limits
    }

    pub fn last_ctx(&self) -> BlockContext {
        self.last_ctx
    }

    pub fn token(&self) -> &TokenLedger {
        &self.token
    }

    /// Direct access to the governance token, for funding accounts.
    pub fn token_mut(&mut self) -> &mut TokenLedger {
        &mut self.token
    }

    pub fn fee_token(&self) -> &TokenLedger {
        &self.fee_token
    }

    /// Direct access to the fee token, for funding fee payers.
    pub fn fee_token_mut(&mut self) -> &mut TokenLedger {
        &mut self.fee_token
    }

    pub fn schedule(&self) -> &InflationSchedule {
        &self.schedule
    }

    pub fn escrow(&self) -> &VotingEscrow {
        &self.escrow
    }

    pub fn controller(&self) -> &GaugeController {
        &self.controller
    }

    pub fn fees(&self) -> &FeeDistributor {
        &self.fees
    }

    pub fn minter(&self) -> &Minter {
        &self.minter
    }

    pub fn channel(&self, channel: &Address) -> Option<&RewardChannel> {
        self.channels.get(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &RewardChannel> {
        self.channels.values()
    }

    // -- escrow ledger -------------------------------------------------------

    pub fn create_lock(
        &mut self,
        ctx: BlockContext,
        user: Address,
        amount: Amount,
        unlock_time: Timestamp,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.escrow
            .create_lock(ctx, user, amount, unlock_time, &mut self.token)?;
        Ok(())
    }

    pub fn increase_amount(
        &mut self,
        ctx: BlockContext,
        user: Address,
        amount: Amount,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.escrow
            .increase_amount(ctx, user, amount, &mut self.token)?;
        Ok(())
    }

    /// `payer` adds `amount` to `user`'s existing lock.
    pub fn deposit_for(
        &mut self,
        ctx: BlockContext,
        payer: Address,
        user: Address,
        amount: Amount,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.escrow
            .deposit_for(ctx, payer, user, amount, &mut self.token)?;
        Ok(())
    }

    pub fn increase_unlock_time(
        &mut self,
        ctx: BlockContext,
        user: Address,
        unlock_time: Timestamp,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.escrow
            .increase_unlock_time(ctx, user, unlock_time, &mut self.token)?;
        Ok(())
    }

    pub fn withdraw(&mut self, ctx: BlockContext, user: Address) -> EngineResult<Amount> {
        self.advance_clock(ctx)?;
        Ok(self.escrow.withdraw(ctx, user, &mut self.token)?)
    }

    pub fn checkpoint_escrow(&mut self, ctx: BlockContext) -> EngineResult<Progress> {
        self.advance_clock(ctx)?;
        Ok(self.escrow.checkpoint(ctx)?)
    }

    pub fn balance_of(&self, user: &Address, t: Timestamp) -> Amount {
        self.escrow.balance_of(user, t)
    }

    pub fn total_supply_at(&self, t: Timestamp) -> Amount {
        self.escrow.total_supply_at(t)
    }

    /// Voting power at a past block, measured against the last seen block.
    pub fn balance_of_at_block(&self, user: &Address, height: BlockHeight) -> EngineResult<Amount> {
        Ok(self
            .escrow
            .balance_of_at_block(user, height, self.last_ctx)?)
    }

    pub fn total_supply_at_block(&self, height: BlockHeight) -> EngineResult<Amount> {
        Ok(self.escrow.total_supply_at_block(height, self.last_ctx)?)
    }

    pub fn locked(&self, user: &Address) -> LockedBalance {
        self.escrow.locked(user)
    }

    // -- weight controller ---------------------------------------------------

    pub fn add_type(
        &mut self,
        ctx: BlockContext,
        caller: Address,
        name: &str,
        weight: Amount,
    ) -> EngineResult<TypeId> {
        self.advance_clock(ctx)?;
        Ok(self
            .controller
            .add_type(caller, name, weight, ctx.timestamp)?)
    }

    /// Registers `channel` with the controller and opens its reward
    /// accounting at the start of the current week. Weeks before inflation
    /// starts get empty buckets.
    pub fn add_gauge(
        &mut self,
        ctx: BlockContext,
        caller: Address,
        channel: Address,
        type_id: TypeId,
        weight: Amount,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.controller
            .add_gauge(caller, channel, type_id, weight, ctx.timestamp)?;
        self.channels
            .insert(channel, RewardChannel::new(channel, ctx.timestamp, self.limits));
        Ok(())
    }

    pub fn change_type_weight(
        &mut self,
        ctx: BlockContext,
        caller: Address,
        type_id: TypeId,
        weight: Amount,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.controller
            .change_type_weight(caller, type_id, weight, ctx.timestamp)?;
        Ok(())
    }

    pub fn change_gauge_weight(
        &mut self,
        ctx: BlockContext,
        caller: Address,
        channel: Address,
        weight: Amount,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.controller
            .change_gauge_weight(caller, channel, weight, ctx.timestamp)?;
        Ok(())
    }

    pub fn checkpoint_gauge(&mut self, ctx: BlockContext, channel: Address) -> EngineResult<Progress> {
        self.advance_clock(ctx)?;
        Ok(self.controller.checkpoint_gauge(&channel, ctx.timestamp)?)
    }

    pub fn vote_for_gauge_weights(
        &mut self,
        ctx: BlockContext,
        user: Address,
        channel: Address,
        power_bps: u32,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.controller.vote_for_gauge_weights(
            user,
            channel,
            power_bps,
            ctx.timestamp,
            &self.escrow,
        )?;
        Ok(())
    }

    pub fn gauge_relative_weight(&self, channel: &Address, t: Timestamp) -> EngineResult<Amount> {
        Ok(self.controller.gauge_relative_weight(channel, t)?)
    }

    // -- inflation schedule --------------------------------------------------

    pub fn update_mining_parameters(&mut self, ctx: BlockContext) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.schedule.update_mining_parameters(ctx.timestamp)?;
        Ok(())
    }

    pub fn mintable_in_timeframe(&self, start: Timestamp, end: Timestamp) -> EngineResult<Amount> {
        Ok(self.schedule.mintable_in_timeframe(start, end)?)
    }

    pub fn available_supply(&self, now: Timestamp) -> EngineResult<Amount> {
        Ok(self.schedule.available_supply(now)?)
    }

    // -- reward channels -----------------------------------------------------

    pub fn checkpoint_channel(&mut self, ctx: BlockContext, channel: Address) -> EngineResult<Progress> {
        self.advance_clock(ctx)?;
        let ch = self
            .channels
            .get_mut(&channel)
            .ok_or(EngineError::UnknownChannel { channel })?;
        Ok(ch.checkpoint(ctx.timestamp, &self.schedule, &self.controller, &self.escrow)?)
    }

    pub fn user_checkpoint(
        &mut self,
        ctx: BlockContext,
        caller: Address,
        channel: Address,
        user: Address,
    ) -> EngineResult<Progress> {
        self.advance_clock(ctx)?;
        let ch = self
            .channels
            .get_mut(&channel)
            .ok_or(EngineError::UnknownChannel { channel })?;
        Ok(ch.user_checkpoint(
            caller,
            user,
            MINTER_ACCOUNT,
            ctx.timestamp,
            &self.schedule,
            &self.controller,
            &self.escrow,
        )?)
    }

    /// Rewards credited to `user` on `channel` so far.
    pub fn integrate_fraction(&self, channel: &Address, user: &Address) -> EngineResult<Amount> {
        self.channels
            .get(channel)
            .map(|ch| ch.integrate_fraction(user))
            .ok_or(EngineError::UnknownChannel { channel: *channel })
    }

    // -- mint gateway --------------------------------------------------------

    fn collaborators(&mut self) -> (&mut Minter, Collaborators<'_>) {
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

    pub fn mint(&mut self, ctx: BlockContext, user: Address, channel: Address) -> EngineResult<Amount> {
        self.advance_clock(ctx)?;
        let (minter, collab) = self.collaborators();
        Ok(minter.mint(user, channel, ctx.timestamp, collab)?)
    }

    pub fn mint_for(
        &mut self,
        ctx: BlockContext,
        caller: Address,
        channel: Address,
        user: Address,
    ) -> EngineResult<Amount> {
        self.advance_clock(ctx)?;
        let (minter, collab) = self.collaborators();
        Ok(minter.mint_for(caller, channel, user, ctx.timestamp, collab)?)
    }

    pub fn mint_many(
        &mut self,
        ctx: BlockContext,
        user: Address,
        channels: &[Address],
    ) -> EngineResult<Amount> {
        self.advance_clock(ctx)?;
        let (minter, collab) = self.collaborators();
        Ok(minter.mint_many(user, channels, ctx.timestamp, collab)?)
    }

    pub fn toggle_approve_mint(
        &mut self,
        ctx: BlockContext,
        owner: Address,
        delegate: Address,
    ) -> EngineResult<bool> {
        self.advance_clock(ctx)?;
        Ok(self.minter.toggle_approve_mint(owner, delegate))
    }

    pub fn minted(&self, user: &Address, channel: &Address) -> Amount {
        self.minter.minted(user, channel)
    }

    // -- fee distributor -----------------------------------------------------

    pub fn deposit_fees(&mut self, ctx: BlockContext, from: Address, amount: Amount) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        self.fees.deposit_fees(from, amount, &mut self.fee_token)?;
        Ok(())
    }

    pub fn checkpoint_token(&mut self, ctx: BlockContext, caller: Address) -> EngineResult<Progress> {
        self.advance_clock(ctx)?;
        Ok(self
            .fees
            .checkpoint_token(caller, ctx.timestamp, &self.fee_token)?)
    }

    pub fn checkpoint_fee_supply(&mut self, ctx: BlockContext) -> EngineResult<Progress> {
        self.advance_clock(ctx)?;
        Ok(self
            .fees
            .checkpoint_total_supply(ctx.timestamp, &self.escrow)?)
    }

    pub fn toggle_allow_checkpoint_token(
        &mut self,
        ctx: BlockContext,
        caller: Address,
    ) -> EngineResult<bool> {
        self.advance_clock(ctx)?;
        Ok(self.fees.toggle_allow_checkpoint_token(caller)?)
    }

    pub fn claim_fees(&mut self, ctx: BlockContext, user: Address) -> EngineResult<Amount> {
        self.advance_clock(ctx)?;
        Ok(self
            .fees
            .claim(user, ctx.timestamp, &self.escrow, &mut self.fee_token)?)
    }

    // -- ownership -----------------------------------------------------------

    pub fn admin(&self, component: Component) -> Address {
        match component {
            Component::Escrow => self.escrow.ownership().admin(),
            Component::Controller => self.controller.ownership().admin(),
            Component::Schedule => self.schedule.ownership().admin(),
            Component::Fees => self.fees.ownership().admin(),
        }
    }

    pub fn future_admin(&self, component: Component) -> Option<Address> {
        match component {
            Component::Escrow => self.escrow.ownership().future_admin(),
            Component::Controller => self.controller.ownership().future_admin(),
            Component::Schedule => self.schedule.ownership().future_admin(),
            Component::Fees => self.fees.ownership().future_admin(),
        }
    }

    pub fn commit_transfer_ownership(
        &mut self,
        ctx: BlockContext,
        component: Component,
        caller: Address,
        future: Address,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        match component {
            Component::Escrow => self.escrow.ownership_mut().commit_transfer(caller, future)?,
            Component::Controller => self
                .controller
                .ownership_mut()
                .commit_transfer(caller, future)?,
            Component::Schedule => self.schedule.commit_transfer_ownership(caller, future)?,
            Component::Fees => self.fees.ownership_mut().commit_transfer(caller, future)?,
        }
        Ok(())
    }

    pub fn apply_transfer_ownership(
        &mut self,
        ctx: BlockContext,
        component: Component,
        caller: Address,
    ) -> EngineResult<()> {
        self.advance_clock(ctx)?;
        match component {
            Component::Escrow => {
                self.escrow.ownership_mut().apply_transfer(caller)?;
            }
            Component::Controller => {
                self.controller.ownership_mut().apply_transfer(caller)?;
            }
            Component::Schedule => self.schedule.apply_transfer_ownership(caller)?,
            Component::Fees => {
                self.fees.ownership_mut().apply_transfer(caller)?;
            }
        }
        Ok(())
    }

    // -- catch-up ------------------------------------------------------------

    /// One bounded round of every catch-up loop.
    ///
    /// Channels are only bucketed once the schedule has caught up, since
    /// emission can only be measured one epoch past the recorded one.
    pub fn sync(&mut self, ctx: BlockContext) -> EngineResult<SyncReport> {
        self.advance_clock(ctx)?;
        let now = ctx.timestamp;
        let mut report = SyncReport {
            escrow: self.escrow.checkpoint(ctx)?,
            schedule: self.schedule.catch_up(now, self.limits.inflation_epochs)?,
            controller: self.controller.checkpoint_all(now)?,
            ..SyncReport::default()
        };

        report.channels = if report.schedule.caught_up {
            let mut progress = Progress::idle();
            for ch in self.channels.values_mut() {
                let step = ch.checkpoint(now, &self.schedule, &self.controller, &self.escrow)?;
                progress = progress.and(step);
            }
            progress
        } else {
            Progress::partial(0)
        };

        report.fees = self.fees.checkpoint_total_supply(now, &self.escrow)?;

        tracing::debug!(
            now,
            steps = report.steps(),
            caught_up = report.caught_up(),
            "sync round"
        );
        Ok(report)
    }

    /// Cursor positions and lag at `now`. Read-only.
    pub fn status(&self, now: Timestamp) -> EngineStatus {
        let channels = self
            .channels
            .values()
            .map(|ch| {
                let acc = ch.accountant();
                ChannelStatus {
                    channel: ch.channel(),
                    token_time_cursor: acc.token_time_cursor(),
                    time_cursor: acc.time_cursor(),
                    token_weeks_behind: acc.token_weeks_behind(now),
                    supply_weeks_behind: acc.supply_weeks_behind(now),
                }
            })
            .collect();
        let fees = self.fees.accountant();
        EngineStatus {
            now,
            last_timestamp: self.last_ctx.timestamp,
            last_height: self.last_ctx.height,
            escrow_epoch: self.escrow.epoch(),
            escrow_weeks_behind: self.escrow.weeks_behind(now),
            controller_weeks_behind: self.controller.weeks_behind(now),
            mining_epoch: self.schedule.mining_epoch(),
            inflation_started: self.schedule.has_started(now),
            rate: self.schedule.rate(),
            n_gauge_types: self.controller.n_gauge_types(),
            n_gauges: self.controller.n_gauges(),
            channels,
            fee_token_weeks_behind: fees.token_weeks_behind(now),
            fee_supply_weeks_behind: fees.supply_weeks_behind(now),
        }
    }

    // -- persistence ---------------------------------------------------------

    /// Versioned binary image of the whole engine.
    pub fn snapshot(&self) -> EngineResult<Vec<u8>> {
        bincode::serialize(&(SNAPSHOT_VERSION, self)).map_err(|e| EngineError::Codec(e.to_string()))
    }

    /// Rebuilds an engine from [`snapshot`](Self::snapshot) output.
    pub fn restore(bytes: &[u8]) -> EngineResult<Self> {
        let found: u32 =
            bincode::deserialize(bytes).map_err(|e| EngineError::Codec(e.to_string()))?;
        if found != SNAPSHOT_VERSION {
            return Err(EngineError::SnapshotVersion {
                found,
                expected: SNAPSHOT_VERSION,
            });
        }
        let (_, engine): (u32, Engine) =
            bincode::deserialize(bytes).map_err(|e| EngineError::Codec(e.to_string()))?;
        Ok(engine)
    }
}
