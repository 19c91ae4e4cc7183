//! # Offline Simulation
//!
//! Replays a synthetic deployment week by week: lockers with staggered
//! durations vote for channels, fees arrive weekly, and everyone mints and
//! claims every four weeks. The result is a JSON-friendly report of where
//! every emitted and deposited token ended up.

use anyhow::{ensure, Result};
use serde::Serialize;

use velock_contracts::engine::FEE_ACCOUNT;
use velock_contracts::Engine;
use velock_protocol::config::{DAY, MAXTIME, MINT_MANY_LIMIT, MULTIPLIER, WEEK};
use velock_protocol::{
    Address, Amount, BlockContext, CatchUpLimits, FixedMath, InflationParams, Timestamp,
};

use crate::cli::SimulateArgs;

const ADMIN: Address = Address::from_low_u64(0xAD);
const PAYER: Address = Address::from_low_u64(0xFEE5);

/// First inflation epoch of every simulation.
const GENESIS_WEEK: Timestamp = 2_810 * WEEK;

/// Rounds per sync before the simulation gives up on convergence.
const MAX_SYNC_ROUNDS: u32 = 10_000;

/// Mint and claim cadence, in weeks.
const SETTLE_EVERY: u64 = 4;

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub start: Timestamp,
    pub end: Timestamp,
    pub weeks: u64,
    pub mining_epoch: i64,
    pub sync_rounds: u32,
    /// Emission bucketed into all channels.
    pub emitted: Amount,
    pub minted: Amount,
    pub fees_deposited: Amount,
    pub fees_claimed: Amount,
    /// Fees still in distributor custody: unclaimed credit plus dust.
    pub fees_in_custody: Amount,
    pub channels: Vec<ChannelReport>,
    pub users: Vec<UserReport>,
}

#[derive(Debug, Serialize)]
pub struct ChannelReport {
    pub channel: Address,
    pub relative_weight: Amount,
    pub emitted: Amount,
}

#[derive(Debug, Serialize)]
pub struct UserReport {
    pub user: Address,
    pub locked: Amount,
    pub unlock_time: Timestamp,
    pub voted_for: Address,
    pub minted: Amount,
    pub fees_claimed: Amount,
    pub withdrawn: Amount,
}

fn tokens(n: u64) -> Amount {
    Amount::from(n).saturating_mul(MULTIPLIER)
}

/// The engine plus a block counter, so every call gets a fresh height.
struct Sim {
    engine: Engine,
    height: u64,
    rounds: u32,
}

impl Sim {
    fn ctx(&mut self, t: Timestamp) -> BlockContext {
        self.height += 1;
        BlockContext::new(t, self.height)
    }

    fn sync(&mut self, t: Timestamp) -> Result<()> {
        for _ in 0..MAX_SYNC_ROUNDS {
            let ctx = self.ctx(t);
            self.rounds += 1;
            if self.engine.sync(ctx)?.caught_up() {
                return Ok(());
            }
        }
        anyhow::bail!("sync did not converge within {MAX_SYNC_ROUNDS} rounds")
    }
}

pub fn run(args: &SimulateArgs) -> Result<SimulationReport> {
    ensure!(args.users > 0, "need at least one user");
    ensure!(
        (1..=MINT_MANY_LIMIT as u64).contains(&args.channels),
        "channels must be between 1 and {MINT_MANY_LIMIT}"
    );
    ensure!(args.weeks > 0, "need at least one week");

    let params = InflationParams::default();
    let deployed = GENESIS_WEEK - params.inflation_delay;
    let mut sim = Sim {
        engine: Engine::new(
            ADMIN,
            BlockContext::new(deployed, 0),
            params,
            CatchUpLimits::default(),
        )?,
        height: 0,
        rounds: 0,
    };

    let ctx = sim.ctx(deployed);
    let type_id = sim.engine.add_type(ctx, ADMIN, "liquidity", MULTIPLIER)?;
    let channels: Vec<Address> = (0..args.channels)
        .map(|i| Address::from_low_u64(0x6A00 + i))
        .collect();
    for &channel in &channels {
        let ctx = sim.ctx(deployed);
        sim.engine
            .add_gauge(ctx, ADMIN, channel, type_id, MULTIPLIER)?;
    }
    let ctx = sim.ctx(deployed);
    sim.engine.toggle_allow_checkpoint_token(ctx, ADMIN)?;
    sim.engine
        .fee_token_mut()
        .mint(PAYER, tokens(args.weekly_fees).saturating_mul(Amount::from(args.weeks)))?;

    let start = GENESIS_WEEK + DAY;
    let mut users = Vec::new();
    for i in 0..args.users {
        let user = Address::from_low_u64(0x1000 + i);
        let locked = tokens(1_000 * (i + 1));
        let unlock_time = start + MAXTIME * (i % 4 + 1) / 4;
        let voted_for = channels[(i % args.channels) as usize];
        sim.engine.token_mut().transfer(ADMIN, user, locked)?;
        let ctx = sim.ctx(start);
        sim.engine.create_lock(ctx, user, locked, unlock_time)?;
        let ctx = sim.ctx(start);
        sim.engine
            .vote_for_gauge_weights(ctx, user, voted_for, 10_000)?;
        users.push(UserReport {
            user,
            locked,
            unlock_time,
            voted_for,
            minted: Amount::zero(),
            fees_claimed: Amount::zero(),
            withdrawn: Amount::zero(),
        });
    }

    let mut fees_deposited = Amount::zero();
    let end = start + args.weeks * WEEK;
    for week in 1..=args.weeks {
        let t = start + week * WEEK;
        let ctx = sim.ctx(t);
        sim.engine
            .deposit_fees(ctx, PAYER, tokens(args.weekly_fees))?;
        fees_deposited = fees_deposited.try_add(tokens(args.weekly_fees))?;
        sim.sync(t)?;
        if week % SETTLE_EVERY == 0 || week == args.weeks {
            settle(&mut sim, &mut users, &channels, t)?;
        }
    }

    let ctx = sim.ctx(end);
    for report in users.iter_mut() {
        if report.unlock_time <= end {
            report.withdrawn = sim.engine.withdraw(ctx, report.user)?;
        }
    }

    let engine = &sim.engine;
    let mut emitted = Amount::zero();
    let mut channel_reports = Vec::new();
    for &channel in &channels {
        let channel_emitted = engine
            .channel(&channel)
            .map(|ch| {
                ch.accountant()
                    .buckets()
                    .fold(Amount::zero(), |sum, (_, amount)| sum.saturating_add(amount))
            })
            .unwrap_or_default();
        emitted = emitted.try_add(channel_emitted)?;
        channel_reports.push(ChannelReport {
            channel,
            relative_weight: engine.gauge_relative_weight(&channel, end)?,
            emitted: channel_emitted,
        });
    }
    let minted = users
        .iter()
        .try_fold(Amount::zero(), |sum, u| sum.try_add(u.minted))?;
    let fees_claimed = users
        .iter()
        .try_fold(Amount::zero(), |sum, u| sum.try_add(u.fees_claimed))?;

    tracing::info!(weeks = args.weeks, rounds = sim.rounds, "simulation finished");
    Ok(SimulationReport {
        start,
        end,
        weeks: args.weeks,
        mining_epoch: engine.schedule().mining_epoch(),
        sync_rounds: sim.rounds,
        emitted,
        minted,
        fees_deposited,
        fees_claimed,
        fees_in_custody: engine.fee_token().balance_of(&FEE_ACCOUNT),
        channels: channel_reports,
        users,
    })
}

/// Every user mints on every channel and claims fees.
fn settle(
    sim: &mut Sim,
    users: &mut [UserReport],
    channels: &[Address],
    t: Timestamp,
) -> Result<()> {
    let ctx = sim.ctx(t);
    sim.engine.checkpoint_token(ctx, ADMIN)?;
    for report in users.iter_mut() {
        let ctx = sim.ctx(t);
        let minted = sim.engine.mint_many(ctx, report.user, channels)?;
        report.minted = report.minted.try_add(minted)?;
        let ctx = sim.ctx(t);
        let claimed = sim.engine.claim_fees(ctx, report.user)?;
        report.fees_claimed = report.fees_claimed.try_add(claimed)?;
    }
    Ok(())
}
