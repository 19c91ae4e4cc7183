//! Integration tests for emission distribution.
//!
//! These run the whole engine: locks in the escrow, a channel in the
//! controller, emission from the schedule, and per-user credit and minting
//! through the gateway. The focus is on exactness: credit must not depend on
//! how often, or how late, anyone calls the catch-up loops.

use velock_contracts::{Engine, ErrorKind};
use velock_protocol::config::{DAY, MAXTIME, MULTIPLIER, WEEK, YEAR};
use velock_protocol::{
    Address, Amount, BlockContext, CatchUpLimits, FixedMath, InflationParams, Timestamp,
};

const ADMIN: Address = Address::from_low_u64(0xAD);
const ALICE: Address = Address::from_low_u64(0xA);
const BOB: Address = Address::from_low_u64(0xB);
const GAUGE: Address = Address::from_low_u64(0x6A);

/// Inflation epoch 0 starts exactly here.
const W0: Timestamp = 2_810 * WEEK;

fn e18(n: u64) -> Amount {
    Amount::from(n) * Amount::exp10(18)
}

/// One block every 12 seconds.
fn ctx(t: Timestamp) -> BlockContext {
    BlockContext::new(t, t / 12)
}

/// Engine deployed one inflation delay before `W0`, with one channel that
/// carries all the weight from `W0` on.
fn deploy() -> Engine {
    let params = InflationParams::default();
    let deployed = W0 - params.inflation_delay;
    let mut engine = Engine::new(ADMIN, ctx(deployed), params, CatchUpLimits::default()).unwrap();
    engine
        .add_type(ctx(deployed), ADMIN, "liquidity", MULTIPLIER)
        .unwrap();
    engine
        .add_gauge(ctx(deployed), ADMIN, GAUGE, 0, MULTIPLIER)
        .unwrap();
    for user in [ALICE, BOB] {
        engine.token_mut().transfer(ADMIN, user, e18(100)).unwrap();
    }
    engine
}

fn sync_all(engine: &mut Engine, t: Timestamp) -> u32 {
    let mut rounds = 1;
    while !engine.sync(ctx(t)).unwrap().caught_up() {
        rounds += 1;
        assert!(rounds < 1_000, "sync does not converge");
    }
    rounds
}

fn settle(engine: &mut Engine, user: Address, t: Timestamp) {
    while !engine.user_checkpoint(ctx(t), user, GAUGE, user).unwrap().caught_up {}
}

fn credit(engine: &Engine, user: Address) -> Amount {
    engine.integrate_fraction(&GAUGE, &user).unwrap()
}

// ---------------------------------------------------------------------------
// Exact attribution
// ---------------------------------------------------------------------------

/// Alice locks 4 tokens for four years and Bob 5 for two, both at `lock_at`,
/// then everything is synced and settled 52 weeks after `W0`.
fn year_of_two_lockers(lock_at: Timestamp) -> (Engine, Timestamp) {
    let mut engine = deploy();
    engine
        .create_lock(ctx(lock_at), ALICE, e18(4), lock_at + MAXTIME)
        .unwrap();
    engine
        .create_lock(ctx(lock_at), BOB, e18(5), lock_at + 2 * YEAR)
        .unwrap();

    let now = W0 + 52 * WEEK;
    sync_all(&mut engine, now);
    settle(&mut engine, ALICE, now);
    settle(&mut engine, BOB, now);
    (engine, now)
}

/// Weeks with both emission and voting power behind them.
fn attributable_weeks(engine: &Engine) -> Vec<Timestamp> {
    let acc = engine.channel(&GAUGE).unwrap().accountant();
    let mut weeks = Vec::new();
    let mut week = acc.start_time();
    while week < acc.claimable_until() {
        if !acc.tokens_per_week(week).is_zero() && !acc.ve_supply(week).is_zero() {
            weeks.push(week);
        }
        week += WEEK;
    }
    weeks
}

/// Each user's credit is the sum of their weekly shares, to the unit.
fn assert_exact_credit(engine: &Engine, weeks: &[Timestamp]) {
    let acc = engine.channel(&GAUGE).unwrap().accountant();
    for user in [ALICE, BOB] {
        let expected = weeks.iter().fold(Amount::zero(), |sum, &week| {
            let share = acc
                .ve_for_at(engine.escrow(), &user, week)
                .mul_div(acc.tokens_per_week(week), acc.ve_supply(week))
                .unwrap();
            sum + share
        });
        assert_eq!(credit(engine, user), expected);
    }
}

fn emitted_over(engine: &Engine, weeks: &[Timestamp]) -> Amount {
    let acc = engine.channel(&GAUGE).unwrap().accountant();
    weeks
        .iter()
        .fold(Amount::zero(), |sum, &week| sum + acc.tokens_per_week(week))
}

#[test]
fn locks_at_the_epoch_boundary_earn_from_its_first_week() {
    let (engine, now) = year_of_two_lockers(W0);
    let acc = engine.channel(&GAUGE).unwrap().accountant();

    // The channel opened in the deployment week, one week before W0.
    assert_eq!(acc.start_time(), W0 - WEEK);
    assert_eq!(acc.tokens_per_week(W0 - WEEK), Amount::zero());
    assert_eq!(acc.token_time_cursor(), now);
    assert_eq!(acc.time_cursor_of(&ALICE), now);
    assert_eq!(acc.time_cursor_of(&BOB), now);

    // Locks stamped at W0 are already in W0's supply snapshot.
    assert!(!acc.ve_supply(W0).is_zero());
    let weeks = attributable_weeks(&engine);
    assert_eq!(weeks.len(), 52);
    assert_eq!(weeks[0], W0);
    assert_exact_credit(&engine, &weeks);

    let rate = InflationParams::default().initial_rate;
    let elapsed = acc.token_time_cursor() - acc.start_time() - WEEK;
    assert_eq!(emitted_over(&engine, &weeks), rate * Amount::from(elapsed));

    let credited = credit(&engine, ALICE) + credit(&engine, BOB);
    let emitted = emitted_over(&engine, &weeks);
    assert!(credited <= emitted);
    assert!(emitted - credited <= Amount::from(2u64 * 52));

    // Four tokens for four years outweigh five for two.
    assert!(credit(&engine, ALICE) > credit(&engine, BOB));
}

#[test]
fn locks_in_the_first_block_after_the_boundary_skip_its_week() {
    let (engine, now) = year_of_two_lockers(W0 + 12);
    let acc = engine.channel(&GAUGE).unwrap().accountant();
    assert_eq!(acc.start_time(), W0 - WEEK);
    assert_eq!(acc.token_time_cursor(), now);

    // W0 is emitted into but nobody held power at its first second.
    assert!(!acc.tokens_per_week(W0).is_zero());
    assert_eq!(acc.ve_supply(W0), Amount::zero());
    let weeks = attributable_weeks(&engine);
    assert_eq!(weeks.len(), 51);
    assert_eq!(weeks[0], W0 + WEEK);
    assert_exact_credit(&engine, &weeks);

    let rate = InflationParams::default().initial_rate;
    let elapsed = acc.token_time_cursor() - acc.start_time() - 2 * WEEK;
    assert_eq!(emitted_over(&engine, &weeks), rate * Amount::from(elapsed));

    let credited = credit(&engine, ALICE) + credit(&engine, BOB);
    let emitted = emitted_over(&engine, &weeks);
    assert!(credited <= emitted);
    assert!(emitted - credited <= Amount::from(2u64 * 51));
}

#[test]
fn minting_pays_credit_exactly_once() {
    let mut engine = deploy();
    let start = W0 + DAY;
    engine
        .create_lock(ctx(start), ALICE, e18(10), start + MAXTIME)
        .unwrap();

    let now = W0 + 6 * WEEK;
    sync_all(&mut engine, now);
    let before = engine.token().balance_of(&ALICE);
    let paid = engine.mint(ctx(now), ALICE, GAUGE).unwrap();

    assert!(!paid.is_zero());
    assert_eq!(paid, credit(&engine, ALICE));
    assert_eq!(engine.minted(&ALICE, &GAUGE), paid);
    assert_eq!(engine.token().balance_of(&ALICE), before + paid);

    assert_eq!(engine.mint(ctx(now), ALICE, GAUGE).unwrap(), Amount::zero());
    assert_eq!(engine.token().balance_of(&ALICE), before + paid);

    // The next week's credit is minted on top, not instead.
    let later = now + WEEK;
    sync_all(&mut engine, later);
    let more = engine.mint(ctx(later), ALICE, GAUGE).unwrap();
    assert_eq!(engine.minted(&ALICE, &GAUGE), paid + more);
    assert_eq!(engine.minted(&ALICE, &GAUGE), credit(&engine, ALICE));
}

#[test]
fn unregistered_channel_cannot_mint() {
    let mut engine = deploy();
    let err = engine
        .mint(ctx(W0 + WEEK), ALICE, Address::from_low_u64(0xBAD))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

// ---------------------------------------------------------------------------
// Cadence independence
// ---------------------------------------------------------------------------

#[test]
fn daily_and_sparse_checkpoints_agree() {
    let mut base = deploy();
    let start = W0 + 3 * DAY;
    base.create_lock(ctx(start), ALICE, e18(10), start + MAXTIME)
        .unwrap();
    base.create_lock(ctx(start), BOB, e18(7), start + YEAR)
        .unwrap();

    let mut daily = base.clone();
    let mut sparse = base;
    for day in 1..=100 {
        let t = start + day * DAY;
        if day == 30 {
            daily.increase_amount(ctx(t), BOB, e18(3)).unwrap();
            sparse.increase_amount(ctx(t), BOB, e18(3)).unwrap();
        }
        sync_all(&mut daily, t);
        settle(&mut daily, ALICE, t);
        if day % 50 == 0 {
            sync_all(&mut sparse, t);
            settle(&mut sparse, ALICE, t);
        }
    }

    assert!(!credit(&daily, ALICE).is_zero());
    assert_eq!(credit(&daily, ALICE), credit(&sparse, ALICE));
    let daily_acc = daily.channel(&GAUGE).unwrap().accountant();
    let sparse_acc = sparse.channel(&GAUGE).unwrap().accountant();
    assert_eq!(
        daily_acc.buckets().collect::<Vec<_>>(),
        sparse_acc.buckets().collect::<Vec<_>>()
    );
}

#[test]
fn long_idle_catch_up_matches_weekly_upkeep() {
    let mut base = deploy();
    let start = W0 + DAY;
    base.create_lock(ctx(start), ALICE, e18(4), start + MAXTIME)
        .unwrap();
    base.create_lock(ctx(start), BOB, e18(5), start + 2 * YEAR)
        .unwrap();

    let mut weekly = base.clone();
    let mut idle = base;
    let end = start + 500 * WEEK;

    for k in 1..=500 {
        let t = start + k * WEEK;
        sync_all(&mut weekly, t);
        settle(&mut weekly, ALICE, t);
        settle(&mut weekly, BOB, t);
    }

    let limits = CatchUpLimits::default();
    let rounds = sync_all(&mut idle, end);
    assert!(rounds >= 500 / limits.token_weeks);
    settle(&mut idle, ALICE, end);
    settle(&mut idle, BOB, end);

    for user in [ALICE, BOB] {
        assert!(!credit(&weekly, user).is_zero());
        assert_eq!(credit(&weekly, user), credit(&idle, user));
    }
    let weekly_acc = weekly.channel(&GAUGE).unwrap().accountant();
    let idle_acc = idle.channel(&GAUGE).unwrap().accountant();
    assert_eq!(
        weekly_acc.buckets().collect::<Vec<_>>(),
        idle_acc.buckets().collect::<Vec<_>>()
    );
    for k in 0..500 {
        let week = W0 + k * WEEK;
        assert_eq!(weekly_acc.ve_supply(week), idle_acc.ve_supply(week));
    }
    assert_eq!(weekly.schedule().mining_epoch(), idle.schedule().mining_epoch());
}

#[test]
fn repeated_sync_is_a_no_op() {
    let mut engine = deploy();
    engine
        .create_lock(ctx(W0 + DAY), ALICE, e18(1), W0 + YEAR)
        .unwrap();
    let now = W0 + 10 * WEEK + 5;
    sync_all(&mut engine, now);

    let points = engine.escrow().global_points().to_vec();
    let buckets: Vec<_> = engine.channel(&GAUGE).unwrap().accountant().buckets().collect();
    let report = engine.sync(ctx(now)).unwrap();
    assert!(report.caught_up());
    assert_eq!(report.escrow.steps, 0);
    assert_eq!(engine.escrow().global_points(), points.as_slice());
    assert_eq!(
        engine.channel(&GAUGE).unwrap().accountant().buckets().collect::<Vec<_>>(),
        buckets
    );
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

#[test]
fn sole_channel_has_full_relative_weight() {
    let params = InflationParams::default();
    let mut engine = Engine::new(ADMIN, ctx(W0), params, CatchUpLimits::default()).unwrap();
    let gauge_weight = e18(2);
    let type_weight = e18(3);
    engine
        .add_type(ctx(W0), ADMIN, "liquidity", type_weight)
        .unwrap();
    engine
        .add_gauge(ctx(W0), ADMIN, GAUGE, 0, gauge_weight)
        .unwrap();

    assert_eq!(
        engine.controller().get_total_weight(),
        gauge_weight * type_weight
    );
    for t in [W0 + WEEK, W0 + 9 * WEEK + 17, W0 + 3 * YEAR] {
        assert_eq!(engine.gauge_relative_weight(&GAUGE, t).unwrap(), MULTIPLIER);
    }
}
