//! Integration tests for fee distribution.
//!
//! Fees are deposited at arbitrary times, split into weeks by elapsed time,
//! and claimed by lockers at whatever cadence they like. Every fee unit ends
//! up either paid out or as truncation dust in custody.

use velock_contracts::engine::FEE_ACCOUNT;
use velock_contracts::{Engine, ErrorKind};
use velock_protocol::config::{DAY, MAXTIME, WEEK, YEAR};
use velock_protocol::{Address, Amount, BlockContext, CatchUpLimits, InflationParams, Timestamp};

const ADMIN: Address = Address::from_low_u64(0xAD);
const ALICE: Address = Address::from_low_u64(0xA);
const BOB: Address = Address::from_low_u64(0xB);
const CAROL: Address = Address::from_low_u64(0xC);
const PAYER: Address = Address::from_low_u64(0xCA5);

const T0: Timestamp = 2_810 * WEEK;

fn e18(n: u64) -> Amount {
    Amount::from(n) * Amount::exp10(18)
}

fn ctx(t: Timestamp) -> BlockContext {
    BlockContext::new(t, t / 12)
}

/// Alice and Bob lock at `T0`; the payer holds plenty of fee tokens.
fn deploy() -> Engine {
    let mut engine = Engine::new(
        ADMIN,
        ctx(T0),
        InflationParams::default(),
        CatchUpLimits::default(),
    )
    .unwrap();
    for user in [ALICE, BOB] {
        engine.token_mut().transfer(ADMIN, user, e18(100)).unwrap();
    }
    engine.fee_token_mut().mint(PAYER, e18(10_000)).unwrap();
    engine
        .create_lock(ctx(T0), ALICE, e18(30), T0 + MAXTIME)
        .unwrap();
    engine
        .create_lock(ctx(T0), BOB, e18(20), T0 + 2 * YEAR)
        .unwrap();
    engine
}

fn fee_balance(engine: &Engine, user: &Address) -> Amount {
    engine.fee_token().balance_of(user)
}

#[test]
fn only_admin_checkpoints_token_until_opened() {
    let mut engine = deploy();
    let t = T0 + DAY;
    let err = engine.checkpoint_token(ctx(t), ALICE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    engine.checkpoint_token(ctx(t), ADMIN).unwrap();
    assert!(engine.toggle_allow_checkpoint_token(ctx(t), ADMIN).unwrap());
    engine.checkpoint_token(ctx(t), ALICE).unwrap();
}

#[test]
fn deposits_split_by_elapsed_time() {
    let mut engine = deploy();
    engine
        .deposit_fees(ctx(T0 + 3 * DAY), PAYER, e18(100))
        .unwrap();
    engine.checkpoint_token(ctx(T0 + 3 * DAY), ADMIN).unwrap();
    assert_eq!(engine.fees().accountant().tokens_per_week(T0), e18(100));

    // 70 over the next 14 days: 4 days left in week 0, all of week 1, 3 days of week 2.
    engine
        .deposit_fees(ctx(T0 + 10 * DAY), PAYER, e18(70))
        .unwrap();
    engine.checkpoint_token(ctx(T0 + 17 * DAY), ADMIN).unwrap();
    let acc = engine.fees().accountant();
    assert_eq!(acc.tokens_per_week(T0), e18(100) + e18(20));
    assert_eq!(acc.tokens_per_week(T0 + WEEK), e18(35));
    assert_eq!(acc.tokens_per_week(T0 + 2 * WEEK), e18(15));
    assert_eq!(acc.token_time_cursor(), T0 + 17 * DAY);
}

#[test]
fn claims_pay_pro_rata_and_conserve_fees() {
    let mut engine = deploy();
    assert!(engine.toggle_allow_checkpoint_token(ctx(T0), ADMIN).unwrap());

    let deposits = [(T0 + 2 * DAY, 100u64), (T0 + 9 * DAY, 55), (T0 + 23 * DAY, 31)];
    let mut deposited = Amount::zero();
    for (t, amount) in deposits {
        engine.deposit_fees(ctx(t), PAYER, e18(amount)).unwrap();
        deposited = deposited + e18(amount);
        // Alice claims often, Bob rarely.
        engine.claim_fees(ctx(t + DAY + 1), ALICE).unwrap();
    }

    let end = T0 + 6 * WEEK + 2 * DAY;
    engine.claim_fees(ctx(end), ALICE).unwrap();
    engine.claim_fees(ctx(end), BOB).unwrap();
    // A stranger with no lock gets nothing.
    assert_eq!(engine.claim_fees(ctx(end), CAROL).unwrap(), Amount::zero());

    let alice = fee_balance(&engine, &ALICE);
    let bob = fee_balance(&engine, &BOB);
    let dust = fee_balance(&engine, &FEE_ACCOUNT);
    assert_eq!(alice + bob + dust, deposited);
    assert!(dust <= Amount::from(2u64 * 6));
    assert!(alice > bob);

    assert_eq!(engine.fees().claimed(&ALICE), alice);
    assert_eq!(engine.fees().claimable(&ALICE), Amount::zero());
    assert_eq!(engine.fees().token_last_balance(), dust);
}

#[test]
fn claim_twice_pays_once() {
    let mut engine = deploy();
    engine
        .deposit_fees(ctx(T0 + DAY), PAYER, e18(42))
        .unwrap();
    engine.checkpoint_token(ctx(T0 + WEEK), ADMIN).unwrap();

    let t = T0 + WEEK + 1;
    let first = engine.claim_fees(ctx(t), ALICE).unwrap();
    assert!(!first.is_zero());
    assert_eq!(engine.claim_fees(ctx(t), ALICE).unwrap(), Amount::zero());
    assert_eq!(fee_balance(&engine, &ALICE), first);
}

#[test]
fn zero_deposit_rejected() {
    let mut engine = deploy();
    let err = engine
        .deposit_fees(ctx(T0 + 1), PAYER, Amount::zero())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
}
