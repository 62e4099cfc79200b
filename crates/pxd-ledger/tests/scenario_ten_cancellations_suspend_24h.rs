//! Cancellation penalty.
//!
//! GREEN when:
//! - Nine cancellations leave the account free to trade.
//! - The tenth suspends it until exactly 24 hours after that cancellation.
//! - Opening a trade one second before the end fails with TradingSuspended;
//!   at the end it succeeds.
//! - Expiries and buyer cancellations count toward the same total.
//! - Staff can lift or impose a suspension.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pxd_ledger::*;

const OWNER: AccountId = AccountId(1);
const FLAKY: AccountId = AccountId(2);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 4, 0, 0, 0).unwrap()
}

fn units(n: i64) -> Micros {
    Micros::from_units(n).unwrap()
}

fn setup() -> (TradeLedger, OfferId) {
    let mut l = TradeLedger::default();
    l.open_account(OWNER, t0()).unwrap();
    l.open_account(FLAKY, t0()).unwrap();
    l.deposit(OWNER, units(1_000), t0()).unwrap();
    let offer = l
        .post_offer(
            NewOffer {
                owner: OWNER,
                side: Side::Sell,
                pair: CurrencyPair::new("USDC", "BRL"),
                price: Micros::new(5_100_000),
                amount: units(1_000),
                min_limit: units(10),
                max_limit: units(100),
                payment_methods: vec!["pix".into()],
            },
            t0(),
        )
        .unwrap();
    (l, offer)
}

#[test]
fn tenth_cancellation_suspends_for_exactly_24h() {
    let (mut l, offer) = setup();

    for i in 1..=9 {
        let at = t0() + Duration::minutes(i);
        let trade = l.open_trade(offer, FLAKY, units(10), at).unwrap();
        l.cancel_trade(trade, Actor::User(FLAKY), at).unwrap();
        let acct = l.account(FLAKY).unwrap();
        assert_eq!(acct.cancellation_count, i as u32);
        assert!(!acct.is_suspended(at), "suspended after {i}");
    }

    let tenth = t0() + Duration::minutes(16);
    let trade = l.open_trade(offer, FLAKY, units(10), tenth).unwrap();
    l.cancel_trade(trade, Actor::User(FLAKY), tenth).unwrap();

    let acct = l.account(FLAKY).unwrap();
    assert_eq!(acct.cancellation_count, 10);
    assert_eq!(acct.suspended_until, Some(tenth + Duration::hours(24)));

    let almost = tenth + Duration::hours(24) - Duration::seconds(1);
    let err = l.open_trade(offer, FLAKY, units(10), almost).unwrap_err();
    assert_eq!(
        err,
        LedgerError::TradingSuspended {
            account: FLAKY,
            until: tenth + Duration::hours(24),
        }
    );

    l.open_trade(offer, FLAKY, units(10), tenth + Duration::hours(24))
        .unwrap();
    assert!(l.verify_integrity());
}

#[test]
fn expiries_count_toward_the_limit() {
    let (mut l, offer) = setup();
    let mut at = t0();
    for _ in 0..10 {
        l.open_trade(offer, FLAKY, units(20), at).unwrap();
        at = at + Duration::minutes(31);
        assert_eq!(l.expire_stale(at).unwrap().len(), 1);
    }
    let last_expiry = at;

    let acct = l.account(FLAKY).unwrap();
    assert_eq!(acct.cancellation_count, 10);
    assert_eq!(acct.suspended_until, Some(last_expiry + Duration::hours(24)));

    let kinds: Vec<&str> = l
        .drain_events()
        .iter()
        .map(|r| r.event.kind())
        .filter(|k| *k == "ACCOUNT_SUSPENDED")
        .collect();
    assert_eq!(kinds.len(), 1);
}

#[test]
fn suspended_owner_cannot_post() {
    let (mut l, _) = setup();
    let until = t0() + Duration::days(2);
    l.suspend_account(OWNER, until, Actor::Staff, t0()).unwrap();
    l.deposit(OWNER, units(5), t0()).unwrap();

    let err = l
        .post_offer(
            NewOffer {
                owner: OWNER,
                side: Side::Buy,
                pair: CurrencyPair::new("USDC", "BRL"),
                price: Micros::new(5_000_000),
                amount: units(5),
                min_limit: units(1),
                max_limit: units(5),
                payment_methods: vec![],
            },
            t0() + Duration::hours(1),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::TradingSuspended { .. }));
}

#[test]
fn trades_against_a_suspended_owner_are_refused() {
    let (mut l, offer) = setup();
    l.suspend_account(OWNER, t0() + Duration::hours(1), Actor::Staff, t0())
        .unwrap();
    let err = l.open_trade(offer, FLAKY, units(10), t0()).unwrap_err();
    assert!(matches!(err, LedgerError::TradingSuspended { account: OWNER, .. }));
}

#[test]
fn only_staff_suspends_and_lifts() {
    let (mut l, offer) = setup();
    let err = l
        .suspend_account(FLAKY, t0() + Duration::days(1), Actor::User(OWNER), t0())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));

    l.suspend_account(FLAKY, t0() + Duration::days(1), Actor::Staff, t0())
        .unwrap();
    assert!(l.open_trade(offer, FLAKY, units(10), t0()).is_err());

    assert!(l.lift_suspension(FLAKY, Actor::User(FLAKY), t0()).is_err());
    l.lift_suspension(FLAKY, Actor::Staff, t0()).unwrap();
    l.open_trade(offer, FLAKY, units(10), t0()).unwrap();
}
