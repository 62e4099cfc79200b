//! Disputes freeze a trade until staff decide it.
//!
//! GREEN when:
//! - A dispute can only be opened on a paid or completed trade, once.
//! - While disputed, neither party can move the trade and expiry skips it.
//! - Only staff resolve, and only for one side.
//! - Each (interrupted status, favored side) pair moves funds as documented
//!   and conserves funds including the commission pool.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pxd_ledger::*;

const SELLER: AccountId = AccountId(1);
const BUYER: AccountId = AccountId(2);
const OTHER: AccountId = AccountId(3);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 5, 11, 0, 0).unwrap()
}

fn units(n: i64) -> Micros {
    Micros::from_units(n).unwrap()
}

fn total(l: &TradeLedger) -> Micros {
    l.accounts().map(Account::total).sum::<Micros>() + l.commission_pool()
}

fn paid_trade() -> (TradeLedger, OfferId, TradeId) {
    let mut l = TradeLedger::default();
    for id in [SELLER, BUYER, OTHER] {
        l.open_account(id, t0()).unwrap();
    }
    l.deposit(SELLER, units(100), t0()).unwrap();
    let offer = l
        .post_offer(
            NewOffer {
                owner: SELLER,
                side: Side::Sell,
                pair: CurrencyPair::new("USDT", "TRY"),
                price: units(34),
                amount: units(100),
                min_limit: units(10),
                max_limit: units(100),
                payment_methods: vec!["havale".into()],
            },
            t0(),
        )
        .unwrap();
    let trade = l.open_trade(offer, BUYER, units(40), t0()).unwrap();
    l.mark_paid(trade, Actor::User(BUYER), t0()).unwrap();
    (l, offer, trade)
}

fn completed_trade() -> (TradeLedger, OfferId, TradeId) {
    let (mut l, offer, trade) = paid_trade();
    l.confirm_receipt(trade, Actor::User(SELLER), t0()).unwrap();
    (l, offer, trade)
}

#[test]
fn dispute_requires_paid_or_completed() {
    let mut l = TradeLedger::default();
    l.open_account(SELLER, t0()).unwrap();
    l.open_account(BUYER, t0()).unwrap();
    l.deposit(SELLER, units(20), t0()).unwrap();
    let offer = l
        .post_offer(
            NewOffer {
                owner: SELLER,
                side: Side::Sell,
                pair: CurrencyPair::new("USDT", "TRY"),
                price: units(34),
                amount: units(20),
                min_limit: units(1),
                max_limit: units(20),
                payment_methods: vec![],
            },
            t0(),
        )
        .unwrap();
    let trade = l.open_trade(offer, BUYER, units(5), t0()).unwrap();

    let err = l
        .open_dispute(trade, Actor::User(BUYER), "changed my mind", t0())
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState { entity: "trade", .. }));
    assert!(l.dispute(trade).is_none());
}

#[test]
fn disputed_trade_is_frozen() {
    let (mut l, _, trade) = paid_trade();

    let err = l
        .open_dispute(trade, Actor::User(OTHER), "spam", t0())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));

    l.open_dispute(trade, Actor::User(SELLER), "fiat never arrived", t0())
        .unwrap();
    let d = l.dispute(trade).unwrap();
    assert!(d.is_open());
    assert_eq!(d.interrupted, TradeStatus::Paid);
    assert_eq!(d.opened_by, Actor::User(SELLER));

    let err = l
        .confirm_receipt(trade, Actor::User(SELLER), t0())
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState { .. }));
    let err = l
        .open_dispute(trade, Actor::User(BUYER), "me too", t0())
        .unwrap_err();
    assert_eq!(err, LedgerError::DisputeExists { trade });

    assert!(l.expire_stale(t0() + Duration::days(1)).unwrap().is_empty());
    assert!(l.verify_integrity(), "{:?}", l.integrity_violations());
}

#[test]
fn only_staff_resolve_and_only_for_a_side() {
    let (mut l, _, trade) = paid_trade();
    l.open_dispute(trade, Actor::User(BUYER), "seller silent", t0())
        .unwrap();

    let err = l
        .resolve_dispute(trade, Resolution::FavorBuyer, Actor::User(BUYER), t0())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));

    let err = l
        .resolve_dispute(trade, Resolution::None, Actor::Staff, t0())
        .unwrap_err();
    assert_eq!(err, LedgerError::InvalidResolution);
    assert_eq!(l.trade(trade).unwrap().status, TradeStatus::Disputed);
}

#[test]
fn paid_favor_buyer_settles() {
    let (mut l, offer, trade) = paid_trade();
    let before = total(&l);
    l.open_dispute(trade, Actor::User(BUYER), "seller silent", t0())
        .unwrap();
    l.resolve_dispute(trade, Resolution::FavorBuyer, Actor::Staff, t0() + Duration::hours(2))
        .unwrap();

    let t = l.trade(trade).unwrap();
    assert_eq!(t.status, TradeStatus::Completed);
    assert_eq!(t.commission, Micros::new(200_000));
    assert_eq!(l.account(BUYER).unwrap().available, Micros::new(39_800_000));
    assert_eq!(l.account(SELLER).unwrap().held, units(60));
    assert_eq!(l.offer(offer).unwrap().status, OfferStatus::Active);

    let d = l.dispute(trade).unwrap();
    assert_eq!(d.resolution, Resolution::FavorBuyer);
    assert_eq!(d.resolved_at, Some(t0() + Duration::hours(2)));

    assert_eq!(total(&l), before);
    assert!(l.verify_integrity(), "{:?}", l.integrity_violations());
}

#[test]
fn paid_favor_seller_returns_escrow() {
    let (mut l, offer, trade) = paid_trade();
    l.open_dispute(trade, Actor::User(SELLER), "chargeback", t0())
        .unwrap();
    l.resolve_dispute(trade, Resolution::FavorSeller, Actor::Staff, t0())
        .unwrap();

    let t = l.trade(trade).unwrap();
    assert_eq!(t.status, TradeStatus::Completed);
    assert_eq!(t.escrow, Micros::ZERO);
    assert_eq!(t.settled_at, None);
    assert_eq!(l.account(BUYER).unwrap().available, Micros::ZERO);
    assert_eq!(l.offer(offer).unwrap().remaining, units(100));
    assert_eq!(l.account(SELLER).unwrap().held, units(100));
    assert_eq!(l.commission_pool(), Micros::ZERO);
    assert_eq!(l.account(BUYER).unwrap().completed_trades, 0);
    assert_eq!(l.snapshot().completed_trades, 0, "nothing settled");
    assert!(l.verify_integrity(), "{:?}", l.integrity_violations());
}

#[test]
fn completed_favor_buyer_moves_nothing() {
    let (mut l, _, trade) = completed_trade();
    let buyer_before = l.account(BUYER).unwrap().clone();
    l.open_dispute(trade, Actor::User(BUYER), "receipt", t0()).unwrap();
    l.resolve_dispute(trade, Resolution::FavorBuyer, Actor::Staff, t0())
        .unwrap();
    assert_eq!(l.account(BUYER).unwrap(), &buyer_before);
    assert_eq!(l.commission_pool(), Micros::new(200_000));
    assert_eq!(l.snapshot().completed_trades, 1);
}

#[test]
fn completed_favor_seller_reverses_settlement() {
    let (mut l, _, trade) = completed_trade();
    let before = total(&l);
    l.open_dispute(trade, Actor::User(SELLER), "fraudulent payment", t0())
        .unwrap();
    l.resolve_dispute(trade, Resolution::FavorSeller, Actor::Staff, t0())
        .unwrap();

    assert_eq!(l.account(BUYER).unwrap().available, Micros::ZERO);
    assert_eq!(l.account(SELLER).unwrap().available, units(40));
    assert_eq!(l.commission_pool(), Micros::ZERO);
    let t = l.trade(trade).unwrap();
    assert_eq!(t.commission, Micros::ZERO);
    assert_eq!(t.settled_at, None);
    assert_eq!(l.commission_report(t0(), t0() + Duration::days(1)).trades, 0);

    assert_eq!(total(&l), before);
    assert!(l.verify_integrity(), "{:?}", l.integrity_violations());
}

#[test]
fn reversal_fails_when_buyer_already_withdrew() {
    let (mut l, _, trade) = completed_trade();
    l.withdraw(BUYER, units(39), t0()).unwrap();
    l.open_dispute(trade, Actor::Staff, "bank recall", t0()).unwrap();
    l.drain_events();

    let err = l
        .resolve_dispute(trade, Resolution::FavorSeller, Actor::Staff, t0())
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { account: BUYER, .. }));
    assert_eq!(l.trade(trade).unwrap().status, TradeStatus::Disputed);
    assert!(l.dispute(trade).unwrap().is_open());
    assert!(l.drain_events().is_empty());
    assert!(l.verify_integrity());
}
