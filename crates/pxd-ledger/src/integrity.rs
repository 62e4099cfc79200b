//! Conservation and cross-record consistency checks.
//!
//! Expensive (full scan).  Meant for tests, the CLI `simulate` summary, and
//! the daemon's shutdown log.

use std::collections::BTreeMap;

use crate::ledger::TradeLedger;
use crate::money::Micros;
use crate::state_machine::{OfferStatus, TradeStatus};
use crate::types::{AccountId, Side};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    NegativeBalance { account: AccountId },
    /// Customer balances plus commission differ from net external funding.
    FundsNotConserved { expected: Micros, actual: Micros },
    /// An account's `held` differs from the reserves and escrow attributed
    /// to it.
    HeldMismatch {
        account: AccountId,
        held: Micros,
        attributed: Micros,
    },
    /// Offer/trade link out of step with statuses.
    DanglingLink { detail: String },
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeBalance { account } => write!(f, "{account} has a negative balance"),
            Self::FundsNotConserved { expected, actual } => {
                write!(f, "funds not conserved: expected {expected}, found {actual}")
            }
            Self::HeldMismatch {
                account,
                held,
                attributed,
            } => write!(f, "{account} holds {held} but {attributed} is attributed"),
            Self::DanglingLink { detail } => write!(f, "dangling link: {detail}"),
        }
    }
}

impl TradeLedger {
    pub fn integrity_violations(&self) -> Vec<IntegrityViolation> {
        let mut out = Vec::new();

        let mut customer = Micros::ZERO;
        for acct in self.accounts.values() {
            if !acct.available.is_non_negative() || !acct.held.is_non_negative() {
                out.push(IntegrityViolation::NegativeBalance { account: acct.id });
            }
            customer = customer.saturating_add(acct.total());
        }
        let actual = customer.saturating_add(self.commission_pool);
        if actual != self.net_funding {
            out.push(IntegrityViolation::FundsNotConserved {
                expected: self.net_funding,
                actual,
            });
        }

        let mut attributed: BTreeMap<AccountId, Micros> = BTreeMap::new();
        for offer in self.offers.values() {
            let live = matches!(offer.status, OfferStatus::Active | OfferStatus::Matched);
            if offer.side == Side::Sell && live {
                let e = attributed.entry(offer.owner).or_default();
                *e = e.saturating_add(offer.remaining);
            }
            match (offer.status, offer.open_trade) {
                (OfferStatus::Matched, Some(t)) => {
                    let ok = self
                        .trades
                        .get(&t)
                        .is_some_and(|tr| tr.escrow.is_positive() && tr.offer == offer.id);
                    if !ok {
                        out.push(IntegrityViolation::DanglingLink {
                            detail: format!("{} points at {t} which holds no escrow", offer.id),
                        });
                    }
                }
                (OfferStatus::Matched, None) => out.push(IntegrityViolation::DanglingLink {
                    detail: format!("{} is matched without a trade", offer.id),
                }),
                (_, Some(t)) => out.push(IntegrityViolation::DanglingLink {
                    detail: format!("{} is {:?} but still linked to {t}", offer.id, offer.status),
                }),
                (_, None) => {}
            }
        }
        for trade in self.trades.values() {
            let e = attributed.entry(trade.seller).or_default();
            *e = e.saturating_add(trade.escrow);

            let escrow_expected = trade.status.is_open()
                || (trade.status == TradeStatus::Disputed
                    && self
                        .disputes
                        .get(&trade.id)
                        .is_some_and(|d| d.interrupted == TradeStatus::Paid));
            if escrow_expected != trade.escrow.is_positive() {
                out.push(IntegrityViolation::DanglingLink {
                    detail: format!(
                        "{} is {:?} with escrow {}",
                        trade.id, trade.status, trade.escrow
                    ),
                });
            }
        }
        for acct in self.accounts.values() {
            let want = attributed.get(&acct.id).copied().unwrap_or_default();
            if want != acct.held {
                out.push(IntegrityViolation::HeldMismatch {
                    account: acct.id,
                    held: acct.held,
                    attributed: want,
                });
            }
        }

        out
    }

    /// `true` when [`integrity_violations`](Self::integrity_violations) is
    /// empty.
    pub fn verify_integrity(&self) -> bool {
        self.integrity_violations().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Micros;
    use crate::types::{Actor, CurrencyPair, NewOffer};
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_ledger_is_consistent() {
        assert!(TradeLedger::default().verify_integrity());
    }

    #[test]
    fn sell_offer_reserve_is_attributed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let mut l = TradeLedger::default();
        l.open_account(AccountId(1), now).unwrap();
        l.open_account(AccountId(2), now).unwrap();
        l.deposit(AccountId(1), Micros::new(50_000_000), now).unwrap();
        let offer = l
            .post_offer(
                NewOffer {
                    owner: AccountId(1),
                    side: Side::Sell,
                    pair: CurrencyPair::new("USDT", "EUR"),
                    price: Micros::new(920_000),
                    amount: Micros::new(40_000_000),
                    min_limit: Micros::new(1_000_000),
                    max_limit: Micros::new(40_000_000),
                    payment_methods: vec!["sepa".into()],
                },
                now,
            )
            .unwrap();
        assert!(l.verify_integrity());

        l.open_trade(offer, AccountId(2), Micros::new(10_000_000), now)
            .unwrap();
        assert!(l.verify_integrity(), "{:?}", l.integrity_violations());

        l.close_offer(offer, Actor::Staff, now).unwrap_err();
        assert!(l.verify_integrity());
    }
}
