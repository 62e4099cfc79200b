//! Trade and offer state tables.
//!
//! # Trade
//!
//! ```text
//!   open ──► Pending ──pay──► Paid ──confirm──► Completed
//!              │  │            │  │                 │
//!         cancel  timeout  timeout dispute        dispute
//!              ▼  ▼            ▼  ▼                 ▼
//!            Cancelled ◄───────┘  Disputed ◄────────┘
//!                                   │
//!                                resolve ──► Completed
//! ```
//!
//! # Offer
//!
//! ```text
//!   Active ──match──► Matched ──release(reopen)──► Active
//!     │                  │
//!   close          release(exhausted)
//!     ▼                  ▼
//!   Closed ◄─────────────┘
//! ```
//!
//! Both tables are pure functions of `(status, event)`.  Anything not listed
//! is a [`TransitionError`]; the ledger turns it into
//! [`LedgerError::InvalidState`](crate::LedgerError::InvalidState) before any
//! balance is touched.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TradeStatus / TradeEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Opened; waiting for the buyer to send fiat.
    Pending,
    /// Buyer reports fiat sent; waiting for the seller to confirm.
    Paid,
    /// Settled. **Terminal** unless disputed afterwards.
    Completed,
    /// Frozen until staff resolve it.
    Disputed,
    /// Escrow returned. **Terminal.**
    Cancelled,
}

impl TradeStatus {
    /// Pending or paid: escrow is still held for this trade.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeEvent {
    Pay,
    Confirm,
    Cancel,
    Timeout,
    Dispute,
    Resolve,
}

/// Next trade status for `event`, or the reason it is illegal.
pub fn next_trade_status(
    from: TradeStatus,
    event: TradeEvent,
) -> Result<TradeStatus, TransitionError<TradeStatus>> {
    use TradeEvent::*;
    use TradeStatus::*;

    let to = match (from, event) {
        (Pending, Pay) => Paid,
        (Paid, Confirm) => Completed,
        (Pending, Cancel) => Cancelled,
        (Pending | Paid, Timeout) => Cancelled,
        (Paid | Completed, Dispute) => Disputed,
        (Disputed, Resolve) => Completed,

        (from, ev) => {
            return Err(TransitionError {
                from,
                event: format!("{ev:?}"),
            })
        }
    };
    Ok(to)
}

// ---------------------------------------------------------------------------
// OfferStatus / OfferEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Active,
    /// A trade is open against this offer.
    Matched,
    /// **Terminal.**
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferEvent {
    Match,
    /// The open trade ended. `reopen` is false when the remainder is below
    /// the offer's minimum.
    Release { reopen: bool },
    Close,
}

pub fn next_offer_status(
    from: OfferStatus,
    event: OfferEvent,
) -> Result<OfferStatus, TransitionError<OfferStatus>> {
    use OfferEvent::*;
    use OfferStatus::*;

    let to = match (from, event) {
        (Active, Match) => Matched,
        (Matched, Release { reopen: true }) => Active,
        (Matched, Release { reopen: false }) => Closed,
        (Active, Close) => Closed,

        (from, ev) => {
            return Err(TransitionError {
                from,
                event: format!("{ev:?}"),
            })
        }
    };
    Ok(to)
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Names the record kind a status belongs to, for error messages.
pub trait StatusKind: std::fmt::Debug {
    const ENTITY: &'static str;
}

impl StatusKind for TradeStatus {
    const ENTITY: &'static str = "trade";
}

impl StatusKind for OfferStatus {
    const ENTITY: &'static str = "offer";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError<S> {
    pub from: S,
    pub event: String,
}

impl<S: StatusKind> std::fmt::Display for TransitionError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal {} transition: {:?} + {}",
            S::ENTITY,
            self.from,
            self.event
        )
    }
}

impl<S: StatusKind> std::error::Error for TransitionError<S> {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TRADE: [TradeStatus; 5] = [
        TradeStatus::Pending,
        TradeStatus::Paid,
        TradeStatus::Completed,
        TradeStatus::Disputed,
        TradeStatus::Cancelled,
    ];

    #[test]
    fn happy_path() {
        let s = next_trade_status(TradeStatus::Pending, TradeEvent::Pay).unwrap();
        let s = next_trade_status(s, TradeEvent::Confirm).unwrap();
        assert_eq!(s, TradeStatus::Completed);
    }

    #[test]
    fn confirm_requires_paid() {
        let err = next_trade_status(TradeStatus::Pending, TradeEvent::Confirm).unwrap_err();
        assert_eq!(err.from, TradeStatus::Pending);
        assert_eq!(err.event, "Confirm");
        assert_eq!(err.to_string(), "illegal trade transition: Pending + Confirm");
    }

    #[test]
    fn disputed_accepts_only_resolve() {
        for ev in [
            TradeEvent::Pay,
            TradeEvent::Confirm,
            TradeEvent::Cancel,
            TradeEvent::Timeout,
            TradeEvent::Dispute,
        ] {
            assert!(next_trade_status(TradeStatus::Disputed, ev).is_err(), "{ev:?}");
        }
        assert_eq!(
            next_trade_status(TradeStatus::Disputed, TradeEvent::Resolve),
            Ok(TradeStatus::Completed)
        );
    }

    #[test]
    fn timeout_only_from_open_states() {
        for s in ALL_TRADE {
            let r = next_trade_status(s, TradeEvent::Timeout);
            assert_eq!(r.is_ok(), s.is_open(), "{s:?}");
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        for ev in [
            TradeEvent::Pay,
            TradeEvent::Confirm,
            TradeEvent::Cancel,
            TradeEvent::Timeout,
            TradeEvent::Dispute,
            TradeEvent::Resolve,
        ] {
            assert!(next_trade_status(TradeStatus::Cancelled, ev).is_err());
        }
    }

    #[test]
    fn buyer_cancel_not_allowed_after_payment() {
        assert!(next_trade_status(TradeStatus::Paid, TradeEvent::Cancel).is_err());
    }

    #[test]
    fn offer_cycle() {
        let s = next_offer_status(OfferStatus::Active, OfferEvent::Match).unwrap();
        assert_eq!(s, OfferStatus::Matched);
        assert_eq!(
            next_offer_status(s, OfferEvent::Release { reopen: true }),
            Ok(OfferStatus::Active)
        );
        assert_eq!(
            next_offer_status(s, OfferEvent::Release { reopen: false }),
            Ok(OfferStatus::Closed)
        );
    }

    #[test]
    fn matched_offer_cannot_close_or_rematch() {
        assert!(next_offer_status(OfferStatus::Matched, OfferEvent::Close).is_err());
        let err = next_offer_status(OfferStatus::Matched, OfferEvent::Match).unwrap_err();
        assert_eq!(err.to_string(), "illegal offer transition: Matched + Match");
    }
}
