//! Ledger events.
//!
//! Every successful mutation appends one or more [`LedgerRecord`]s to an
//! internal outbox.  Callers collect them with
//! [`TradeLedger::drain_events`](crate::TradeLedger::drain_events) and decide
//! where they go (notification bus, audit log).  A failed operation never
//! leaves records behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Micros;
use crate::types::{AccountId, Actor, OfferId, Resolution, Side, TradeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Inactivity timeout.
    Expired,
    /// Buyer backed out before paying.
    BuyerCancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AccountOpened {
        account: AccountId,
    },
    Deposited {
        account: AccountId,
        amount: Micros,
    },
    Withdrawn {
        account: AccountId,
        amount: Micros,
    },
    OfferPosted {
        offer: OfferId,
        owner: AccountId,
        side: Side,
        amount: Micros,
        price: Micros,
    },
    OfferClosed {
        offer: OfferId,
        released: Micros,
    },
    TradeOpened {
        trade: TradeId,
        offer: OfferId,
        buyer: AccountId,
        seller: AccountId,
        amount: Micros,
        fiat_value: Micros,
    },
    TradePaid {
        trade: TradeId,
    },
    TradeCompleted {
        trade: TradeId,
        buyer_credit: Micros,
        commission: Micros,
    },
    TradeCancelled {
        trade: TradeId,
        reason: CancelReason,
        charged_to: AccountId,
    },
    DisputeOpened {
        trade: TradeId,
        opened_by: Actor,
    },
    DisputeResolved {
        trade: TradeId,
        resolution: Resolution,
    },
    AccountSuspended {
        account: AccountId,
        until: DateTime<Utc>,
    },
    SuspensionLifted {
        account: AccountId,
    },
    MessagePosted {
        trade: TradeId,
        sender: Actor,
        text: String,
    },
}

impl LedgerEvent {
    /// Stable upper-case tag, used as the audit `event_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccountOpened { .. } => "ACCOUNT_OPENED",
            Self::Deposited { .. } => "DEPOSITED",
            Self::Withdrawn { .. } => "WITHDRAWN",
            Self::OfferPosted { .. } => "OFFER_POSTED",
            Self::OfferClosed { .. } => "OFFER_CLOSED",
            Self::TradeOpened { .. } => "TRADE_OPENED",
            Self::TradePaid { .. } => "TRADE_PAID",
            Self::TradeCompleted { .. } => "TRADE_COMPLETED",
            Self::TradeCancelled { .. } => "TRADE_CANCELLED",
            Self::DisputeOpened { .. } => "DISPUTE_OPENED",
            Self::DisputeResolved { .. } => "DISPUTE_RESOLVED",
            Self::AccountSuspended { .. } => "ACCOUNT_SUSPENDED",
            Self::SuspensionLifted { .. } => "SUSPENSION_LIFTED",
            Self::MessagePosted { .. } => "MESSAGE_POSTED",
        }
    }

    pub fn trade(&self) -> Option<TradeId> {
        match self {
            Self::TradeOpened { trade, .. }
            | Self::TradePaid { trade }
            | Self::TradeCompleted { trade, .. }
            | Self::TradeCancelled { trade, .. }
            | Self::DisputeOpened { trade, .. }
            | Self::DisputeResolved { trade, .. }
            | Self::MessagePosted { trade, .. } => Some(*trade),
            _ => None,
        }
    }
}

/// One outbox entry.  `seq` is gap-free and starts at 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: LedgerEvent,
}
