use chrono::{DateTime, Utc};

use crate::money::Micros;
use crate::state_machine::{StatusKind, TransitionError};
use crate::types::{AccountId, Actor, OfferId, TradeId};

/// Everything a ledger operation can refuse.
///
/// The ledger is never mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    NotFound { entity: &'static str, id: u64 },
    InvalidState {
        entity: &'static str,
        from: String,
        event: String,
    },
    Unauthorized { actor: Actor, action: &'static str },
    InsufficientFunds {
        account: AccountId,
        needed: Micros,
        available: Micros,
    },
    AmountOutOfLimits {
        amount: Micros,
        min: Micros,
        max: Micros,
    },
    TradingSuspended {
        account: AccountId,
        until: DateTime<Utc>,
    },
    StaleVersion {
        trade: TradeId,
        expected: u64,
        actual: u64,
    },
    InvalidOffer { reason: String },
    InvalidAmount { amount: Micros },
    InvalidResolution,
    SelfTrade { offer: OfferId },
    DisputeExists { trade: TradeId },
    DuplicateAccount { account: AccountId },
    KeyReused { key: String, trade: TradeId },
    InvalidMessage { reason: &'static str },
    Overflow,
}

impl LedgerError {
    /// Stable upper-case tag for logs and scripts.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AmountOutOfLimits { .. } => "AMOUNT_OUT_OF_LIMITS",
            Self::TradingSuspended { .. } => "TRADING_SUSPENDED",
            Self::StaleVersion { .. } => "STALE_VERSION",
            Self::InvalidOffer { .. } => "INVALID_OFFER",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InvalidResolution => "INVALID_RESOLUTION",
            Self::SelfTrade { .. } => "SELF_TRADE",
            Self::DisputeExists { .. } => "DISPUTE_EXISTS",
            Self::DuplicateAccount { .. } => "DUPLICATE_ACCOUNT",
            Self::KeyReused { .. } => "KEY_REUSED",
            Self::InvalidMessage { .. } => "INVALID_MESSAGE",
            Self::Overflow => "OVERFLOW",
        }
    }

    pub(crate) fn account_missing(id: AccountId) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.0,
        }
    }

    pub(crate) fn offer_missing(id: OfferId) -> Self {
        Self::NotFound {
            entity: "offer",
            id: id.0,
        }
    }

    pub(crate) fn trade_missing(id: TradeId) -> Self {
        Self::NotFound {
            entity: "trade",
            id: id.0,
        }
    }

    pub(crate) fn invalid_offer(reason: impl Into<String>) -> Self {
        Self::InvalidOffer {
            reason: reason.into(),
        }
    }
}

impl<S: StatusKind> From<TransitionError<S>> for LedgerError {
    fn from(e: TransitionError<S>) -> Self {
        Self::InvalidState {
            entity: S::ENTITY,
            from: format!("{:?}", e.from),
            event: e.event,
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} {id} not found"),
            Self::InvalidState {
                entity,
                from,
                event,
            } => write!(f, "invalid state: {entity} in {from} cannot accept {event}"),
            Self::Unauthorized { actor, action } => {
                write!(f, "unauthorized: {actor} may not {action}")
            }
            Self::InsufficientFunds {
                account,
                needed,
                available,
            } => write!(
                f,
                "insufficient funds: {account} needs {needed}, has {available}"
            ),
            Self::AmountOutOfLimits { amount, min, max } => {
                write!(f, "amount {amount} outside limits [{min}, {max}]")
            }
            Self::TradingSuspended { account, until } => {
                write!(f, "{account} is suspended until {}", until.to_rfc3339())
            }
            Self::StaleVersion {
                trade,
                expected,
                actual,
            } => write!(
                f,
                "stale version for {trade}: expected {expected}, found {actual}"
            ),
            Self::InvalidOffer { reason } => write!(f, "invalid offer: {reason}"),
            Self::InvalidAmount { amount } => write!(f, "amount must be positive, got {amount}"),
            Self::InvalidResolution => write!(f, "a dispute must be resolved for one side"),
            Self::SelfTrade { offer } => write!(f, "owner cannot trade against own {offer}"),
            Self::DisputeExists { trade } => write!(f, "{trade} already has a dispute"),
            Self::DuplicateAccount { account } => write!(f, "{account} already exists"),
            Self::KeyReused { key, trade } => {
                write!(f, "idempotency key {key:?} already used on {trade}")
            }
            Self::InvalidMessage { reason } => write!(f, "invalid message: {reason}"),
            Self::Overflow => write!(f, "arithmetic overflow"),
        }
    }
}

impl std::error::Error for LedgerError {}
