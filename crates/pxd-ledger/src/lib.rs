//! pxd-ledger
//!
//! Escrow ledger for a peer-to-peer exchange desk: accounts, offers, trades
//! and disputes, and every balance movement between them.
//!
//! - Pure and deterministic. Callers pass `now`; nothing here reads a clock,
//!   touches IO, or draws randomness.
//! - Fixed-point money ([`Micros`], 1e-6 scale).
//! - Trade and offer lifecycles are explicit tables in [`state_machine`].
//! - All-or-nothing writes: a returned [`LedgerError`] means nothing changed.
//! - Every committed change is recorded as a [`LedgerRecord`] for the caller
//!   to drain.

mod commands;
mod error;
mod events;
mod integrity;
mod ledger;
mod money;
mod policy;
mod report;
pub mod state_machine;
mod types;

pub use commands::{TradeAction, TradeCommand};
pub use error::LedgerError;
pub use events::{CancelReason, LedgerEvent, LedgerRecord};
pub use integrity::IntegrityViolation;
pub use ledger::{LedgerSnapshot, TradeLedger, MAX_MESSAGE_CHARS};
pub use money::{Micros, ParseMicrosError, BPS_DENOM, MICROS_PER_UNIT};
pub use policy::LedgerConfig;
pub use report::CommissionReport;
pub use state_machine::{OfferStatus, TradeStatus, TransitionError};
pub use types::{
    Account, AccountId, Actor, CurrencyPair, Dispute, NewOffer, Offer, OfferId, Resolution, Side,
    Trade, TradeId, TradeMessage,
};
