//! Notification bus payloads.

use chrono::{DateTime, Utc};
use pxd_ledger::{AccountId, CommissionReport, LedgerRecord, Micros, TradeId};
use serde::{Deserialize, Serialize};

/// Everything the service announces. Subscribers (logger, CLI, tests) get a
/// copy of each message over a `tokio::sync::broadcast` channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Heartbeat {
        ts_millis: i64,
    },
    /// A committed ledger event, in `seq` order.
    Ledger(LedgerRecord),
    /// An opened trade at or above the configured threshold.
    LargeTrade {
        trade: TradeId,
        buyer: AccountId,
        seller: AccountId,
        amount: Micros,
        at: DateTime<Utc>,
    },
    CommissionReport(CommissionReport),
    SweepCompleted {
        at: DateTime<Utc>,
        expired: Vec<TradeId>,
        /// Candidates skipped because they changed between read and write.
        raced: usize,
    },
}
