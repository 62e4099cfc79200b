use serde::{Deserialize, Serialize};

use crate::types::{Actor, Resolution, TradeId};

/// A transition requested on an existing trade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TradeAction {
    MarkPaid,
    ConfirmReceipt,
    Cancel,
    OpenDispute { reason: String },
    ResolveDispute { resolution: Resolution },
}

/// Input to [`TradeLedger::apply`](crate::TradeLedger::apply).
///
/// `expected_version` rejects the command with `StaleVersion` if the trade
/// changed since the caller last read it.  `idempotency_key` makes a retry of
/// the same command a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCommand {
    pub trade: TradeId,
    pub actor: Actor,
    #[serde(flatten)]
    pub action: TradeAction,
    #[serde(default)]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TradeCommand {
    pub fn new(trade: TradeId, actor: Actor, action: TradeAction) -> Self {
        Self {
            trade,
            actor,
            action,
            expected_version: None,
            idempotency_key: None,
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
