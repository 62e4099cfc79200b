use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::TradeLedger;
use crate::money::Micros;

/// Settlements in a time window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub trades: usize,
    pub volume: Micros,
    pub commission: Micros,
}

impl TradeLedger {
    /// Trades whose buyer was credited in `[from, to)`.
    pub fn commission_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> CommissionReport {
        let mut report = CommissionReport {
            from,
            to,
            trades: 0,
            volume: Micros::ZERO,
            commission: Micros::ZERO,
        };
        for t in self.trades.values() {
            let Some(at) = t.settled_at else { continue };
            if at < from || at >= to {
                continue;
            }
            report.trades += 1;
            report.volume = report.volume.saturating_add(t.amount);
            report.commission = report.commission.saturating_add(t.commission);
        }
        report
    }
}
