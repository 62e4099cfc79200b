//! Ledger policy: commission, inactivity timeout, cancellation penalty.

use chrono::{DateTime, Duration, Utc};

use crate::money::Micros;
use crate::LedgerError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Commission charged on the buyer's side of every settlement, in bps.
    pub commission_bps: u32,

    /// A pending/paid trade idle for strictly longer than this is expired.
    pub trade_timeout: Duration,

    /// Every `cancel_limit`-th cancellation suspends the account.
    pub cancel_limit: u32,

    /// How long a cancellation suspension lasts.
    pub suspension: Duration,
}

impl LedgerConfig {
    pub fn sane_defaults() -> Self {
        Self {
            commission_bps: 50,
            trade_timeout: Duration::minutes(30),
            cancel_limit: 10,
            suspension: Duration::hours(24),
        }
    }

    /// Split a settlement into `(buyer_credit, commission)`.
    pub fn split_settlement(&self, amount: Micros) -> Result<(Micros, Micros), LedgerError> {
        let commission = amount
            .checked_bps(self.commission_bps)
            .ok_or(LedgerError::Overflow)?;
        let credit = amount
            .checked_sub(commission)
            .ok_or(LedgerError::Overflow)?;
        Ok((credit, commission))
    }

    /// `true` once `now - last_action_at` exceeds the timeout.
    pub fn is_stale(&self, last_action_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_action_at > self.trade_timeout
    }

    /// Suspension end for an account whose cancellation count just became
    /// `count`, if that count trips the limit.
    pub fn suspension_for(&self, count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.cancel_limit == 0 || count == 0 || count % self.cancel_limit != 0 {
            return None;
        }
        Some(now + self.suspension)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::sane_defaults()
    }
}
