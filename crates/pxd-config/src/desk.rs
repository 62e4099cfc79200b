//! Typed view of the merged configuration tree.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub commission_bps: u32,
    pub trade_timeout_secs: u64,
    pub cancel_limit: u32,
    pub suspension_secs: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            commission_bps: 50,
            trade_timeout_secs: 30 * 60,
            cancel_limit: 10,
            suspension_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub sweep_interval_secs: u64,
    /// Trades at or above this many whole crypto units raise an alert.
    pub large_trade_threshold_units: i64,
    pub bus_capacity: usize,
    pub report_interval_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5 * 60,
            large_trade_threshold_units: 10_000,
            bus_capacity: 1024,
            report_interval_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// JSONL file to append ledger events to. No path, no audit log.
    pub path: Option<String>,
    pub hash_chain: bool,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: None,
            hash_chain: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub ledger: LedgerSection,
    pub runtime: RuntimeSection,
    pub audit: AuditSection,
}

impl DeskConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: DeskConfig =
            serde_json::from_value(v.clone()).context("CONFIG_INVALID: wrong shape or type")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.commission_bps > 10_000 {
            bail!(
                "CONFIG_INVALID: ledger.commission_bps={} exceeds 10000",
                self.ledger.commission_bps
            );
        }
        if self.ledger.trade_timeout_secs == 0 {
            bail!("CONFIG_INVALID: ledger.trade_timeout_secs must be > 0");
        }
        if self.ledger.cancel_limit == 0 {
            bail!("CONFIG_INVALID: ledger.cancel_limit must be > 0");
        }
        if self.runtime.sweep_interval_secs == 0 {
            bail!("CONFIG_INVALID: runtime.sweep_interval_secs must be > 0");
        }
        if self.runtime.report_interval_secs == 0 {
            bail!("CONFIG_INVALID: runtime.report_interval_secs must be > 0");
        }
        if self.runtime.large_trade_threshold_units <= 0 {
            bail!("CONFIG_INVALID: runtime.large_trade_threshold_units must be > 0");
        }
        if self.runtime.bus_capacity == 0 {
            bail!("CONFIG_INVALID: runtime.bus_capacity must be > 0");
        }
        if matches!(self.audit.path.as_deref(), Some(p) if p.trim().is_empty()) {
            bail!("CONFIG_INVALID: audit.path is empty");
        }
        Ok(())
    }
}
