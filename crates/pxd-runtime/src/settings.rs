//! `DeskConfig` → runtime values.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use pxd_audit::AuditWriter;
use pxd_config::{DeskConfig, LedgerSection};
use pxd_ledger::{LedgerConfig, Micros};
use tracing::info;

use crate::clock::Clock;
use crate::service::LedgerService;

pub fn ledger_config(s: &LedgerSection) -> Result<LedgerConfig> {
    Ok(LedgerConfig {
        commission_bps: s.commission_bps,
        trade_timeout: secs(s.trade_timeout_secs, "ledger.trade_timeout_secs")?,
        cancel_limit: s.cancel_limit,
        suspension: secs(s.suspension_secs, "ledger.suspension_secs")?,
    })
}

/// Background job periods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobPeriods {
    pub sweep: StdDuration,
    pub report: StdDuration,
}

impl JobPeriods {
    pub fn from_desk(cfg: &DeskConfig) -> Self {
        Self {
            sweep: StdDuration::from_secs(cfg.runtime.sweep_interval_secs),
            report: StdDuration::from_secs(cfg.runtime.report_interval_secs),
        }
    }
}

/// Build the service described by `cfg`. An audit path resumes the existing
/// log if there is one.
pub fn service_from_desk(cfg: &DeskConfig, clock: Arc<dyn Clock>) -> Result<LedgerService> {
    let threshold = Micros::from_units(cfg.runtime.large_trade_threshold_units)
        .context("CONFIG_INVALID: runtime.large_trade_threshold_units out of range")?;
    let mut service = LedgerService::new(
        ledger_config(&cfg.ledger)?,
        clock,
        cfg.runtime.bus_capacity,
        threshold,
    );
    if let Some(path) = cfg.audit.path.as_deref() {
        let writer = AuditWriter::resume(path, cfg.audit.hash_chain)?;
        info!(path, seq = writer.seq(), "audit log open");
        service = service.with_audit(writer);
    }
    Ok(service)
}

fn secs(v: u64, key: &str) -> Result<Duration> {
    let s = i64::try_from(v).with_context(|| format!("CONFIG_INVALID: {key} out of range"))?;
    Duration::try_seconds(s).with_context(|| format!("CONFIG_INVALID: {key} out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ledger_defaults() {
        let cfg = ledger_config(&LedgerSection::default()).unwrap();
        assert_eq!(cfg, LedgerConfig::sane_defaults());
    }

    #[test]
    fn huge_timeout_rejected() {
        let s = LedgerSection {
            trade_timeout_secs: u64::MAX,
            ..LedgerSection::default()
        };
        assert!(ledger_config(&s).is_err());
    }
}
