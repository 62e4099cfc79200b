//! pxd-daemon entry point.
//!
//! Loads layered config, builds the ledger service and runs the background
//! jobs (expiry sweep, commission report, heartbeat, notification log) until
//! ctrl-c.
//!
//! Config paths come from `PXD_CONFIG` (comma separated, merge order),
//! defaulting to `config/desk.yaml`.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use pxd_config::{report_unused_keys, ConfigMode, UnusedKeyPolicy};
use pxd_runtime::{
    service_from_desk, spawn_commission_report, spawn_expiry_sweeper, spawn_heartbeat,
    spawn_notification_logger, JobPeriods, SystemClock,
};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config/desk.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let loaded = pxd_config::load_layered_yaml(paths.as_slice())?;
    let desk = loaded.desk()?;

    let unused = report_unused_keys(ConfigMode::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config keys not read by the daemon");
    }

    let service = service_from_desk(&desk, Arc::new(SystemClock))
        .context("daemon startup failed")?;
    info!(
        config_hash = %loaded.config_hash,
        stream_id = %service.stream_id(),
        commission_bps = desk.ledger.commission_bps,
        "pxd-daemon started"
    );

    let periods = JobPeriods::from_desk(&desk);
    let handles = vec![
        spawn_notification_logger(service.subscribe()),
        spawn_expiry_sweeper(service.clone(), periods.sweep),
        spawn_commission_report(service.clone(), periods.report),
        spawn_heartbeat(service.bus(), Duration::from_secs(1)),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl-c failed")?;

    for h in &handles {
        h.abort();
    }

    let snap = service.snapshot().await;
    let violations = service.integrity_violations().await;
    info!(
        accounts = snap.accounts,
        open_trades = snap.open_trades,
        open_disputes = snap.open_disputes,
        customer_funds = %snap.customer_funds,
        commission_pool = %snap.commission_pool,
        last_seq = snap.last_seq,
        violations = violations.len(),
        "pxd-daemon stopped"
    );

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn config_paths_from_env() -> Vec<String> {
    match std::env::var("PXD_CONFIG") {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => vec![DEFAULT_CONFIG.to_string()],
    }
}
