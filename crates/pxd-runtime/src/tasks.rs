//! Background jobs. Each `spawn_*` starts a tokio task and returns its
//! handle so the owner can abort it on shutdown.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::bus::Notification;
use crate::service::LedgerService;

/// Run [`LedgerService::sweep`] every `period`, starting immediately.
pub fn spawn_expiry_sweeper(service: LedgerService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep().await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    })
}

/// Every `period`, publish the commission report for the period just ended.
pub fn spawn_commission_report(service: LedgerService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let window = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::days(1));
        loop {
            ticker.tick().await;
            let to = service.now();
            service.publish_commission_report(to - window, to).await;
        }
    })
}

pub fn spawn_heartbeat(bus: broadcast::Sender<Notification>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let ts = Utc::now().timestamp_millis();
            let _ = bus.send(Notification::Heartbeat { ts_millis: ts });
        }
    })
}

/// Log every notification. Exits when the bus closes.
pub fn spawn_notification_logger(mut rx: broadcast::Receiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(n) => log_notification(&n),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "notification logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_notification(n: &Notification) {
    match n {
        Notification::Heartbeat { .. } => {}
        Notification::Ledger(rec) => match rec.event.trade() {
            Some(trade) => info!(seq = rec.seq, kind = rec.event.kind(), %trade, "ledger"),
            None => info!(seq = rec.seq, kind = rec.event.kind(), "ledger"),
        },
        Notification::LargeTrade {
            trade,
            buyer,
            seller,
            amount,
            ..
        } => {
            warn!(%trade, %buyer, %seller, %amount, "large trade opened");
        }
        Notification::CommissionReport(r) => {
            info!(
                from = %r.from,
                to = %r.to,
                trades = r.trades,
                volume = %r.volume,
                commission = %r.commission,
                "commission report"
            );
        }
        Notification::SweepCompleted { expired, raced, .. } => {
            if !expired.is_empty() || *raced > 0 {
                info!(expired = expired.len(), raced, "expiry sweep");
            }
        }
    }
}
