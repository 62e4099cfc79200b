//! Shared, async front for the ledger.
//!
//! One `tokio::sync::RwLock` guards the ledger. Every write takes the write
//! lock, stamps the operation with the service clock, drains the records it
//! produced and, still under the lock, appends them to the audit log and
//! publishes them on the bus. Subscribers therefore see events in `seq`
//! order, and the audit log matches it line for line.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pxd_audit::AuditWriter;
use pxd_ledger::{
    AccountId, Actor, CommissionReport, IntegrityViolation, LedgerConfig, LedgerError,
    LedgerEvent, LedgerRecord, LedgerSnapshot, Micros, NewOffer, OfferId, Resolution,
    TradeCommand, TradeId, TradeLedger, TradeMessage, TradeStatus,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, warn};
use uuid::Uuid;

use crate::bus::Notification;
use crate::clock::Clock;

/// Result of one expiry pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired: Vec<TradeId>,
    pub raced: usize,
}

#[derive(Clone)]
pub struct LedgerService {
    ledger: Arc<RwLock<TradeLedger>>,
    clock: Arc<dyn Clock>,
    bus: broadcast::Sender<Notification>,
    audit: Option<Arc<Mutex<AuditWriter>>>,
    stream_id: Uuid,
    large_trade_threshold: Micros,
}

impl LedgerService {
    pub fn new(
        cfg: LedgerConfig,
        clock: Arc<dyn Clock>,
        bus_capacity: usize,
        large_trade_threshold: Micros,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<Notification>(bus_capacity.max(1));
        Self {
            ledger: Arc::new(RwLock::new(TradeLedger::new(cfg))),
            clock,
            bus,
            audit: None,
            stream_id: Uuid::new_v4(),
            large_trade_threshold,
        }
    }

    /// Append every ledger event to `writer` from now on.
    pub fn with_audit(mut self, writer: AuditWriter) -> Self {
        self.audit = Some(Arc::new(Mutex::new(writer)));
        self
    }

    /// Fixed stream id for the audit log (default is random per process).
    pub fn with_stream_id(mut self, stream_id: Uuid) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn bus(&self) -> broadcast::Sender<Notification> {
        self.bus.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn open_account(&self, id: AccountId) -> Result<(), LedgerError> {
        self.write(|l, now| l.open_account(id, now)).await
    }

    pub async fn deposit(&self, id: AccountId, amount: Micros) -> Result<(), LedgerError> {
        self.write(|l, now| l.deposit(id, amount, now)).await
    }

    pub async fn withdraw(&self, id: AccountId, amount: Micros) -> Result<(), LedgerError> {
        self.write(|l, now| l.withdraw(id, amount, now)).await
    }

    pub async fn suspend_account(
        &self,
        id: AccountId,
        until: DateTime<Utc>,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.write(|l, now| l.suspend_account(id, until, actor, now))
            .await
    }

    pub async fn lift_suspension(&self, id: AccountId, actor: Actor) -> Result<(), LedgerError> {
        self.write(|l, now| l.lift_suspension(id, actor, now)).await
    }

    pub async fn post_offer(&self, new: NewOffer) -> Result<OfferId, LedgerError> {
        self.write(|l, now| l.post_offer(new, now)).await
    }

    pub async fn close_offer(&self, id: OfferId, actor: Actor) -> Result<Micros, LedgerError> {
        self.write(|l, now| l.close_offer(id, actor, now)).await
    }

    pub async fn open_trade(
        &self,
        offer: OfferId,
        counterparty: AccountId,
        amount: Micros,
    ) -> Result<TradeId, LedgerError> {
        self.write(|l, now| l.open_trade(offer, counterparty, amount, now))
            .await
    }

    pub async fn apply(&self, cmd: &TradeCommand) -> Result<TradeStatus, LedgerError> {
        self.write(|l, now| l.apply(cmd, now)).await
    }

    pub async fn mark_paid(&self, id: TradeId, actor: Actor) -> Result<(), LedgerError> {
        self.write(|l, now| l.mark_paid(id, actor, now)).await
    }

    pub async fn confirm_receipt(&self, id: TradeId, actor: Actor) -> Result<(), LedgerError> {
        self.write(|l, now| l.confirm_receipt(id, actor, now)).await
    }

    pub async fn cancel_trade(&self, id: TradeId, actor: Actor) -> Result<(), LedgerError> {
        self.write(|l, now| l.cancel_trade(id, actor, now)).await
    }

    pub async fn open_dispute(
        &self,
        id: TradeId,
        actor: Actor,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.write(|l, now| l.open_dispute(id, actor, reason, now))
            .await
    }

    pub async fn resolve_dispute(
        &self,
        id: TradeId,
        resolution: Resolution,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.write(|l, now| l.resolve_dispute(id, resolution, actor, now))
            .await
    }

    pub async fn post_message(
        &self,
        id: TradeId,
        actor: Actor,
        text: &str,
    ) -> Result<usize, LedgerError> {
        self.write(|l, now| l.post_message(id, actor, text, now))
            .await
    }

    /// Expire stale trades.
    ///
    /// Candidates are collected under a read lock; each one is then expired
    /// under its own write lock, and only if its version is unchanged. A
    /// trade that moved in between (buyer paid, dispute opened) is skipped
    /// and counted in `raced`.
    pub async fn sweep(&self) -> Result<SweepOutcome, LedgerError> {
        let now = self.clock.now();
        let candidates = self.ledger.read().await.stale_candidates(now);

        let mut outcome = SweepOutcome::default();
        for (id, version) in candidates {
            let res = self.write(|l, now| l.expire_trade(id, version, now)).await;
            match res {
                Ok(true) => outcome.expired.push(id),
                Ok(false) => {}
                Err(LedgerError::StaleVersion {
                    expected, actual, ..
                }) => {
                    warn!(
                        trade = %id,
                        expected,
                        actual,
                        "sweep skipped trade changed since scan"
                    );
                    outcome.raced += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let _ = self.bus.send(Notification::SweepCompleted {
            at: now,
            expired: outcome.expired.clone(),
            raced: outcome.raced,
        });
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Run `f` against a read-locked ledger.
    pub async fn read<T>(&self, f: impl FnOnce(&TradeLedger) -> T) -> T {
        let l = self.ledger.read().await;
        f(&l)
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.read().await.snapshot()
    }

    pub async fn commission_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CommissionReport {
        self.ledger.read().await.commission_report(from, to)
    }

    pub async fn messages(&self, id: TradeId) -> Vec<TradeMessage> {
        self.ledger.read().await.messages(id).to_vec()
    }

    pub async fn integrity_violations(&self) -> Vec<IntegrityViolation> {
        self.ledger.read().await.integrity_violations()
    }

    /// Compute the report for `[from, to)` and announce it on the bus.
    pub async fn publish_commission_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CommissionReport {
        let report = self.commission_report(from, to).await;
        let _ = self.bus.send(Notification::CommissionReport(report.clone()));
        report
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn write<T>(
        &self,
        op: impl FnOnce(&mut TradeLedger, DateTime<Utc>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut l = self.ledger.write().await;
        let now = self.clock.now();
        let out = op(&mut l, now);
        let records = l.drain_events();
        self.publish(records).await;
        out
    }

    async fn publish(&self, records: Vec<LedgerRecord>) {
        for rec in records {
            self.record_audit(&rec).await;

            if let LedgerEvent::TradeOpened {
                trade,
                buyer,
                seller,
                amount,
                ..
            } = &rec.event
            {
                if *amount >= self.large_trade_threshold {
                    let _ = self.bus.send(Notification::LargeTrade {
                        trade: *trade,
                        buyer: *buyer,
                        seller: *seller,
                        amount: *amount,
                        at: rec.at,
                    });
                }
            }
            // No subscribers is fine.
            let _ = self.bus.send(Notification::Ledger(rec));
        }
    }

    async fn record_audit(&self, rec: &LedgerRecord) {
        let Some(audit) = &self.audit else { return };
        let payload = match serde_json::to_value(rec) {
            Ok(v) => v,
            Err(e) => {
                error!(seq = rec.seq, error = %e, "audit payload serialize failed");
                return;
            }
        };
        let mut w = audit.lock().await;
        if let Err(e) = w.append(self.stream_id, rec.at, "ledger", rec.event.kind(), payload) {
            error!(seq = rec.seq, error = %e, "audit append failed");
        }
    }
}
