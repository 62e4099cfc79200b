//! pxd-runtime
//!
//! Async wiring around the pure ledger: a shared [`LedgerService`], the
//! notification bus, the audit sink and the periodic jobs (expiry sweep,
//! commission report, heartbeat).

mod bus;
mod clock;
mod service;
mod settings;
mod tasks;

pub use bus::Notification;
pub use clock::{Clock, ManualClock, SystemClock};
pub use service::{LedgerService, SweepOutcome};
pub use settings::{ledger_config, service_from_desk, JobPeriods};
pub use tasks::{
    spawn_commission_report, spawn_expiry_sweeper, spawn_heartbeat, spawn_notification_logger,
};
