//! `pxd simulate`: run a YAML script of desk operations against an
//! in-process service on a manual clock and print what happened.
//!
//! ```yaml
//! start: "2026-04-01T09:00:00Z"
//! steps:
//!   - { op: open_account, account: 1 }
//!   - { op: deposit, account: 1, amount: "100" }
//!   - { op: post_offer, owner: 1, side: sell, pair: USDT/ARS, price: "1050",
//!       amount: "100", min: "10", max: "100" }
//!   - { op: open_trade, offer: 1, counterparty: 2, amount: "50" }
//!   - { op: confirm_receipt, trade: 1, by: 1, expect_error: INVALID_STATE }
//!   - { op: message, trade: 1, by: 2, text: "paid, ref 8812" }
//!   - { op: advance, minutes: 31 }
//!   - { op: sweep }
//! ```
//!
//! Ids in scripts are the plain numbers the ledger assigns in order
//! (first offer is 1, first trade is 1).
//!
//! Time spans that chrono cannot represent fail the step with
//! `INVALID_SCRIPT`.

use std::io::Write;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use pxd_ledger::{
    AccountId, Actor, CurrencyPair, LedgerError, Micros, NewOffer, OfferId, Resolution, Side,
    TradeAction, TradeCommand, TradeId,
};
use pxd_runtime::{LedgerService, ManualClock, Notification};
use serde::Deserialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Script format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub start: DateTime<Utc>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub op: Op,
    /// Error code the step must fail with, e.g. `INSUFFICIENT_FUNDS`.
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    OpenAccount {
        account: u64,
    },
    Deposit {
        account: u64,
        amount: Amount,
    },
    Withdraw {
        account: u64,
        amount: Amount,
    },
    PostOffer {
        owner: u64,
        side: Side,
        pair: String,
        price: Amount,
        amount: Amount,
        min: Amount,
        max: Amount,
        #[serde(default)]
        payment_methods: Vec<String>,
    },
    CloseOffer {
        offer: u64,
        by: ScriptActor,
    },
    OpenTrade {
        offer: u64,
        counterparty: u64,
        amount: Amount,
    },
    MarkPaid {
        trade: u64,
        by: ScriptActor,
        #[serde(default)]
        key: Option<String>,
    },
    ConfirmReceipt {
        trade: u64,
        by: ScriptActor,
        #[serde(default)]
        key: Option<String>,
    },
    Cancel {
        trade: u64,
        by: ScriptActor,
    },
    Message {
        trade: u64,
        by: ScriptActor,
        text: String,
    },
    OpenDispute {
        trade: u64,
        by: ScriptActor,
        #[serde(default)]
        reason: String,
    },
    ResolveDispute {
        trade: u64,
        resolution: Resolution,
    },
    Suspend {
        account: u64,
        hours: i64,
    },
    LiftSuspension {
        account: u64,
    },
    Advance {
        #[serde(default)]
        minutes: i64,
        #[serde(default)]
        seconds: i64,
    },
    Sweep,
    Report {
        hours: i64,
    },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::OpenAccount { .. } => "open_account",
            Op::Deposit { .. } => "deposit",
            Op::Withdraw { .. } => "withdraw",
            Op::PostOffer { .. } => "post_offer",
            Op::CloseOffer { .. } => "close_offer",
            Op::OpenTrade { .. } => "open_trade",
            Op::MarkPaid { .. } => "mark_paid",
            Op::ConfirmReceipt { .. } => "confirm_receipt",
            Op::Cancel { .. } => "cancel",
            Op::Message { .. } => "message",
            Op::OpenDispute { .. } => "open_dispute",
            Op::ResolveDispute { .. } => "resolve_dispute",
            Op::Suspend { .. } => "suspend",
            Op::LiftSuspension { .. } => "lift_suspension",
            Op::Advance { .. } => "advance",
            Op::Sweep => "sweep",
            Op::Report { .. } => "report",
        }
    }
}

/// Decimal amount. Scripts may write `"12.5"` or a bare integer.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "AmountRepr")]
pub struct Amount(pub Micros);

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Units(i64),
    Text(String),
}

impl TryFrom<AmountRepr> for Amount {
    type Error = String;

    fn try_from(r: AmountRepr) -> Result<Self, Self::Error> {
        match r {
            AmountRepr::Units(u) => Micros::from_units(u)
                .map(Amount)
                .ok_or_else(|| format!("amount {u} out of range")),
            AmountRepr::Text(s) => s.parse().map(Amount).map_err(|e| format!("{e}")),
        }
    }
}

/// `staff` or an account number.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "ActorRepr")]
pub struct ScriptActor(pub Actor);

#[derive(Deserialize)]
#[serde(untagged)]
enum ActorRepr {
    Account(u64),
    Name(String),
}

impl TryFrom<ActorRepr> for ScriptActor {
    type Error = String;

    fn try_from(r: ActorRepr) -> Result<Self, Self::Error> {
        match r {
            ActorRepr::Account(n) => Ok(ScriptActor(Actor::User(AccountId(n)))),
            ActorRepr::Name(s) if s.eq_ignore_ascii_case("staff") => Ok(ScriptActor(Actor::Staff)),
            ActorRepr::Name(s) => Err(format!("unknown actor {s:?}: use staff or an account number")),
        }
    }
}

/// Why a step did not go through.
#[derive(Debug)]
enum StepError {
    Ledger(LedgerError),
    /// The step itself is unusable, e.g. a time span out of range.
    Script(String),
}

impl StepError {
    fn code(&self) -> &'static str {
        match self {
            StepError::Ledger(e) => e.code(),
            StepError::Script(_) => "INVALID_SCRIPT",
        }
    }
}

impl From<LedgerError> for StepError {
    fn from(e: LedgerError) -> Self {
        StepError::Ledger(e)
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::Ledger(e) => write!(f, "{e}"),
            StepError::Script(msg) => f.write_str(msg),
        }
    }
}

fn out_of_range(what: &str) -> StepError {
    StepError::Script(format!("{what} out of range"))
}

pub fn parse_script(raw: &str) -> Result<Script> {
    serde_yaml::from_str(raw).context("invalid simulation script")
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Run every step in order and print one line per step plus the
/// notifications it produced, then a summary. Fails on the first step whose
/// outcome differs from what the script expects, or if the ledger does not
/// check out at the end.
pub async fn run_script(
    script: &Script,
    service: &LedgerService,
    clock: &ManualClock,
    out: &mut dyn Write,
) -> Result<()> {
    let mut rx = service.subscribe();

    for (i, step) in script.steps.iter().enumerate() {
        let n = i + 1;
        let name = step.op.name();
        let res = run_op(&step.op, service, clock).await;

        match (res, step.expect_error.as_deref()) {
            (Ok(detail), None) => writeln!(out, "step={n} op={name} ok{detail}")?,
            (Ok(_), Some(code)) => {
                bail!("step {n} ({name}) succeeded but the script expected {code}")
            }
            (Err(e), Some(code)) if e.code() == code => {
                writeln!(out, "step={n} op={name} err={} expected=true", e.code())?
            }
            (Err(e), _) => {
                bail!("step {n} ({name}) failed: {} ({e})", e.code())
            }
        }
        print_notifications(&mut rx, out)?;
    }

    print_summary(service, out).await
}

async fn run_op(
    op: &Op,
    svc: &LedgerService,
    clock: &ManualClock,
) -> std::result::Result<String, StepError> {
    let detail = match op {
        Op::OpenAccount { account } => {
            svc.open_account(AccountId(*account)).await?;
            String::new()
        }
        Op::Deposit { account, amount } => {
            svc.deposit(AccountId(*account), amount.0).await?;
            String::new()
        }
        Op::Withdraw { account, amount } => {
            svc.withdraw(AccountId(*account), amount.0).await?;
            String::new()
        }
        Op::PostOffer {
            owner,
            side,
            pair,
            price,
            amount,
            min,
            max,
            payment_methods,
        } => {
            let (crypto, fiat) = pair.split_once('/').unwrap_or((pair.as_str(), ""));
            let id = svc
                .post_offer(NewOffer {
                    owner: AccountId(*owner),
                    side: *side,
                    pair: CurrencyPair::new(crypto, fiat),
                    price: price.0,
                    amount: amount.0,
                    min_limit: min.0,
                    max_limit: max.0,
                    payment_methods: payment_methods.clone(),
                })
                .await?;
            format!(" offer={id}")
        }
        Op::CloseOffer { offer, by } => {
            let released = svc.close_offer(OfferId(*offer), by.0).await?;
            format!(" released={released}")
        }
        Op::OpenTrade {
            offer,
            counterparty,
            amount,
        } => {
            let id = svc
                .open_trade(OfferId(*offer), AccountId(*counterparty), amount.0)
                .await?;
            format!(" trade={id}")
        }
        Op::MarkPaid { trade, by, key } => {
            command(svc, *trade, *by, TradeAction::MarkPaid, key).await?
        }
        Op::ConfirmReceipt { trade, by, key } => {
            command(svc, *trade, *by, TradeAction::ConfirmReceipt, key).await?
        }
        Op::Cancel { trade, by } => command(svc, *trade, *by, TradeAction::Cancel, &None).await?,
        Op::Message { trade, by, text } => {
            let n = svc.post_message(TradeId(*trade), by.0, text).await?;
            format!(" message={n}")
        }
        Op::OpenDispute { trade, by, reason } => {
            let action = TradeAction::OpenDispute {
                reason: reason.clone(),
            };
            command(svc, *trade, *by, action, &None).await?
        }
        Op::ResolveDispute { trade, resolution } => {
            let action = TradeAction::ResolveDispute {
                resolution: *resolution,
            };
            command(svc, *trade, ScriptActor(Actor::Staff), action, &None).await?
        }
        Op::Suspend { account, hours } => {
            let until = Duration::try_hours(*hours)
                .and_then(|d| svc.now().checked_add_signed(d))
                .ok_or_else(|| out_of_range("suspension hours"))?;
            svc.suspend_account(AccountId(*account), until, Actor::Staff)
                .await?;
            format!(" until={}", until.to_rfc3339())
        }
        Op::LiftSuspension { account } => {
            svc.lift_suspension(AccountId(*account), Actor::Staff).await?;
            String::new()
        }
        Op::Advance { minutes, seconds } => {
            let now = Duration::try_minutes(*minutes)
                .zip(Duration::try_seconds(*seconds))
                .and_then(|(m, s)| m.checked_add(&s))
                .and_then(|by| clock.try_advance(by))
                .ok_or_else(|| out_of_range("advance"))?;
            format!(" now={}", now.to_rfc3339())
        }
        Op::Sweep => {
            let outcome = svc.sweep().await?;
            format!(" expired={} raced={}", outcome.expired.len(), outcome.raced)
        }
        Op::Report { hours } => {
            let to = svc.now();
            let from = Duration::try_hours(*hours)
                .and_then(|d| to.checked_sub_signed(d))
                .ok_or_else(|| out_of_range("report hours"))?;
            svc.publish_commission_report(from, to).await;
            String::new()
        }
    };
    Ok(detail)
}

async fn command(
    svc: &LedgerService,
    trade: u64,
    by: ScriptActor,
    action: TradeAction,
    key: &Option<String>,
) -> std::result::Result<String, LedgerError> {
    let mut cmd = TradeCommand::new(TradeId(trade), by.0, action);
    if let Some(k) = key {
        cmd = cmd.with_key(k.clone());
    }
    let status = svc.apply(&cmd).await?;
    Ok(format!(" status={}", status.as_str()))
}

fn print_notifications(
    rx: &mut broadcast::Receiver<Notification>,
    out: &mut dyn Write,
) -> Result<()> {
    while let Ok(n) = rx.try_recv() {
        match n {
            Notification::Ledger(rec) => {
                write!(out, "  event seq={} kind={}", rec.seq, rec.event.kind())?;
                if let Some(t) = rec.event.trade() {
                    write!(out, " trade={t}")?;
                }
                writeln!(out)?;
            }
            Notification::LargeTrade { trade, amount, .. } => {
                writeln!(out, "  alert=large_trade trade={trade} amount={amount}")?;
            }
            Notification::CommissionReport(r) => writeln!(
                out,
                "  report trades={} volume={} commission={}",
                r.trades, r.volume, r.commission
            )?,
            Notification::SweepCompleted { .. } | Notification::Heartbeat { .. } => {}
        }
    }
    Ok(())
}

async fn print_summary(svc: &LedgerService, out: &mut dyn Write) -> Result<()> {
    let snap = svc.snapshot().await;
    writeln!(
        out,
        "accounts={} active_offers={} open_trades={} open_disputes={} completed_trades={} cancelled_trades={}",
        snap.accounts,
        snap.active_offers,
        snap.open_trades,
        snap.open_disputes,
        snap.completed_trades,
        snap.cancelled_trades
    )?;
    writeln!(
        out,
        "customer_funds={} commission_pool={} net_funding={} last_seq={}",
        snap.customer_funds, snap.commission_pool, snap.net_funding, snap.last_seq
    )?;

    let accounts = svc
        .read(|l| l.accounts().cloned().collect::<Vec<_>>())
        .await;
    for a in accounts {
        let suspended = a
            .suspended_until
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "account={} available={} held={} completed={} cancellations={} suspended_until={}",
            a.id, a.available, a.held, a.completed_trades, a.cancellation_count, suspended
        )?;
    }

    let violations = svc.integrity_violations().await;
    if !violations.is_empty() {
        for v in &violations {
            writeln!(out, "violation={v}")?;
        }
        bail!("INTEGRITY_VIOLATION: {} problem(s)", violations.len());
    }
    writeln!(out, "integrity=ok")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_accept_text_or_units() {
        let s: Step = serde_yaml::from_str("{op: deposit, account: 1, amount: 5}").unwrap();
        match s.op {
            Op::Deposit { amount, .. } => assert_eq!(amount.0, Micros::new(5_000_000)),
            other => panic!("{other:?}"),
        }
        let s: Step = serde_yaml::from_str("{op: deposit, account: 1, amount: \"0.25\"}").unwrap();
        match s.op {
            Op::Deposit { amount, .. } => assert_eq!(amount.0, Micros::new(250_000)),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn actor_is_staff_or_number() {
        let s: Step =
            serde_yaml::from_str("{op: cancel, trade: 1, by: staff, expect_error: UNAUTHORIZED}")
                .unwrap();
        assert_eq!(s.expect_error.as_deref(), Some("UNAUTHORIZED"));
        assert!(matches!(s.op, Op::Cancel { by: ScriptActor(Actor::Staff), .. }));
        assert!(serde_yaml::from_str::<Step>("{op: cancel, trade: 1, by: bob}").is_err());
    }

    async fn run(raw: &str) -> (Result<()>, String) {
        let script = parse_script(raw).unwrap();
        let clock = std::sync::Arc::new(ManualClock::new(script.start));
        let svc = LedgerService::new(
            pxd_ledger::LedgerConfig::sane_defaults(),
            clock.clone(),
            16,
            Micros::from_units(10_000).unwrap(),
        );
        let mut out = Vec::new();
        let res = run_script(&script, &svc, &clock, &mut out).await;
        (res, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn huge_time_spans_fail_the_step() {
        for step in [
            "{ op: advance, minutes: 9223372036854775807 }",
            "{ op: advance, seconds: 9223372036854775807 }",
            "{ op: report, hours: 9223372036854775807 }",
            "{ op: suspend, account: 1, hours: 9223372036854775807 }",
        ] {
            let raw = format!(
                "start: 2026-04-01T00:00:00Z\nsteps:\n  - {{ op: open_account, account: 1 }}\n  - {step}\n"
            );
            let (res, out) = run(&raw).await;
            let err = res.unwrap_err().to_string();
            assert!(err.starts_with("step 2 ("), "{step}: {err}");
            assert!(err.contains("INVALID_SCRIPT"), "{step}: {err}");
            assert!(out.contains("step=1 op=open_account ok"));
        }
    }

    #[tokio::test]
    async fn out_of_range_span_can_be_expected() {
        let (res, out) = run(
            "start: 2026-04-01T00:00:00Z\nsteps:\n  - { op: advance, minutes: 9223372036854775807, expect_error: INVALID_SCRIPT }\n  - { op: advance, minutes: 31 }\n",
        )
        .await;
        res.unwrap();
        assert!(out.contains("step=1 op=advance err=INVALID_SCRIPT expected=true"));
        assert!(out.contains("step=2 op=advance ok now=2026-04-01T00:31:00+00:00"));
    }

    #[tokio::test]
    async fn message_step_posts_to_the_trade_chat() {
        let (res, out) = run(
            "start: 2026-04-01T00:00:00Z
steps:
  - { op: open_account, account: 1 }
  - { op: open_account, account: 2 }
  - { op: deposit, account: 1, amount: 10 }
  - { op: post_offer, owner: 1, side: sell, pair: USDT/ARS, price: 1000, amount: 10, min: 1, max: 10 }
  - { op: open_trade, offer: 1, counterparty: 2, amount: 10 }
  - { op: message, trade: 1, by: 2, text: sent }
  - { op: message, trade: 1, by: 3, text: hi, expect_error: UNAUTHORIZED }
",
        )
        .await;
        res.unwrap();
        assert!(out.contains("step=6 op=message ok message=1"));
        assert!(out.contains("kind=MESSAGE_POSTED trade=trade-1"));
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(parse_script("start: 2026-04-01T00:00:00Z\nsteps:\n  - op: refer_friend\n").is_err());
    }
}
