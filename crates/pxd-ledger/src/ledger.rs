//! The trade ledger.
//!
//! # Atomicity
//! Every write method follows the same shape: load the records it touches
//! into local copies, run all checks and checked arithmetic against those
//! copies, then commit them in one go.  Any `Err` is returned before the
//! commit, so a failed call leaves the ledger exactly as it was and emits no
//! events.
//!
//! # Escrow
//! - Sell offer: the whole offer amount moves `available → held` when the
//!   offer is posted.  Opening a trade re-attributes part of that reserve to
//!   the trade (`Trade::escrow`).
//! - Buy offer: the counterparty is the seller; their trade amount moves
//!   `available → held` when the trade opens.
//!
//! On settlement the seller's escrow leaves `held` and the buyer is credited
//! the amount minus commission.  On cancellation the escrow goes back where
//! it came from: into the sell offer's reserve, or back to the seller's
//! available balance for buy offers.
//!
//! # Determinism
//! No IO, no wall clock, no randomness.  Time is always an argument.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::commands::{TradeAction, TradeCommand};
use crate::error::LedgerError;
use crate::events::{CancelReason, LedgerEvent, LedgerRecord};
use crate::money::Micros;
use crate::policy::LedgerConfig;
use crate::state_machine::{
    next_offer_status, next_trade_status, OfferEvent, OfferStatus, TradeEvent, TradeStatus,
};
use crate::types::{
    Account, AccountId, Actor, Dispute, NewOffer, Offer, OfferId, Resolution, Side, Trade,
    TradeId, TradeMessage,
};

/// Longest chat message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2_000;

// ---------------------------------------------------------------------------
// Snapshot (read-only view)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub accounts: usize,
    pub active_offers: usize,
    pub open_trades: usize,
    pub open_disputes: usize,
    /// Completed trades whose buyer was credited. A trade a dispute closed
    /// for the seller ends `Completed` without settling and is not counted.
    pub completed_trades: usize,
    pub cancelled_trades: usize,
    /// Sum of available + held across all accounts.
    pub customer_funds: Micros,
    pub commission_pool: Micros,
    /// Deposits minus withdrawals.
    pub net_funding: Micros,
    pub last_seq: u64,
}

// ---------------------------------------------------------------------------
// TradeLedger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TradeLedger {
    pub(crate) cfg: LedgerConfig,
    pub(crate) accounts: BTreeMap<AccountId, Account>,
    pub(crate) offers: BTreeMap<OfferId, Offer>,
    pub(crate) trades: BTreeMap<TradeId, Trade>,
    pub(crate) disputes: BTreeMap<TradeId, Dispute>,
    pub(crate) commission_pool: Micros,
    pub(crate) net_funding: Micros,
    next_offer_id: u64,
    next_trade_id: u64,
    /// Idempotency key -> the trade it was applied to. Dropped once that
    /// trade is final.
    applied_commands: BTreeMap<String, TradeId>,
    pub(crate) messages: BTreeMap<TradeId, Vec<TradeMessage>>,
    outbox: Vec<LedgerRecord>,
    last_seq: u64,
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::sane_defaults())
    }
}

impl TradeLedger {
    pub fn new(cfg: LedgerConfig) -> Self {
        Self {
            cfg,
            accounts: BTreeMap::new(),
            offers: BTreeMap::new(),
            trades: BTreeMap::new(),
            disputes: BTreeMap::new(),
            commission_pool: Micros::ZERO,
            net_funding: Micros::ZERO,
            next_offer_id: 0,
            next_trade_id: 0,
            applied_commands: BTreeMap::new(),
            messages: BTreeMap::new(),
            outbox: Vec::new(),
            last_seq: 0,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.cfg
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub fn open_account(&mut self, id: AccountId, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.accounts.contains_key(&id) {
            return Err(LedgerError::DuplicateAccount { account: id });
        }
        self.accounts.insert(id, Account::new(id));
        self.emit(now, LedgerEvent::AccountOpened { account: id });
        Ok(())
    }

    pub fn deposit(
        &mut self,
        id: AccountId,
        amount: Micros,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        require_positive(amount)?;
        let mut acct = self.account_for(id)?.clone();
        credit(&mut acct, amount)?;
        let net_funding = add(self.net_funding, amount)?;

        self.accounts.insert(id, acct);
        self.net_funding = net_funding;
        self.emit(now, LedgerEvent::Deposited { account: id, amount });
        Ok(())
    }

    pub fn withdraw(
        &mut self,
        id: AccountId,
        amount: Micros,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        require_positive(amount)?;
        let mut acct = self.account_for(id)?.clone();
        debit(&mut acct, amount)?;
        let net_funding = sub(self.net_funding, amount)?;

        self.accounts.insert(id, acct);
        self.net_funding = net_funding;
        self.emit(now, LedgerEvent::Withdrawn { account: id, amount });
        Ok(())
    }

    /// Staff block. Replaces any existing suspension end.
    pub fn suspend_account(
        &mut self,
        id: AccountId,
        until: DateTime<Utc>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        require_staff(actor, "suspend accounts")?;
        let acct = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::account_missing(id))?;
        acct.suspended_until = Some(until);
        self.emit(now, LedgerEvent::AccountSuspended { account: id, until });
        Ok(())
    }

    pub fn lift_suspension(
        &mut self,
        id: AccountId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        require_staff(actor, "lift suspensions")?;
        let acct = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::account_missing(id))?;
        acct.suspended_until = None;
        self.emit(now, LedgerEvent::SuspensionLifted { account: id });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Offers
    // -----------------------------------------------------------------------

    /// Post an offer. Sell offers escrow their full amount immediately.
    pub fn post_offer(
        &mut self,
        new: NewOffer,
        now: DateTime<Utc>,
    ) -> Result<OfferId, LedgerError> {
        validate_new_offer(&new)?;
        let mut owner = self.account_for(new.owner)?.clone();
        ensure_not_suspended(&owner, now)?;
        if new.side == Side::Sell {
            hold(&mut owner, new.amount)?;
        }

        let id = OfferId(self.next_offer_id + 1);
        let event = LedgerEvent::OfferPosted {
            offer: id,
            owner: new.owner,
            side: new.side,
            amount: new.amount,
            price: new.price,
        };
        let offer = Offer {
            id,
            owner: new.owner,
            side: new.side,
            pair: new.pair,
            price: new.price,
            amount: new.amount,
            remaining: new.amount,
            min_limit: new.min_limit,
            max_limit: new.max_limit,
            payment_methods: new.payment_methods,
            status: OfferStatus::Active,
            open_trade: None,
            created_at: now,
        };

        self.next_offer_id += 1;
        self.accounts.insert(owner.id, owner);
        self.offers.insert(id, offer);
        self.emit(now, event);
        Ok(id)
    }

    /// Withdraw an active offer. Returns the reserve released to the owner.
    pub fn close_offer(
        &mut self,
        id: OfferId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Micros, LedgerError> {
        let mut offer = self.offer_for(id)?.clone();
        if !(actor.is(offer.owner) || actor == Actor::Staff) {
            return Err(LedgerError::Unauthorized {
                actor,
                action: "close this offer",
            });
        }
        offer.status = next_offer_status(offer.status, OfferEvent::Close)?;

        let mut owner = self.account_for(offer.owner)?.clone();
        let released = match offer.side {
            Side::Sell => {
                unhold(&mut owner, offer.remaining)?;
                offer.remaining
            }
            Side::Buy => Micros::ZERO,
        };
        offer.remaining = Micros::ZERO;

        self.accounts.insert(owner.id, owner);
        self.offers.insert(id, offer);
        self.emit(now, LedgerEvent::OfferClosed { offer: id, released });
        Ok(released)
    }

    // -----------------------------------------------------------------------
    // Trades
    // -----------------------------------------------------------------------

    pub fn open_trade(
        &mut self,
        offer_id: OfferId,
        counterparty: AccountId,
        amount: Micros,
        now: DateTime<Utc>,
    ) -> Result<TradeId, LedgerError> {
        let mut offer = self.offer_for(offer_id)?.clone();
        let mut cp = self.account_for(counterparty)?.clone();
        let matched = next_offer_status(offer.status, OfferEvent::Match)?;

        if counterparty == offer.owner {
            return Err(LedgerError::SelfTrade { offer: offer_id });
        }
        ensure_not_suspended(self.account_for(offer.owner)?, now)?;
        ensure_not_suspended(&cp, now)?;

        let max = offer.max_limit.min(offer.remaining);
        if amount < offer.min_limit || amount > max {
            return Err(LedgerError::AmountOutOfLimits {
                amount,
                min: offer.min_limit,
                max,
            });
        }
        let fiat_value = amount
            .checked_notional(offer.price)
            .ok_or(LedgerError::Overflow)?;

        let (buyer, seller) = match offer.side {
            Side::Sell => (counterparty, offer.owner),
            Side::Buy => {
                hold(&mut cp, amount)?;
                (offer.owner, counterparty)
            }
        };
        offer.remaining = sub(offer.remaining, amount)?;

        let id = TradeId(self.next_trade_id + 1);
        offer.status = matched;
        offer.open_trade = Some(id);
        let trade = Trade {
            id,
            offer: offer_id,
            counterparty,
            buyer,
            seller,
            side: offer.side,
            amount,
            price: offer.price,
            status: TradeStatus::Pending,
            escrow: amount,
            commission: Micros::ZERO,
            created_at: now,
            last_action_at: now,
            settled_at: None,
            version: 1,
        };

        self.next_trade_id += 1;
        self.accounts.insert(cp.id, cp);
        self.offers.insert(offer_id, offer);
        self.trades.insert(id, trade);
        self.emit(
            now,
            LedgerEvent::TradeOpened {
                trade: id,
                offer: offer_id,
                buyer,
                seller,
                amount,
                fiat_value,
            },
        );
        Ok(id)
    }

    /// Run a [`TradeCommand`] and return the trade's resulting status.
    ///
    /// A command whose `idempotency_key` was already applied to the same
    /// trade returns the current status without doing anything. The same key
    /// on a different trade is refused with `KeyReused`.
    ///
    /// Keys are forgotten once their trade is final (cancelled, or completed
    /// after a dispute). A replay after that runs again and meets the final
    /// state.
    pub fn apply(
        &mut self,
        cmd: &TradeCommand,
        now: DateTime<Utc>,
    ) -> Result<TradeStatus, LedgerError> {
        if let Some(key) = cmd.idempotency_key.as_deref() {
            match self.applied_commands.get(key) {
                Some(&trade) if trade == cmd.trade => {
                    return Ok(self.trade_for(cmd.trade)?.status);
                }
                Some(&trade) => {
                    return Err(LedgerError::KeyReused {
                        key: key.to_string(),
                        trade,
                    });
                }
                None => {}
            }
        }
        if let Some(expected) = cmd.expected_version {
            self.ensure_version(cmd.trade, expected)?;
        }

        match &cmd.action {
            TradeAction::MarkPaid => self.mark_paid(cmd.trade, cmd.actor, now)?,
            TradeAction::ConfirmReceipt => self.confirm_receipt(cmd.trade, cmd.actor, now)?,
            TradeAction::Cancel => self.cancel_trade(cmd.trade, cmd.actor, now)?,
            TradeAction::OpenDispute { reason } => {
                self.open_dispute(cmd.trade, cmd.actor, reason, now)?
            }
            TradeAction::ResolveDispute { resolution } => {
                self.resolve_dispute(cmd.trade, *resolution, cmd.actor, now)?
            }
        }

        if let Some(key) = cmd.idempotency_key.as_deref() {
            if !self.is_final(cmd.trade) {
                self.applied_commands.insert(key.to_string(), cmd.trade);
            }
        }
        Ok(self.trade_for(cmd.trade)?.status)
    }

    /// Buyer reports the fiat payment as sent. `Pending → Paid`.
    pub fn mark_paid(
        &mut self,
        id: TradeId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut trade = self.trade_for(id)?.clone();
        if !actor.is(trade.buyer) {
            return Err(LedgerError::Unauthorized {
                actor,
                action: "mark this trade paid",
            });
        }
        trade.status = next_trade_status(trade.status, TradeEvent::Pay)?;
        touch(&mut trade, now);

        self.trades.insert(id, trade);
        self.emit(now, LedgerEvent::TradePaid { trade: id });
        Ok(())
    }

    /// Seller confirms the fiat arrived. `Paid → Completed`, escrow released
    /// to the buyer minus commission.
    pub fn confirm_receipt(
        &mut self,
        id: TradeId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut trade = self.trade_for(id)?.clone();
        if !actor.is(trade.seller) {
            return Err(LedgerError::Unauthorized {
                actor,
                action: "confirm receipt for this trade",
            });
        }
        trade.status = next_trade_status(trade.status, TradeEvent::Confirm)?;

        let mut stage = StagedAccounts::default();
        let mut offer = self.offer_for(trade.offer)?.clone();
        let (buyer_credit, commission) = self.settle(&mut trade, &mut stage, now)?;
        let pool = add(self.commission_pool, commission)?;
        let closed = release_offer(
            &mut offer,
            stage.get(&self.accounts, trade.seller)?,
            Micros::ZERO,
        )?;
        touch(&mut trade, now);

        self.commission_pool = pool;
        self.commit(stage, Some(offer), trade);
        self.emit(
            now,
            LedgerEvent::TradeCompleted {
                trade: id,
                buyer_credit,
                commission,
            },
        );
        self.emit_offer_closed(now, closed);
        Ok(())
    }

    /// Buyer backs out before paying. Counts as a cancellation against them.
    pub fn cancel_trade(
        &mut self,
        id: TradeId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut trade = self.trade_for(id)?.clone();
        if !actor.is(trade.buyer) {
            return Err(LedgerError::Unauthorized {
                actor,
                action: "cancel this trade",
            });
        }
        trade.status = next_trade_status(trade.status, TradeEvent::Cancel)?;
        let buyer = trade.buyer;
        self.cancel_with(trade, CancelReason::BuyerCancelled, buyer, now)
    }

    pub fn open_dispute(
        &mut self,
        id: TradeId,
        actor: Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut trade = self.trade_for(id)?.clone();
        if !(trade.is_participant(&actor) || actor == Actor::Staff) {
            return Err(LedgerError::Unauthorized {
                actor,
                action: "dispute this trade",
            });
        }
        if self.disputes.contains_key(&id) {
            return Err(LedgerError::DisputeExists { trade: id });
        }
        let interrupted = trade.status;
        trade.status = next_trade_status(trade.status, TradeEvent::Dispute)?;
        touch(&mut trade, now);

        let dispute = Dispute {
            trade: id,
            opened_by: actor,
            reason: reason.to_string(),
            opened_at: now,
            interrupted,
            resolution: Resolution::None,
            resolved_at: None,
        };

        self.trades.insert(id, trade);
        self.disputes.insert(id, dispute);
        self.emit(
            now,
            LedgerEvent::DisputeOpened {
                trade: id,
                opened_by: actor,
            },
        );
        Ok(())
    }

    /// Staff decision. `Disputed → Completed` with funds going to the
    /// favored side.
    ///
    /// | interrupted | favor   | effect                                          |
    /// |-------------|---------|-------------------------------------------------|
    /// | Paid        | buyer   | settle as if the seller confirmed               |
    /// | Paid        | seller  | escrow returns to its source                    |
    /// | Completed   | buyer   | nothing moves                                   |
    /// | Completed   | seller  | buyer's credit clawed back, commission refunded |
    pub fn resolve_dispute(
        &mut self,
        id: TradeId,
        resolution: Resolution,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        require_staff(actor, "resolve disputes")?;
        if resolution == Resolution::None {
            return Err(LedgerError::InvalidResolution);
        }
        let mut trade = self.trade_for(id)?.clone();
        trade.status = next_trade_status(trade.status, TradeEvent::Resolve)?;
        let mut dispute = self
            .disputes
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "dispute",
                id: id.0,
            })?;

        let mut stage = StagedAccounts::default();
        let mut offer = None;
        let mut pool = self.commission_pool;
        let mut settled = None;
        let mut closed = None;

        match (dispute.interrupted, resolution) {
            (TradeStatus::Paid, Resolution::FavorBuyer) => {
                let mut o = self.offer_for(trade.offer)?.clone();
                let split = self.settle(&mut trade, &mut stage, now)?;
                pool = add(pool, split.1)?;
                closed = release_offer(
                    &mut o,
                    stage.get(&self.accounts, trade.seller)?,
                    Micros::ZERO,
                )?;
                settled = Some(split);
                offer = Some(o);
            }
            (TradeStatus::Paid, Resolution::FavorSeller) => {
                let mut o = self.offer_for(trade.offer)?.clone();
                let seller = stage.get(&self.accounts, trade.seller)?;
                let returned = refund_escrow(&mut trade, seller)?;
                closed = release_offer(&mut o, seller, returned)?;
                offer = Some(o);
            }
            (TradeStatus::Completed, Resolution::FavorBuyer) => {}
            (TradeStatus::Completed, Resolution::FavorSeller) => {
                let clawback = sub(trade.amount, trade.commission)?;
                debit(stage.get(&self.accounts, trade.buyer)?, clawback)?;
                credit(stage.get(&self.accounts, trade.seller)?, trade.amount)?;
                pool = sub(pool, trade.commission)?;
                trade.commission = Micros::ZERO;
                trade.settled_at = None;
            }
            (other, _) => {
                return Err(LedgerError::InvalidState {
                    entity: "dispute",
                    from: format!("{other:?}"),
                    event: "Resolve".to_string(),
                })
            }
        }

        dispute.resolution = resolution;
        dispute.resolved_at = Some(now);
        touch(&mut trade, now);

        self.commission_pool = pool;
        self.disputes.insert(id, dispute);
        self.commit(stage, offer, trade);
        self.emit(now, LedgerEvent::DisputeResolved { trade: id, resolution });
        if let Some((buyer_credit, commission)) = settled {
            self.emit(
                now,
                LedgerEvent::TradeCompleted {
                    trade: id,
                    buyer_credit,
                    commission,
                },
            );
        }
        self.emit_offer_closed(now, closed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    /// Post to the trade's chat. Buyer, seller and staff may write, in any
    /// trade status. Returns the message's 1-based position in the thread.
    ///
    /// Chat is not trade activity: `version` and `last_action_at` stay put,
    /// so talking does not hold off the expiry sweep.
    pub fn post_message(
        &mut self,
        id: TradeId,
        actor: Actor,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, LedgerError> {
        let trade = self.trade_for(id)?;
        if !(trade.is_participant(&actor) || actor == Actor::Staff) {
            return Err(LedgerError::Unauthorized {
                actor,
                action: "write in this trade's chat",
            });
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(LedgerError::InvalidMessage {
                reason: "message is empty",
            });
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(LedgerError::InvalidMessage {
                reason: "message is too long",
            });
        }

        let thread = self.messages.entry(id).or_default();
        thread.push(TradeMessage {
            trade: id,
            sender: actor,
            text: text.to_string(),
            at: now,
        });
        let position = thread.len();
        self.emit(
            now,
            LedgerEvent::MessagePosted {
                trade: id,
                sender: actor,
                text: text.to_string(),
            },
        );
        Ok(position)
    }

    /// The trade's chat in posting order. Empty for unknown trades.
    pub fn messages(&self, id: TradeId) -> &[TradeMessage] {
        self.messages.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Open trades idle for longer than the timeout, with the version seen.
    pub fn stale_candidates(&self, now: DateTime<Utc>) -> Vec<(TradeId, u64)> {
        self.trades
            .values()
            .filter(|t| t.status.is_open() && self.cfg.is_stale(t.last_action_at, now))
            .map(|t| (t.id, t.version))
            .collect()
    }

    /// Expire one trade if it is still the version the caller saw.
    ///
    /// Returns `Ok(false)` when the trade is no longer open or not yet
    /// stale, and `StaleVersion` when anything touched it in between.
    pub fn expire_trade(
        &mut self,
        id: TradeId,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.ensure_version(id, expected_version)?;
        let mut trade = self.trade_for(id)?.clone();
        if !trade.status.is_open() || !self.cfg.is_stale(trade.last_action_at, now) {
            return Ok(false);
        }
        trade.status = next_trade_status(trade.status, TradeEvent::Timeout)?;
        let charged = trade.counterparty;
        self.cancel_with(trade, CancelReason::Expired, charged, now)?;
        Ok(true)
    }

    /// Cancel every stale open trade. Safe to call repeatedly.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<Vec<TradeId>, LedgerError> {
        let mut expired = Vec::new();
        for (id, version) in self.stale_candidates(now) {
            if self.expire_trade(id, version, now)? {
                expired.push(id);
            }
        }
        Ok(expired)
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn offer(&self, id: OfferId) -> Option<&Offer> {
        self.offers.get(&id)
    }

    pub fn trade(&self, id: TradeId) -> Option<&Trade> {
        self.trades.get(&id)
    }

    pub fn dispute(&self, id: TradeId) -> Option<&Dispute> {
        self.disputes.get(&id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.offers.values()
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    pub fn commission_pool(&self) -> Micros {
        self.commission_pool
    }

    pub fn ensure_version(&self, id: TradeId, expected: u64) -> Result<(), LedgerError> {
        let actual = self.trade_for(id)?.version;
        if actual != expected {
            return Err(LedgerError::StaleVersion {
                trade: id,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let count = |s: TradeStatus| self.trades.values().filter(|t| t.status == s).count();
        LedgerSnapshot {
            accounts: self.accounts.len(),
            active_offers: self
                .offers
                .values()
                .filter(|o| o.status == OfferStatus::Active)
                .count(),
            open_trades: self.trades.values().filter(|t| t.status.is_open()).count(),
            open_disputes: self.disputes.values().filter(|d| d.is_open()).count(),
            completed_trades: self
                .trades
                .values()
                .filter(|t| t.status == TradeStatus::Completed && t.settled_at.is_some())
                .count(),
            cancelled_trades: count(TradeStatus::Cancelled),
            customer_funds: self.accounts.values().map(Account::total).sum(),
            commission_pool: self.commission_pool,
            net_funding: self.net_funding,
            last_seq: self.last_seq,
        }
    }

    /// Take the records produced since the previous drain.
    pub fn drain_events(&mut self) -> Vec<LedgerRecord> {
        std::mem::take(&mut self.outbox)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn account_for(&self, id: AccountId) -> Result<&Account, LedgerError> {
        self.accounts
            .get(&id)
            .ok_or_else(|| LedgerError::account_missing(id))
    }

    fn offer_for(&self, id: OfferId) -> Result<&Offer, LedgerError> {
        self.offers
            .get(&id)
            .ok_or_else(|| LedgerError::offer_missing(id))
    }

    fn trade_for(&self, id: TradeId) -> Result<&Trade, LedgerError> {
        self.trades
            .get(&id)
            .ok_or_else(|| LedgerError::trade_missing(id))
    }

    /// Move the trade's escrow to the buyer, less commission.
    /// Returns `(buyer_credit, commission)`.
    fn settle(
        &self,
        trade: &mut Trade,
        stage: &mut StagedAccounts,
        now: DateTime<Utc>,
    ) -> Result<(Micros, Micros), LedgerError> {
        let (buyer_credit, commission) = self.cfg.split_settlement(trade.escrow)?;

        let seller = stage.get(&self.accounts, trade.seller)?;
        spend_held(seller, trade.escrow)?;
        seller.completed_trades += 1;

        let buyer = stage.get(&self.accounts, trade.buyer)?;
        credit(buyer, buyer_credit)?;
        buyer.completed_trades += 1;

        trade.escrow = Micros::ZERO;
        trade.commission = commission;
        trade.settled_at = Some(now);
        Ok((buyer_credit, commission))
    }

    /// Shared tail of buyer cancellation and expiry. `trade.status` is
    /// already `Cancelled`.
    fn cancel_with(
        &mut self,
        mut trade: Trade,
        reason: CancelReason,
        charged_to: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut stage = StagedAccounts::default();
        let mut offer = self.offer_for(trade.offer)?.clone();

        let seller = stage.get(&self.accounts, trade.seller)?;
        let returned = refund_escrow(&mut trade, seller)?;
        let closed = release_offer(&mut offer, seller, returned)?;

        let charged = stage.get(&self.accounts, charged_to)?;
        let suspended_until = charge_cancellation(&self.cfg, charged, now);
        touch(&mut trade, now);

        let id = trade.id;
        self.commit(stage, Some(offer), trade);
        self.emit(
            now,
            LedgerEvent::TradeCancelled {
                trade: id,
                reason,
                charged_to,
            },
        );
        self.emit_offer_closed(now, closed);
        if let Some(until) = suspended_until {
            self.emit(
                now,
                LedgerEvent::AccountSuspended {
                    account: charged_to,
                    until,
                },
            );
        }
        Ok(())
    }

    fn commit(&mut self, stage: StagedAccounts, offer: Option<Offer>, trade: Trade) {
        self.accounts.extend(stage.0);
        if let Some(offer) = offer {
            self.offers.insert(offer.id, offer);
        }
        let id = trade.id;
        self.trades.insert(id, trade);
        if self.is_final(id) {
            self.applied_commands.retain(|_, t| *t != id);
        }
    }

    /// No transition can leave this state.
    fn is_final(&self, id: TradeId) -> bool {
        match self.trades.get(&id).map(|t| t.status) {
            Some(TradeStatus::Cancelled) => true,
            Some(TradeStatus::Completed) => self.disputes.contains_key(&id),
            _ => false,
        }
    }

    fn emit_offer_closed(&mut self, now: DateTime<Utc>, closed: Option<(OfferId, Micros)>) {
        if let Some((offer, released)) = closed {
            self.emit(now, LedgerEvent::OfferClosed { offer, released });
        }
    }

    fn emit(&mut self, at: DateTime<Utc>, event: LedgerEvent) {
        self.last_seq += 1;
        self.outbox.push(LedgerRecord {
            seq: self.last_seq,
            at,
            event,
        });
    }
}

// ---------------------------------------------------------------------------
// Staging and balance helpers
// ---------------------------------------------------------------------------

/// Working copies of the accounts an operation touches.
#[derive(Default)]
struct StagedAccounts(BTreeMap<AccountId, Account>);

impl StagedAccounts {
    fn get<'a>(
        &'a mut self,
        book: &BTreeMap<AccountId, Account>,
        id: AccountId,
    ) -> Result<&'a mut Account, LedgerError> {
        match self.0.entry(id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let acct = book
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| LedgerError::account_missing(id))?;
                Ok(v.insert(acct))
            }
        }
    }
}

fn add(a: Micros, b: Micros) -> Result<Micros, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

fn sub(a: Micros, b: Micros) -> Result<Micros, LedgerError> {
    a.checked_sub(b).ok_or(LedgerError::Overflow)
}

fn require_positive(amount: Micros) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount { amount })
    }
}

fn require_staff(actor: Actor, action: &'static str) -> Result<(), LedgerError> {
    if actor == Actor::Staff {
        Ok(())
    } else {
        Err(LedgerError::Unauthorized { actor, action })
    }
}

fn ensure_not_suspended(acct: &Account, now: DateTime<Utc>) -> Result<(), LedgerError> {
    match acct.suspended_until {
        Some(until) if now < until => Err(LedgerError::TradingSuspended {
            account: acct.id,
            until,
        }),
        _ => Ok(()),
    }
}

fn credit(acct: &mut Account, amount: Micros) -> Result<(), LedgerError> {
    acct.available = add(acct.available, amount)?;
    Ok(())
}

fn debit(acct: &mut Account, amount: Micros) -> Result<(), LedgerError> {
    if amount > acct.available {
        return Err(LedgerError::InsufficientFunds {
            account: acct.id,
            needed: amount,
            available: acct.available,
        });
    }
    acct.available = sub(acct.available, amount)?;
    Ok(())
}

/// available → held
fn hold(acct: &mut Account, amount: Micros) -> Result<(), LedgerError> {
    debit(acct, amount)?;
    acct.held = add(acct.held, amount)?;
    Ok(())
}

/// held → available
fn unhold(acct: &mut Account, amount: Micros) -> Result<(), LedgerError> {
    spend_held(acct, amount)?;
    credit(acct, amount)
}

fn spend_held(acct: &mut Account, amount: Micros) -> Result<(), LedgerError> {
    let held = sub(acct.held, amount)?;
    if !held.is_non_negative() {
        return Err(LedgerError::Overflow);
    }
    acct.held = held;
    Ok(())
}

fn touch(trade: &mut Trade, now: DateTime<Utc>) {
    trade.last_action_at = now;
    trade.version += 1;
}

/// Undo a trade's escrow. Sell-offer escrow stays held as offer reserve;
/// buy-offer escrow goes back to the seller's available balance. Returns the
/// amount to put back into the offer's `remaining`.
fn refund_escrow(trade: &mut Trade, seller: &mut Account) -> Result<Micros, LedgerError> {
    let amount = trade.escrow;
    if trade.side == Side::Buy {
        unhold(seller, amount)?;
    }
    trade.escrow = Micros::ZERO;
    Ok(amount)
}

/// Detach the offer from its finished trade. Reactivates it if what is left
/// still meets the minimum, otherwise closes it. Closing a sell offer frees
/// its leftover reserve; `seller` is that offer's owner in that case and is
/// left untouched for buy offers.
fn release_offer(
    offer: &mut Offer,
    seller: &mut Account,
    returned: Micros,
) -> Result<Option<(OfferId, Micros)>, LedgerError> {
    offer.remaining = add(offer.remaining, returned)?;
    offer.open_trade = None;
    let reopen = offer.remaining.is_positive() && offer.remaining >= offer.min_limit;
    offer.status = next_offer_status(offer.status, OfferEvent::Release { reopen })?;
    if reopen {
        return Ok(None);
    }

    let released = match offer.side {
        Side::Sell => {
            unhold(seller, offer.remaining)?;
            offer.remaining
        }
        Side::Buy => Micros::ZERO,
    };
    offer.remaining = Micros::ZERO;
    Ok(Some((offer.id, released)))
}

/// Count a cancellation; returns the new suspension end if this one trips
/// the limit.
fn charge_cancellation(
    cfg: &LedgerConfig,
    acct: &mut Account,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    acct.cancellation_count = acct.cancellation_count.saturating_add(1);
    let until = cfg.suspension_for(acct.cancellation_count, now)?;
    let until = acct.suspended_until.map_or(until, |cur| cur.max(until));
    acct.suspended_until = Some(until);
    Some(until)
}

fn validate_new_offer(new: &NewOffer) -> Result<(), LedgerError> {
    if new.pair.crypto.trim().is_empty() || new.pair.fiat.trim().is_empty() {
        return Err(LedgerError::invalid_offer("currency pair must be set"));
    }
    if !new.price.is_positive() {
        return Err(LedgerError::invalid_offer("price must be positive"));
    }
    if !new.amount.is_positive() {
        return Err(LedgerError::invalid_offer("amount must be positive"));
    }
    if !new.min_limit.is_positive() || new.min_limit > new.max_limit {
        return Err(LedgerError::invalid_offer(
            "limits must satisfy 0 < min_limit <= max_limit",
        ));
    }
    if new.min_limit > new.amount {
        return Err(LedgerError::invalid_offer("min_limit exceeds amount"));
    }
    Ok(())
}
