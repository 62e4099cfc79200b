use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Micros;
use crate::state_machine::{OfferStatus, TradeStatus};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_newtype {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

id_newtype!(AccountId, "acct");
id_newtype!(OfferId, "offer");
id_newtype!(TradeId, "trade");

// ---------------------------------------------------------------------------
// Actors and sides
// ---------------------------------------------------------------------------

/// Who is asking for a transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "account", rename_all = "snake_case")]
pub enum Actor {
    User(AccountId),
    Staff,
}

impl Actor {
    pub fn is(&self, account: AccountId) -> bool {
        matches!(self, Actor::User(a) if *a == account)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(a) => write!(f, "{a}"),
            Actor::Staff => f.write_str("staff"),
        }
    }
}

/// Side from the offer owner's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub crypto: String,
    pub fiat: String,
}

impl CurrencyPair {
    pub fn new(crypto: impl Into<String>, fiat: impl Into<String>) -> Self {
        Self {
            crypto: crypto.into(),
            fiat: fiat.into(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.crypto, self.fiat)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub available: Micros,
    /// Sell-offer reserves plus seller escrow on buy-offer trades.
    pub held: Micros,
    pub completed_trades: u64,
    pub cancellation_count: u32,
    pub suspended_until: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            available: Micros::ZERO,
            held: Micros::ZERO,
            completed_trades: 0,
            cancellation_count: 0,
            suspended_until: None,
        }
    }

    pub fn total(&self) -> Micros {
        self.available + self.held
    }

    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.is_some_and(|until| now < until)
    }
}

/// Input to [`TradeLedger::post_offer`](crate::TradeLedger::post_offer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOffer {
    pub owner: AccountId,
    pub side: Side,
    pub pair: CurrencyPair,
    pub price: Micros,
    pub amount: Micros,
    pub min_limit: Micros,
    pub max_limit: Micros,
    #[serde(default)]
    pub payment_methods: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub owner: AccountId,
    pub side: Side,
    pub pair: CurrencyPair,
    pub price: Micros,
    pub amount: Micros,
    /// Not yet allocated to a trade. For sell offers this is still held.
    pub remaining: Micros,
    pub min_limit: Micros,
    pub max_limit: Micros,
    pub payment_methods: Vec<String>,
    pub status: OfferStatus,
    pub open_trade: Option<TradeId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub offer: OfferId,
    pub counterparty: AccountId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub side: Side,
    pub amount: Micros,
    pub price: Micros,
    pub status: TradeStatus,
    /// Seller funds locked for this trade. Zero once settled or refunded.
    pub escrow: Micros,
    /// Retained by the desk on settlement; zero until then.
    pub commission: Micros,
    pub created_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    /// When the buyer was credited. Cleared if a dispute reverses it.
    pub settled_at: Option<DateTime<Utc>>,
    /// Bumped on every mutation. Starts at 1.
    pub version: u64,
}

impl Trade {
    pub fn is_participant(&self, actor: &Actor) -> bool {
        actor.is(self.buyer) || actor.is(self.seller)
    }
}

/// One line of a trade's chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeMessage {
    pub trade: TradeId,
    pub sender: Actor,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    None,
    FavorBuyer,
    FavorSeller,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub trade: TradeId,
    pub opened_by: Actor,
    pub reason: String,
    pub opened_at: DateTime<Utc>,
    /// Status the trade was in when the dispute froze it.
    pub interrupted: TradeStatus,
    pub resolution: Resolution,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn is_open(&self) -> bool {
        self.resolution == Resolution::None
    }
}
