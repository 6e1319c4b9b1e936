//! Core data types used across the trading system

use serde::{Deserialize, Serialize};

/// A single observed price of the traded pair
///
/// Produced externally (exchange kline close or ticker poll) and consumed in
/// timestamp order. The `close_price` alias keeps historical JSON dumps from
/// older exports readable without migration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Millisecond epoch timestamp
    pub timestamp: i64,
    #[serde(alias = "close_price")]
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        PricePoint { timestamp, price }
    }
}

/// Opaque order identifier
///
/// Doubles as the client order id (`orderLinkId`) sent to the exchange, so it
/// must be unique per order for the lifetime of the account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generate a fresh random id
    pub fn random() -> Self {
        OrderId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn new(s: impl Into<String>) -> Self {
        OrderId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open position created by a buy decision
///
/// Owned exclusively by the order store; the engine reads a fresh snapshot
/// every tick and never caches orders across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Base-asset quantity, always > 0
    pub amount: f64,
    /// Entry price in quote currency, always > 0
    pub price: f64,
    /// Set once the exchange confirms the buy is filled; only sellable
    /// orders are eligible for matching against a sell decision
    pub sellable: bool,
    /// For outbound sell orders: the id of the position being closed
    pub back_reference: Option<OrderId>,
}

impl Order {
    /// New open position at the given entry, pending fill confirmation
    pub fn open(amount: f64, price: f64) -> Self {
        Order {
            id: OrderId::random(),
            amount,
            price,
            sellable: false,
            back_reference: None,
        }
    }
}

/// Field changes applied through `OrderStore::update`
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub amount: Option<f64>,
    pub price: Option<f64>,
    pub sellable: Option<bool>,
}

impl OrderPatch {
    pub fn sellable(value: bool) -> Self {
        OrderPatch {
            sellable: Some(value),
            ..Default::default()
        }
    }
}

/// Outcome of one engine tick
///
/// Tagged variants so a consumer can never misread a missing field as zero;
/// "no decision" is `Option::None` at the call site, not a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Decision {
    Buy {
        price: f64,
        amount: f64,
        order_id: OrderId,
    },
    Sell {
        price: f64,
        amount: f64,
        entry_price: f64,
        closed_order_id: OrderId,
    },
}

impl Decision {
    pub fn is_sell(&self) -> bool {
        matches!(self, Decision::Sell { .. })
    }
}

/// One realized round trip, written exactly once per executed sell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub entry_price: f64,
    pub exit_price: f64,
    pub amount: f64,
    pub profit: f64,
    pub timestamp: i64,
}

impl TradeResult {
    pub fn from_sell(decision: &Decision, timestamp: i64) -> Option<Self> {
        match decision {
            Decision::Sell {
                price,
                amount,
                entry_price,
                ..
            } => Some(TradeResult {
                entry_price: *entry_price,
                exit_price: *price,
                amount: *amount,
                profit: (*price - *entry_price) * *amount,
                timestamp,
            }),
            Decision::Buy { .. } => None,
        }
    }
}

/// Snapshot of the account: free quote balance plus open positions valued at
/// the current price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioBalance {
    pub quote_balance: f64,
    pub positions_value: f64,
    pub bought_value: f64,
    pub total_base: f64,
    pub total_balance: f64,
}

impl PortfolioBalance {
    pub fn compute(quote_balance: f64, orders: &[Order], current_price: f64) -> Self {
        let positions_value: f64 = orders.iter().map(|o| o.amount * current_price).sum();
        let bought_value: f64 = orders.iter().map(|o| o.amount * o.price).sum();
        let total_base: f64 = orders.iter().map(|o| o.amount).sum();

        PortfolioBalance {
            quote_balance,
            positions_value,
            bought_value,
            total_base,
            total_balance: quote_balance + positions_value,
        }
    }
}

// ============================================================================
// Quantity rounding
// ============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Truncate a computed quantity down to `precision` decimal places.
///
/// Always rounds toward zero so the spend implied by the rounded quantity can
/// never exceed the intended budget. NaN and infinity collapse to 0.0, which
/// callers treat as "nothing to buy".
pub fn truncate_qty(value: f64, precision: u32) -> f64 {
    match Decimal::try_from(value) {
        Ok(d) => d
            .round_dp_with_strategy(precision, RoundingStrategy::ToZero)
            .to_f64()
            .unwrap_or(0.0),
        Err(_) => 0.0,
    }
}
