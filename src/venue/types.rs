//! Core market, order and account types shared across the bot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Venue-assigned security identifier (e.g., "NOTE-A").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityId(pub String);

impl SecurityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SecurityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Security class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityClass {
    Stock,
    Etf,
}

/// Tradable security with its latest quote.
///
/// Identity (`id`, `class`) never changes; the price fields are refreshed
/// every tick from the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    pub class: SecurityClass,
    pub quote: MarketQuote,
}

/// Best bid/ask and last traded price for one security.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_price: Decimal,
}

impl MarketQuote {
    pub fn new(best_bid: Option<Decimal>, best_ask: Option<Decimal>, last_price: Decimal) -> Self {
        Self {
            best_bid,
            best_ask,
            last_price,
        }
    }

    /// Price a buyer would pay to trade immediately.
    pub fn buy_price(&self) -> Decimal {
        self.best_ask.unwrap_or(self.last_price)
    }

    /// Price a seller would receive to trade immediately.
    pub fn sell_price(&self) -> Decimal {
        self.best_bid.unwrap_or(self.last_price)
    }

    /// Mid price when both sides are present, last traded price otherwise.
    pub fn mid(&self) -> Decimal {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => (bid + ask) / Decimal::TWO,
            _ => self.last_price,
        }
    }
}

/// Market data for every traded security, keyed by id.
pub type MarketData = BTreeMap<SecurityId, Security>;

/// Signed quantity per security (negative = short).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingsVector(BTreeMap<SecurityId, Decimal>);

impl HoldingsVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Quantity held, zero when the security is absent.
    pub fn get(&self, id: &SecurityId) -> Decimal {
        self.0.get(id).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn set(&mut self, id: SecurityId, quantity: Decimal) {
        self.0.insert(id, quantity);
    }

    /// Add a signed delta to a position.
    pub fn adjust(&mut self, id: &SecurityId, delta: Decimal) {
        *self.0.entry(id.clone()).or_insert(Decimal::ZERO) += delta;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SecurityId, &Decimal)> {
        self.0.iter()
    }

    pub fn securities(&self) -> impl Iterator<Item = &SecurityId> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Market value of the holdings at the given prices.
    pub fn value_at(&self, prices: &BTreeMap<SecurityId, Decimal>) -> Decimal {
        self.0
            .iter()
            .map(|(id, qty)| *qty * prices.get(id).copied().unwrap_or(Decimal::ZERO))
            .sum()
    }
}

impl FromIterator<(SecurityId, Decimal)> for HoldingsVector {
    fn from_iter<T: IntoIterator<Item = (SecurityId, Decimal)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Cash totals. `available` excludes cash reserved by pending buy orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashState {
    pub total: Decimal,
    pub available: Decimal,
}

impl CashState {
    pub fn new(total: Decimal) -> Self {
        Self {
            total,
            available: total,
        }
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Why an order was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPurpose {
    /// Reactive order closing a deviation from the optimal portfolio
    Rebalance,
    /// Standing quote posted during the closing window
    MarketMake,
}

impl fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPurpose::Rebalance => write!(f, "REBALANCE"),
            OrderPurpose::MarketMake => write!(f, "MARKET_MAKE"),
        }
    }
}

/// Limit order the engine wants to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub security: SecurityId,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub purpose: OrderPurpose,
}

impl OrderIntent {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Venue-assigned order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Order resting at the venue, as reported by `open_orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub intent: OrderIntent,
    pub remaining: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Closed,
    Open,
    /// Final minutes of an open session, the only phase where quoting is allowed
    ClosingWindow,
}

/// Session information reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub is_open: bool,
    pub time_remaining: Duration,
}

impl SessionInfo {
    pub fn open(time_remaining: Duration) -> Self {
        Self {
            is_open: true,
            time_remaining,
        }
    }

    pub fn closed() -> Self {
        Self {
            is_open: false,
            time_remaining: Duration::ZERO,
        }
    }

    /// Classify the session given the length of the closing window.
    pub fn state(&self, closing_window: Duration) -> SessionState {
        if !self.is_open {
            SessionState::Closed
        } else if self.time_remaining <= closing_window {
            SessionState::ClosingWindow
        } else {
            SessionState::Open
        }
    }
}

/// Asynchronous notification from the venue.
#[derive(Debug, Clone, PartialEq)]
pub enum VenueEvent {
    Fill {
        order_id: OrderId,
        fill_id: u64,
        security: SecurityId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    },
    CancelConfirmed {
        order_id: OrderId,
    },
}

/// Static trading constraints of the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueLimits {
    /// Price increment
    pub tick_size: Decimal,
    /// Lowest accepted limit price
    pub min_price: Decimal,
    /// Highest accepted limit price
    pub max_price: Decimal,
    /// Quantity increment
    pub lot_size: Decimal,
    /// Largest single order quantity
    pub max_order_size: Decimal,
    /// Maximum number of our orders resting at once
    pub max_outstanding_orders: usize,
    /// Units per security we may sell beyond current holdings
    pub short_capacity: Decimal,
}

impl Default for VenueLimits {
    fn default() -> Self {
        Self {
            tick_size: Decimal::new(1, 2),         // 0.01
            min_price: Decimal::new(1, 2),         // 0.01
            max_price: Decimal::new(1_000_000, 0), // 1,000,000
            lot_size: Decimal::ONE,
            max_order_size: Decimal::new(10, 0),
            max_outstanding_orders: 20,
            short_capacity: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_session_state_classification() {
        let window = Duration::from_secs(300);
        assert_eq!(SessionInfo::closed().state(window), SessionState::Closed);
        assert_eq!(
            SessionInfo::open(Duration::from_secs(600)).state(window),
            SessionState::Open
        );
        assert_eq!(
            SessionInfo::open(Duration::from_secs(180)).state(window),
            SessionState::ClosingWindow
        );
        assert_eq!(
            SessionInfo::open(Duration::from_secs(300)).state(window),
            SessionState::ClosingWindow
        );
    }

    #[test]
    fn test_quote_fallbacks() {
        let quote = MarketQuote::new(None, Some(dec!(10.5)), dec!(10));
        assert_eq!(quote.buy_price(), dec!(10.5));
        assert_eq!(quote.sell_price(), dec!(10));
        assert_eq!(quote.mid(), dec!(10));

        let both = MarketQuote::new(Some(dec!(9)), Some(dec!(11)), dec!(12));
        assert_eq!(both.mid(), dec!(10));
    }

    #[test]
    fn test_holdings_adjust_and_value() {
        let mut holdings = HoldingsVector::new();
        let a = SecurityId::from("A");
        holdings.adjust(&a, dec!(5));
        holdings.adjust(&a, dec!(-8));
        assert_eq!(holdings.get(&a), dec!(-3));
        assert_eq!(holdings.get(&SecurityId::from("B")), Decimal::ZERO);

        let prices = BTreeMap::from([(a, dec!(2.5))]);
        assert_eq!(holdings.value_at(&prices), dec!(-7.5));
    }
}
