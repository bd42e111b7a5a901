//! Paper venue for replays and tests.
//!
//! Keeps an in-memory book of our resting limit orders, fills them when the
//! simulated market crosses their price, and pushes fill/cancel confirmations
//! over a channel just like a live venue binding would.

use super::traits::{ExecutionVenue, VenueError};
use super::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Simulated account and market state.
#[derive(Debug, Clone)]
pub struct PaperState {
    pub cash: Decimal,
    pub holdings: HoldingsVector,
    pub securities: MarketData,
    pub resting: BTreeMap<OrderId, OpenOrder>,
    pub now: DateTime<Utc>,
    pub session_end: Option<DateTime<Utc>>,
    pub order_count: u64,
    pub fill_count: u64,
}

/// In-memory execution venue.
pub struct PaperVenue {
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    fill_id_counter: AtomicU64,
    offline: AtomicBool,
    events: mpsc::UnboundedSender<VenueEvent>,
}

impl PaperVenue {
    /// Create a venue with starting cash and a set of listed securities.
    ///
    /// Returns the receiving end of the event channel for the bot.
    pub fn new(
        initial_cash: Decimal,
        listings: Vec<(SecurityId, SecurityClass, MarketQuote)>,
        now: DateTime<Utc>,
    ) -> (Self, mpsc::UnboundedReceiver<VenueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let securities: MarketData = listings
            .into_iter()
            .map(|(id, class, quote)| (id.clone(), Security { id, class, quote }))
            .collect();
        let holdings = securities
            .keys()
            .map(|id| (id.clone(), Decimal::ZERO))
            .collect();

        let state = PaperState {
            cash: initial_cash,
            holdings,
            securities,
            resting: BTreeMap::new(),
            now,
            session_end: None,
            order_count: 0,
            fill_count: 0,
        };

        let venue = Self {
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicU64::new(1),
            fill_id_counter: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            events: tx,
        };

        (venue, rx)
    }

    /// Open the session until `end`.
    pub async fn open_session(&self, end: DateTime<Utc>) {
        self.state.write().await.session_end = Some(end);
    }

    /// Close the session immediately.
    pub async fn close_session(&self) {
        self.state.write().await.session_end = None;
    }

    /// Advance the simulated clock.
    pub async fn set_time(&self, now: DateTime<Utc>) {
        self.state.write().await.now = now;
    }

    /// Seed an existing position (e.g., an endowment at session start).
    pub async fn set_holding(&self, id: SecurityId, quantity: Decimal) {
        self.state.write().await.holdings.set(id, quantity);
    }

    /// Simulate a dropped connection; every call fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Copy of the current simulated state.
    pub async fn get_state(&self) -> PaperState {
        self.state.read().await.clone()
    }

    /// Replace quotes and fill any resting order the new market crosses.
    pub async fn update_market(&self, quotes: BTreeMap<SecurityId, MarketQuote>) {
        let mut state = self.state.write().await;

        for (id, quote) in quotes {
            state
                .securities
                .entry(id.clone())
                .and_modify(|security| security.quote = quote)
                .or_insert_with(|| Security {
                    id,
                    class: SecurityClass::Stock,
                    quote,
                });
        }

        let crossed: Vec<OrderId> = state
            .resting
            .values()
            .filter(|order| {
                state
                    .securities
                    .get(&order.intent.security)
                    .is_some_and(|s| crosses(&order.intent, &s.quote))
            })
            .map(|order| order.order_id)
            .collect();

        for order_id in crossed {
            if let Some(order) = state.resting.remove(&order_id) {
                // Resting orders trade at their own limit price.
                let price = order.intent.price;
                self.fill(&mut state, &order.intent, order_id, price, order.remaining);
            }
        }
    }

    fn check_online(&self) -> Result<(), VenueError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(VenueError::Connectivity("paper venue offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn fill(
        &self,
        state: &mut PaperState,
        intent: &OrderIntent,
        order_id: OrderId,
        price: Decimal,
        quantity: Decimal,
    ) {
        let signed = intent.side.sign() * quantity;
        state.holdings.adjust(&intent.security, signed);
        state.cash -= signed * price;
        state.fill_count += 1;

        if let Some(security) = state.securities.get_mut(&intent.security) {
            security.quote.last_price = price;
        }

        let fill_id = self.fill_id_counter.fetch_add(1, Ordering::SeqCst);
        info!(
            %order_id,
            fill_id,
            security = %intent.security,
            side = ?intent.side,
            %price,
            %quantity,
            cash = %state.cash,
            "Paper fill"
        );

        let event = VenueEvent::Fill {
            order_id,
            fill_id,
            security: intent.security.clone(),
            side: intent.side,
            price,
            quantity,
        };
        if self.events.send(event).is_err() {
            warn!(%order_id, "Event receiver dropped, fill not delivered");
        }
    }

    fn reserved_cash(state: &PaperState) -> Decimal {
        state
            .resting
            .values()
            .filter(|o| o.intent.side == OrderSide::Buy)
            .map(|o| o.remaining * o.intent.price)
            .sum()
    }
}

/// Whether a limit order is marketable against a quote.
fn crosses(intent: &OrderIntent, quote: &MarketQuote) -> bool {
    match intent.side {
        OrderSide::Buy => quote.best_ask.is_some_and(|ask| intent.price >= ask),
        OrderSide::Sell => quote.best_bid.is_some_and(|bid| intent.price <= bid),
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn session_info(&self) -> Result<SessionInfo, VenueError> {
        self.check_online()?;
        let state = self.state.read().await;

        Ok(match state.session_end {
            Some(end) if end > state.now => {
                let remaining = (end - state.now).to_std().unwrap_or_default();
                SessionInfo::open(remaining)
            }
            _ => SessionInfo::closed(),
        })
    }

    async fn holdings(&self) -> Result<(HoldingsVector, CashState), VenueError> {
        self.check_online()?;
        let state = self.state.read().await;

        let cash = CashState {
            total: state.cash,
            available: state.cash - Self::reserved_cash(&state),
        };
        Ok((state.holdings.clone(), cash))
    }

    async fn market_data(&self, securities: &[SecurityId]) -> Result<MarketData, VenueError> {
        self.check_online()?;
        let state = self.state.read().await;

        if securities.is_empty() {
            return Ok(state.securities.clone());
        }

        Ok(securities
            .iter()
            .filter_map(|id| state.securities.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderId, VenueError> {
        self.check_online()?;
        let mut state = self.state.write().await;

        if intent.price <= Decimal::ZERO || intent.quantity <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!(
                "invalid price {} or quantity {}",
                intent.price, intent.quantity
            )));
        }

        let quote = match state.securities.get(&intent.security) {
            Some(security) => security.quote,
            None => {
                return Err(VenueError::Rejected(format!(
                    "unknown security {}",
                    intent.security
                )))
            }
        };

        if intent.side == OrderSide::Buy
            && intent.notional() > state.cash - Self::reserved_cash(&state)
        {
            return Err(VenueError::Rejected("insufficient cash".to_string()));
        }

        let order_id = OrderId(self.order_id_counter.fetch_add(1, Ordering::SeqCst));
        state.order_count += 1;

        if crosses(intent, &quote) {
            // Marketable orders take the resting price.
            let price = match intent.side {
                OrderSide::Buy => quote.buy_price(),
                OrderSide::Sell => quote.sell_price(),
            };
            self.fill(&mut state, intent, order_id, price, intent.quantity);
        } else {
            debug!(
                %order_id,
                security = %intent.security,
                side = ?intent.side,
                price = %intent.price,
                quantity = %intent.quantity,
                "Paper order resting"
            );
            let created_at = state.now;
            state.resting.insert(
                order_id,
                OpenOrder {
                    order_id,
                    intent: intent.clone(),
                    remaining: intent.quantity,
                    created_at,
                },
            );
        }

        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), VenueError> {
        self.check_online()?;
        let mut state = self.state.write().await;

        if state.resting.remove(&order_id).is_none() {
            return Err(VenueError::UnknownOrder(order_id));
        }

        debug!(%order_id, "Paper order cancelled");
        if self
            .events
            .send(VenueEvent::CancelConfirmed { order_id })
            .is_err()
        {
            warn!(%order_id, "Event receiver dropped, cancel not delivered");
        }
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        self.check_online()?;
        Ok(self.state.read().await.resting.values().cloned().collect())
    }
}
