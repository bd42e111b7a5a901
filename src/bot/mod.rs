//! Tick driver wiring the venue to the decision core.
//!
//! One call to [`CapmBot::on_tick`] runs the full cycle:
//! 1. Apply fill/cancel confirmations queued since the last tick
//! 2. Re-read holdings from the venue after a connectivity failure
//! 3. Cancel stale or orphaned orders
//! 4. Read the session and market, update the price history
//! 5. Optimize, decide, validate and submit
//!
//! Any connectivity failure aborts the tick before orders go out and forces a
//! resync on the next one.

use crate::config::Config;
use crate::portfolio::{OptimalPortfolio, PortfolioOptimizer, PriceHistory};
use crate::risk::{FillOutcome, OrderValidator, PositionTracker};
use crate::strategy::{DecisionEngine, EngineState, TickInput};
use crate::venue::{
    ExecutionVenue, OrderId, OrderIntent, SecurityId, SessionState, VenueError, VenueEvent,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What happened during one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub now: DateTime<Utc>,
    pub session: Option<SessionState>,
    pub mode: EngineState,
    pub fills_applied: usize,
    pub cancels_requested: usize,
    pub submitted: Vec<(OrderId, OrderIntent)>,
    pub rejected: usize,
    /// Optimizer error that left the tick without a target
    pub skipped: Option<String>,
    /// Tick stopped on a venue failure
    pub aborted: bool,
}

impl TickReport {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            session: None,
            mode: EngineState::Idle,
            fills_applied: 0,
            cancels_requested: 0,
            submitted: Vec::new(),
            rejected: 0,
            skipped: None,
            aborted: false,
        }
    }
}

/// Running totals across ticks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BotStats {
    pub ticks: u64,
    pub aborted_ticks: u64,
    pub rebalance_orders: u64,
    pub market_make_orders: u64,
    pub rejected_orders: u64,
    pub fills: u64,
    pub cancels: u64,
    pub diagonal_fallbacks: u64,
}

/// CAPM bot bound to one execution venue.
pub struct CapmBot<V: ExecutionVenue> {
    venue: Arc<V>,
    events: mpsc::UnboundedReceiver<VenueEvent>,
    config: Config,
    tracker: PositionTracker,
    history: PriceHistory,
    optimizer: PortfolioOptimizer,
    engine: DecisionEngine,
    validator: OrderValidator,
    needs_resync: bool,
    stats: BotStats,
}

impl<V: ExecutionVenue> CapmBot<V> {
    /// Create a bot. Holdings are read from the venue on the first tick.
    pub fn new(venue: Arc<V>, events: mpsc::UnboundedReceiver<VenueEvent>, config: Config) -> Self {
        let engine = DecisionEngine::new(
            &config.decision,
            config.quoting.clone(),
            config.venue.clone(),
        );

        Self {
            venue,
            events,
            tracker: PositionTracker::default(),
            history: PriceHistory::new(config.optimizer.history_window),
            optimizer: PortfolioOptimizer::new(config.optimizer.clone()),
            engine,
            validator: OrderValidator::new(config.venue.clone()),
            needs_resync: true,
            stats: BotStats::default(),
            config,
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn stats(&self) -> &BotStats {
        &self.stats
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Run one decision cycle at `now`.
    pub async fn on_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::new(now);
        self.stats.ticks += 1;

        report.fills_applied = self.drain_events();

        if let Err(e) = self.run_tick(now, &mut report).await {
            self.stats.aborted_ticks += 1;
            report.aborted = true;
            report.mode = EngineState::Idle;
            if e.requires_resync() {
                self.needs_resync = true;
                error!(error = %e, "Venue unreachable, tick aborted");
            } else {
                warn!(error = %e, "Venue error, tick aborted");
            }
        }

        report
    }

    async fn run_tick(
        &mut self,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), VenueError> {
        if self.needs_resync {
            let (holdings, cash) = self.venue.holdings().await?;
            self.tracker.resync(holdings, cash.total);
            self.needs_resync = false;
        }

        report.cancels_requested = self.cancel_stale_orders(now).await?;

        let session = self.venue.session_info().await?;
        let state = session.state(self.config.decision.closing_window());
        report.session = Some(state);
        if state == SessionState::Closed {
            debug!("Session closed");
            return Ok(());
        }

        let market = self.venue.market_data(&self.config.bot.securities).await?;
        self.history.record(&market);

        let prices: BTreeMap<SecurityId, Decimal> = market
            .iter()
            .map(|(id, security)| (id.clone(), security.quote.mid()))
            .collect();
        let wealth = self.tracker.cash() + self.tracker.holdings().value_at(&prices);

        let target = self.optimizer.compute_optimal_holdings(
            &prices,
            &self.history,
            wealth,
            self.config.optimizer.risk_aversion,
        );
        match &target {
            Ok(portfolio) => {
                if portfolio.used_diagonal_fallback {
                    self.stats.diagonal_fallbacks += 1;
                }
                log_target(portfolio, wealth);
            }
            Err(e) => {
                debug!(error = %e, "Optimizer produced no target");
                report.skipped = Some(e.to_string());
            }
        }

        let decision = self.engine.tick(TickInput {
            now,
            session: state,
            market: &market,
            target: target.as_ref(),
            tracker: &self.tracker,
        });
        report.mode = decision.mode;
        if decision.intents.is_empty() {
            return Ok(());
        }

        let batch = self.validator.validate_batch(decision.intents, &self.tracker);
        report.rejected = batch.rejected.len();
        self.stats.rejected_orders += batch.rejected.len() as u64;

        for intent in batch.accepted {
            match self.venue.submit_order(&intent).await {
                Ok(order_id) => {
                    info!(
                        order_id = %order_id,
                        security = %intent.security,
                        side = ?intent.side,
                        price = %intent.price,
                        quantity = %intent.quantity,
                        purpose = %intent.purpose,
                        "Order submitted"
                    );
                    match decision.mode {
                        EngineState::MarketMaking => self.stats.market_make_orders += 1,
                        _ => self.stats.rebalance_orders += 1,
                    }
                    self.tracker.register_pending(order_id, intent.clone(), now);
                    report.submitted.push((order_id, intent));
                }
                Err(e) if e.requires_resync() => return Err(e),
                Err(e) => {
                    warn!(security = %intent.security, error = %e, "Order refused by venue");
                    report.rejected += 1;
                    self.stats.rejected_orders += 1;
                }
            }
        }

        Ok(())
    }

    /// Apply every queued venue event. Returns the number of fills applied.
    fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            match event {
                VenueEvent::Fill {
                    order_id,
                    fill_id,
                    security,
                    side,
                    price,
                    quantity,
                } => {
                    let outcome = if self.tracker.is_tracked(order_id) {
                        self.tracker.apply_fill(order_id, fill_id, price, quantity)
                    } else {
                        self.tracker
                            .apply_fill_for(order_id, fill_id, &security, side, price, quantity)
                    };
                    if outcome == FillOutcome::Applied {
                        applied += 1;
                        self.stats.fills += 1;
                    }
                }
                VenueEvent::CancelConfirmed { order_id } => {
                    if self.tracker.apply_cancel(order_id).is_some() {
                        self.stats.cancels += 1;
                    }
                }
            }
        }
        applied
    }

    /// Cancel our orders that rested too long or that the tracker does not
    /// know about (left over from a previous run).
    async fn cancel_stale_orders(&mut self, now: DateTime<Utc>) -> Result<usize, VenueError> {
        let max_age = self.config.bot.stale_order_age();
        let mut stale: Vec<OrderId> = self.tracker.stale_orders(now, max_age);

        for order in self.venue.open_orders().await? {
            if !self.tracker.is_tracked(order.order_id) {
                warn!(order_id = %order.order_id, security = %order.intent.security, "Cancelling untracked order");
                stale.push(order.order_id);
            }
        }
        stale.sort();
        stale.dedup();

        let mut requested = 0;
        for order_id in stale {
            match self.venue.cancel_order(order_id).await {
                Ok(()) => {
                    debug!(order_id = %order_id, "Stale order cancel requested");
                    requested += 1;
                }
                Err(VenueError::UnknownOrder(_)) => {
                    // Already gone at the venue. Any fill for it is queued and
                    // still applies as an untracked fill.
                    debug!(order_id = %order_id, "Stale order no longer at venue, releasing");
                    self.tracker.apply_cancel(order_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(requested)
    }
}

fn log_target(portfolio: &OptimalPortfolio, wealth: Decimal) {
    debug!(
        wealth = %wealth,
        expected_payoff = portfolio.expected_payoff,
        payoff_variance = portfolio.payoff_variance,
        implied_rate = portfolio.implied_rate,
        diagonal_fallback = portfolio.used_diagonal_fallback,
        excluded = portfolio.excluded.len(),
        "Target portfolio"
    );
}
