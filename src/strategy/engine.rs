//! Per-tick trading mode selection.
//!
//! Each tick moves `Idle → Evaluate → {Rebalancing | MarketMaking | Idle}`
//! using a fixed priority order:
//!
//! 1. Session closed, no target, or reactive cooldown running: idle.
//! 2. Material deviation from the target: rebalance.
//! 3. Closing window: make markets.
//! 4. Otherwise: idle.
//!
//! Only one mode runs per tick, so a tick never mixes REBALANCE and
//! MARKET_MAKE intents.

use super::quoting::Quoter;
use super::rebalancer::{Deviation, Rebalancer};
use crate::config::{DecisionConfig, QuotingConfig};
use crate::portfolio::{OptimalPortfolio, OptimizerError};
use crate::risk::PositionTracker;
use crate::venue::{MarketData, OrderIntent, SessionState, VenueLimits};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Decision engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Idle,
    Evaluate,
    Rebalancing,
    MarketMaking,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "IDLE"),
            EngineState::Evaluate => write!(f, "EVALUATE"),
            EngineState::Rebalancing => write!(f, "REBALANCING"),
            EngineState::MarketMaking => write!(f, "MARKET_MAKING"),
        }
    }
}

/// Everything the engine looks at in one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub now: DateTime<Utc>,
    pub session: SessionState,
    pub market: &'a MarketData,
    pub target: Result<&'a OptimalPortfolio, &'a OptimizerError>,
    pub tracker: &'a PositionTracker,
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickDecision {
    /// Mode chosen for this tick
    pub mode: EngineState,
    /// Intents in submission order
    pub intents: Vec<OrderIntent>,
}

impl TickDecision {
    fn idle() -> Self {
        Self {
            mode: EngineState::Idle,
            intents: Vec::new(),
        }
    }
}

/// Chooses between rebalancing and market making each tick.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    rebalancer: Rebalancer,
    quoter: Quoter,
    cooldown: Duration,
    state: EngineState,
    last_reactive_at: Option<DateTime<Utc>>,
}

impl DecisionEngine {
    pub fn new(decision: &DecisionConfig, quoting: QuotingConfig, limits: VenueLimits) -> Self {
        Self {
            rebalancer: Rebalancer::new(decision, limits.clone()),
            quoter: Quoter::new(quoting, decision.max_order_size, limits),
            cooldown: decision.cooldown(),
            state: EngineState::Idle,
            last_reactive_at: None,
        }
    }

    /// State left by the last tick.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Time the last REBALANCE batch was emitted.
    pub fn last_reactive_at(&self) -> Option<DateTime<Utc>> {
        self.last_reactive_at
    }

    /// Whether the reactive cooldown has run out at `now`.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_reactive_at {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed >= self.cooldown,
                // Clock went backwards
                Err(_) => false,
            },
        }
    }

    /// Run one tick of the state machine.
    pub fn tick(&mut self, input: TickInput<'_>) -> TickDecision {
        let previous = self.state;
        self.state = EngineState::Evaluate;
        let decision = self.evaluate(&input);

        if decision.mode != previous {
            debug!(from = %previous, to = %decision.mode, "Engine transition");
        }
        if decision.mode == EngineState::Rebalancing && !decision.intents.is_empty() {
            self.last_reactive_at = Some(input.now);
        }
        if !decision.intents.is_empty() {
            info!(
                mode = %decision.mode,
                intents = decision.intents.len(),
                "Tick produced order intents"
            );
        }

        self.state = decision.mode;
        decision
    }

    fn evaluate(&self, input: &TickInput<'_>) -> TickDecision {
        if input.session == SessionState::Closed {
            return TickDecision::idle();
        }

        let target = match input.target {
            Ok(target) => target,
            Err(e) => {
                debug!(error = %e, "No target this tick");
                return TickDecision::idle();
            }
        };

        if !self.cooldown_elapsed(input.now) {
            return TickDecision::idle();
        }

        let deviations: Vec<Deviation> =
            self.rebalancer
                .material_deviations(target, input.tracker, input.market);
        if !deviations.is_empty() {
            return TickDecision {
                mode: EngineState::Rebalancing,
                intents: self
                    .rebalancer
                    .intents(&deviations, input.tracker, input.market),
            };
        }

        if input.session == SessionState::ClosingWindow {
            return TickDecision {
                mode: EngineState::MarketMaking,
                intents: self.quoter.intents(target, input.tracker, input.market),
            };
        }

        TickDecision::idle()
    }
}
