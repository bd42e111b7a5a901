//! Trading decisions.
//!
//! - Reactive rebalancing toward the CAPM target
//! - Closing-window market making around fair value
//! - The per-tick state machine choosing between them

mod engine;
mod quoting;
mod rebalancer;

pub use engine::{DecisionEngine, EngineState, TickDecision, TickInput};
pub use quoting::Quoter;
pub use rebalancer::{Deviation, Rebalancer};
