//! Account bookkeeping and pre-trade checks.
//!
//! - Holdings, cash and pending orders, changed only by venue confirmations
//! - Order validation against venue limits and available funds

mod position_tracker;
mod validator;

pub use position_tracker::{FillOutcome, PendingOrder, PositionTracker};
pub use validator::{BatchValidation, OrderValidator, RejectReason};
