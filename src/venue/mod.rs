//! Execution venue boundary.
//!
//! Everything the decision core needs from the outside world:
//! - Market, order and account types
//! - The `ExecutionVenue` trait a platform binding implements
//! - An in-memory paper venue for replays and tests

pub mod paper;
mod traits;
mod types;

pub use paper::{PaperState, PaperVenue};
pub use traits::{ExecutionVenue, VenueError};
pub use types::*;

#[cfg(test)]
pub use traits::MockExecutionVenue;
