//! Venue-agnostic execution interface.
//!
//! The decision core never talks to a concrete platform. Anything that can
//! report sessions, holdings and quotes and accept limit orders can drive it:
//! - the in-memory paper venue used for replays and tests
//! - a platform binding living outside this crate

use super::types::{
    CashState, HoldingsVector, MarketData, OpenOrder, OrderId, OrderIntent, SecurityId,
    SessionInfo,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by venue calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    /// The venue could not be reached; nothing may be assumed about pending state.
    #[error("venue unreachable: {0}")]
    Connectivity(String),
    /// The venue refused the order.
    #[error("order rejected by venue: {0}")]
    Rejected(String),
    /// The order id is not known to the venue.
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
}

impl VenueError {
    /// Whether the failure means the bot must re-read holdings before trading again.
    pub fn requires_resync(&self) -> bool {
        matches!(self, VenueError::Connectivity(_))
    }
}

/// Execution venue consumed by the bot.
///
/// Fill and cancel confirmations are not returned from these calls; the venue
/// pushes them as [`VenueEvent`](super::VenueEvent)s on the channel handed to
/// the bot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Current session phase and time left.
    async fn session_info(&self) -> Result<SessionInfo, VenueError>;

    /// Holdings and cash as the venue sees them.
    async fn holdings(&self) -> Result<(HoldingsVector, CashState), VenueError>;

    /// Latest quotes for the requested securities.
    async fn market_data(&self, securities: &[SecurityId]) -> Result<MarketData, VenueError>;

    /// Submit a limit order. Acceptance does not mean it filled.
    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderId, VenueError>;

    /// Request cancellation. Confirmation arrives as an event.
    async fn cancel_order(&self, order_id: OrderId) -> Result<(), VenueError>;

    /// Our orders still resting at the venue.
    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError>;
}
