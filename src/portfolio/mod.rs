//! Risk model and CAPM portfolio optimization.
//!
//! - `history`: rolling price window per security
//! - `risk_model`: payoff mean and covariance estimate
//! - `optimizer`: closed-form budget-constrained optimum
//! - `performance`: CAPM utility of a position

mod history;
mod matrix;
mod optimizer;
mod performance;
mod risk_model;

pub use history::PriceHistory;
pub use optimizer::{OptimalPortfolio, PortfolioOptimizer};
pub use performance::{describe, PerformanceModel};
pub use risk_model::RiskEstimate;

use crate::venue::SecurityId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons an optimization pass produced no target.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    #[error("insufficient price history: {available} observations, need {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("risk aversion must be positive, got {0}")]
    InvalidRiskAversion(f64),

    #[error("non-positive price {price} for {security}")]
    InvalidPrice { security: SecurityId, price: Decimal },

    #[error("no price for {0}")]
    MissingPrice(SecurityId),

    #[error("no security with non-zero variance")]
    NoRiskyAssets,
}
