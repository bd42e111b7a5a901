//! CAPM performance score of a cash and holdings position.
//!
//! `score = cash + Σ μ_i·h_i − λ·hᵀΣh`, i.e. expected payoff of the whole
//! position penalized by its payoff variance.

use super::risk_model::RiskEstimate;
use crate::utils::to_f64;
use crate::venue::{HoldingsVector, OrderIntent, OrderSide};
use rust_decimal::Decimal;

/// Scores positions against a fixed risk estimate.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceModel<'a> {
    estimate: &'a RiskEstimate,
    risk_aversion: f64,
}

impl<'a> PerformanceModel<'a> {
    pub fn new(estimate: &'a RiskEstimate, risk_aversion: f64) -> Self {
        Self {
            estimate,
            risk_aversion,
        }
    }

    /// Expected payoff of cash plus holdings. Securities unknown to the
    /// estimate contribute nothing.
    pub fn expected_payoff(&self, cash: Decimal, holdings: &HoldingsVector) -> f64 {
        let units = self.units(holdings);
        let risky: f64 = self
            .estimate
            .expected_payoffs()
            .iter()
            .zip(&units)
            .map(|(mu, h)| mu * h)
            .sum();
        to_f64(cash) + risky
    }

    pub fn payoff_variance(&self, holdings: &HoldingsVector) -> f64 {
        self.estimate.portfolio_variance(&self.units(holdings))
    }

    pub fn score(&self, cash: Decimal, holdings: &HoldingsVector) -> f64 {
        self.expected_payoff(cash, holdings) - self.risk_aversion * self.payoff_variance(holdings)
    }

    /// Score of the position after every intent filled in full.
    pub fn score_after(
        &self,
        cash: Decimal,
        holdings: &HoldingsVector,
        intents: &[OrderIntent],
    ) -> f64 {
        let mut cash = cash;
        let mut holdings = holdings.clone();
        for intent in intents {
            let signed = intent.side.sign() * intent.quantity;
            holdings.adjust(&intent.security, signed);
            cash -= signed * intent.price;
        }
        self.score(cash, &holdings)
    }

    /// Whether filling the intent would raise the score.
    pub fn improves(&self, cash: Decimal, holdings: &HoldingsVector, intent: &OrderIntent) -> bool {
        self.score_after(cash, holdings, std::slice::from_ref(intent))
            > self.score(cash, holdings)
    }

    fn units(&self, holdings: &HoldingsVector) -> Vec<f64> {
        self.estimate
            .securities()
            .iter()
            .map(|id| to_f64(holdings.get(id)))
            .collect()
    }
}

/// Short form of an intent for log lines, e.g. `sell 1 A @ 7`.
pub fn describe(intent: &OrderIntent) -> String {
    let verb = match intent.side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    };
    format!("{} {} {} @ {}", verb, intent.quantity, intent.security, intent.price)
}
