//! CAPM mean-variance optimizer.
//!
//! Maximizes `μ·h − λ·hᵀΣh` subject to the budget constraint `p·h = B`.
//! The Lagrangian gives the closed form
//!
//! ```text
//! h = Σ⁻¹(μ − γp) / 2λ,    γ = (pᵀΣ⁻¹μ − 2λB) / (pᵀΣ⁻¹p)
//! ```
//!
//! where `μ − γp` is the excess-return vector and `γ` the implied gross
//! risk-free rate.

use super::history::PriceHistory;
use super::matrix;
use super::performance::PerformanceModel;
use super::risk_model::RiskEstimate;
use super::OptimizerError;
use crate::config::OptimizerConfig;
use crate::utils::{from_f64, to_f64};
use crate::venue::{HoldingsVector, SecurityId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Variance at or below this is treated as a constant-price security.
const ZERO_VARIANCE: f64 = 1e-12;

/// Result of an optimization pass.
#[derive(Debug, Clone)]
pub struct OptimalPortfolio {
    /// Target holdings for every security in the estimate
    pub holdings: HoldingsVector,
    /// Fair value (expected payoff) per security
    pub expected_payoffs: BTreeMap<SecurityId, Decimal>,
    /// The covariance matrix was singular and its diagonal was used instead
    pub used_diagonal_fallback: bool,
    /// Zero-variance securities given zero weight without inversion
    pub excluded: Vec<SecurityId>,
    /// Implied gross risk-free rate `γ`
    pub implied_rate: f64,
    /// Expected payoff of the target holdings
    pub expected_payoff: f64,
    /// Payoff variance of the target holdings
    pub payoff_variance: f64,
    /// Risk estimate the target was solved against
    pub risk: RiskEstimate,
    pub risk_aversion: f64,
}

impl OptimalPortfolio {
    /// Target chosen outside the optimizer, with fair values but no risk
    /// estimate behind it.
    pub fn fixed(holdings: HoldingsVector, fair_values: BTreeMap<SecurityId, Decimal>) -> Self {
        Self {
            holdings,
            expected_payoffs: fair_values,
            used_diagonal_fallback: false,
            excluded: Vec::new(),
            implied_rate: 0.0,
            expected_payoff: 0.0,
            payoff_variance: 0.0,
            risk: RiskEstimate::default(),
            risk_aversion: 0.0,
        }
    }

    /// Value of the target holdings at the given prices.
    pub fn invested_value(&self, prices: &BTreeMap<SecurityId, Decimal>) -> Decimal {
        self.holdings.value_at(prices)
    }

    pub fn fair_value(&self, id: &SecurityId) -> Option<Decimal> {
        self.expected_payoffs.get(id).copied()
    }

    /// CAPM score model over the same risk estimate.
    pub fn performance(&self) -> PerformanceModel<'_> {
        PerformanceModel::new(&self.risk, self.risk_aversion)
    }
}

/// Computes CAPM-optimal holdings from observed prices.
#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Estimate risk from the history window and solve for optimal holdings.
    pub fn compute_optimal_holdings(
        &self,
        prices: &BTreeMap<SecurityId, Decimal>,
        history: &PriceHistory,
        cash: Decimal,
        risk_aversion: f64,
    ) -> Result<OptimalPortfolio, OptimizerError> {
        let estimate = RiskEstimate::from_history(history, self.config.min_observations)?;
        self.optimize(&estimate, prices, cash, risk_aversion)
    }

    /// Solve for optimal holdings given a risk estimate.
    pub fn optimize(
        &self,
        estimate: &RiskEstimate,
        prices: &BTreeMap<SecurityId, Decimal>,
        budget: Decimal,
        risk_aversion: f64,
    ) -> Result<OptimalPortfolio, OptimizerError> {
        if !(risk_aversion > 0.0 && risk_aversion.is_finite()) {
            return Err(OptimizerError::InvalidRiskAversion(risk_aversion));
        }
        if estimate.is_empty() {
            return Err(OptimizerError::InsufficientData {
                available: 0,
                required: 1,
            });
        }

        let n = estimate.len();
        let mut price_vec = Vec::with_capacity(n);
        for id in estimate.securities() {
            let price = prices
                .get(id)
                .copied()
                .ok_or_else(|| OptimizerError::MissingPrice(id.clone()))?;
            if price <= Decimal::ZERO {
                return Err(OptimizerError::InvalidPrice {
                    security: id.clone(),
                    price,
                });
            }
            price_vec.push(to_f64(price));
        }

        let (active, excluded): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| estimate.variance(i) > ZERO_VARIANCE);
        if active.is_empty() {
            return Err(OptimizerError::NoRiskyAssets);
        }

        let k = active.len();
        let cov = matrix::submatrix(estimate.covariance_matrix(), n, &active);
        let mu: Vec<f64> = active.iter().map(|&i| estimate.expected_payoffs()[i]).collect();
        let p: Vec<f64> = active.iter().map(|&i| price_vec[i]).collect();

        let (inverse, used_diagonal_fallback) =
            match matrix::invert(&cov, k, self.config.singular_tolerance) {
                Some(inv) => (inv, false),
                None => {
                    warn!(
                        securities = k,
                        "Covariance matrix singular, using diagonal approximation"
                    );
                    (diagonal_inverse(&cov, k), true)
                }
            };

        let inv_mu = matrix::mat_vec(&inverse, k, &mu);
        let inv_p = matrix::mat_vec(&inverse, k, &p);
        let p_inv_p = matrix::dot(&p, &inv_p);
        let p_inv_mu = matrix::dot(&p, &inv_mu);

        if !(p_inv_p > 0.0 && p_inv_p.is_finite() && p_inv_mu.is_finite()) {
            return Err(OptimizerError::NoRiskyAssets);
        }

        let budget_f = to_f64(budget);
        let two_lambda = 2.0 * risk_aversion;
        let gamma = (p_inv_mu - two_lambda * budget_f) / p_inv_p;

        let weights: Vec<f64> = (0..k)
            .map(|i| (inv_mu[i] - gamma * inv_p[i]) / two_lambda)
            .collect();

        let mut full = vec![0.0; n];
        for (slot, &i) in active.iter().enumerate() {
            full[i] = weights[slot];
        }

        let holdings: HoldingsVector = estimate
            .securities()
            .iter()
            .zip(&full)
            .map(|(id, &h)| (id.clone(), from_f64(h)))
            .collect();

        let expected_payoffs = estimate
            .securities()
            .iter()
            .zip(estimate.expected_payoffs())
            .map(|(id, &mu)| (id.clone(), from_f64(mu)))
            .collect();

        let expected_payoff = matrix::dot(estimate.expected_payoffs(), &full);
        let payoff_variance = estimate.portfolio_variance(&full);

        debug!(
            securities = n,
            excluded = excluded.len(),
            used_diagonal_fallback,
            implied_rate = gamma,
            expected_payoff,
            payoff_variance,
            "Optimal holdings computed"
        );

        Ok(OptimalPortfolio {
            holdings,
            expected_payoffs,
            used_diagonal_fallback,
            excluded: excluded
                .into_iter()
                .map(|i| estimate.securities()[i].clone())
                .collect(),
            implied_rate: gamma,
            expected_payoff,
            payoff_variance,
            risk: estimate.clone(),
            risk_aversion,
        })
    }
}

/// Inverse of the zero-correlation approximation `diag(σ²)`.
fn diagonal_inverse(cov: &[f64], n: usize) -> Vec<f64> {
    let mut inv = matrix::diagonal_of(cov, n);
    for i in 0..n {
        let v = inv[i * n + i];
        inv[i * n + i] = if v > ZERO_VARIANCE { 1.0 / v } else { 0.0 };
    }
    inv
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> SecurityId {
        SecurityId::from(s)
    }

    fn optimizer() -> PortfolioOptimizer {
        PortfolioOptimizer::new(OptimizerConfig::default())
    }

    fn history_from(rows: &[(&str, &[f64])]) -> PriceHistory {
        let mut history = PriceHistory::new(100);
        for (name, series) in rows {
            for &price in series.iter() {
                history.push(id(name), price);
            }
        }
        history
    }

    fn assert_budget(portfolio: &OptimalPortfolio, prices: &BTreeMap<SecurityId, Decimal>, cash: Decimal) {
        let invested = to_f64(portfolio.invested_value(prices));
        let cash = to_f64(cash);
        let error = (invested - cash).abs() / cash.abs().max(1.0);
        assert!(error < 1e-6, "invested {} vs budget {}", invested, cash);
    }

    const A: &[f64] = &[10.0, 10.4, 9.8, 10.1, 10.6, 9.7, 10.2, 10.0, 9.9, 10.3, 10.5, 9.6];
    const B: &[f64] = &[20.0, 19.5, 20.8, 20.1, 19.7, 20.6, 20.2, 19.4, 20.9, 20.0, 19.8, 20.3];
    const C: &[f64] = &[5.0, 5.2, 5.1, 4.8, 5.3, 4.9, 5.0, 5.4, 4.7, 5.1, 5.2, 4.9];

    #[test]
    fn test_budget_invariant_holds() {
        let history = history_from(&[("A", A), ("B", B), ("C", C)]);
        let prices = BTreeMap::from([
            (id("A"), dec!(10.05)),
            (id("B"), dec!(20.10)),
            (id("C"), dec!(5.02)),
        ]);

        for (cash, lambda) in [
            (dec!(10000), 0.007),
            (dec!(250), 0.5),
            (dec!(1), 3.0),
            (dec!(-500), 0.01),
        ] {
            let portfolio = optimizer()
                .compute_optimal_holdings(&prices, &history, cash, lambda)
                .unwrap();
            assert!(!portfolio.used_diagonal_fallback);
            assert_budget(&portfolio, &prices, cash);
        }
    }

    #[test]
    fn test_single_security_takes_whole_budget() {
        let history = history_from(&[("A", A)]);
        let prices = BTreeMap::from([(id("A"), dec!(10))]);

        let portfolio = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(1000), 0.1)
            .unwrap();

        let holding = to_f64(portfolio.holdings.get(&id("A")));
        assert!((holding - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_insufficient_history_fails() {
        let history = history_from(&[("A", &[10.0, 10.1])]);
        let prices = BTreeMap::from([(id("A"), dec!(10))]);

        let err = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(1000), 0.1)
            .unwrap_err();
        assert!(matches!(err, OptimizerError::InsufficientData { available: 2, .. }));
    }

    #[test]
    fn test_singular_covariance_falls_back_to_diagonal() {
        // B moves exactly twice as much as A: perfectly correlated
        let doubled: Vec<f64> = A.iter().map(|a| 2.0 * a).collect();
        let history = history_from(&[("A", A), ("B", &doubled)]);
        let prices = BTreeMap::from([(id("A"), dec!(10)), (id("B"), dec!(20))]);

        let portfolio = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(5000), 0.05)
            .unwrap();

        assert!(portfolio.used_diagonal_fallback);
        assert_budget(&portfolio, &prices, dec!(5000));
    }

    #[test]
    fn test_constant_price_security_excluded() {
        let flat = [7.0; 12];
        let history = history_from(&[("A", A), ("B", B), ("FLAT", &flat)]);
        let prices = BTreeMap::from([
            (id("A"), dec!(10)),
            (id("B"), dec!(20)),
            (id("FLAT"), dec!(7)),
        ]);

        let portfolio = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(3000), 0.02)
            .unwrap();

        assert_eq!(portfolio.excluded, vec![id("FLAT")]);
        assert_eq!(portfolio.holdings.get(&id("FLAT")), Decimal::ZERO);
        assert!(!portfolio.used_diagonal_fallback);
        assert_budget(&portfolio, &prices, dec!(3000));
    }

    #[test]
    fn test_all_constant_prices_rejected() {
        let history = history_from(&[("A", &[5.0; 12]), ("B", &[6.0; 12])]);
        let prices = BTreeMap::from([(id("A"), dec!(5)), (id("B"), dec!(6))]);

        let err = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(100), 0.1)
            .unwrap_err();
        assert_eq!(err, OptimizerError::NoRiskyAssets);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let history = history_from(&[("A", A)]);
        let prices = BTreeMap::from([(id("A"), dec!(10))]);

        assert!(matches!(
            optimizer().compute_optimal_holdings(&prices, &history, dec!(100), 0.0),
            Err(OptimizerError::InvalidRiskAversion(_))
        ));

        let zero_price = BTreeMap::from([(id("A"), Decimal::ZERO)]);
        assert!(matches!(
            optimizer().compute_optimal_holdings(&zero_price, &history, dec!(100), 0.1),
            Err(OptimizerError::InvalidPrice { .. })
        ));

        assert!(matches!(
            optimizer().compute_optimal_holdings(&BTreeMap::new(), &history, dec!(100), 0.1),
            Err(OptimizerError::MissingPrice(_))
        ));
    }

    #[test]
    fn test_higher_risk_aversion_reduces_variance() {
        let history = history_from(&[("A", A), ("B", B), ("C", C)]);
        let prices = BTreeMap::from([
            (id("A"), dec!(10)),
            (id("B"), dec!(20)),
            (id("C"), dec!(5)),
        ]);

        let bold = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(1000), 0.001)
            .unwrap();
        let timid = optimizer()
            .compute_optimal_holdings(&prices, &history, dec!(1000), 10.0)
            .unwrap();

        assert!(timid.payoff_variance <= bold.payoff_variance + 1e-9);
    }
}
