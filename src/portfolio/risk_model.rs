//! Payoff mean and covariance estimation.

use super::history::PriceHistory;
use super::matrix;
use super::OptimizerError;
use crate::venue::SecurityId;
use std::collections::BTreeMap;

/// Expected payoff and covariance of the traded securities.
///
/// The covariance matrix is the average of outer products of deviations from
/// the mean, so it is symmetric and positive semi-definite by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskEstimate {
    securities: Vec<SecurityId>,
    expected_payoffs: Vec<f64>,
    /// Row-major `n x n`
    covariance: Vec<f64>,
    observations: usize,
}

impl RiskEstimate {
    /// Estimate from the aligned tail of a price-history window.
    pub fn from_history(
        history: &PriceHistory,
        min_observations: usize,
    ) -> Result<Self, OptimizerError> {
        let available = history.aligned_len();
        let required = min_observations.max(2);
        if available < required {
            return Err(OptimizerError::InsufficientData {
                available,
                required,
            });
        }

        let mut samples = BTreeMap::new();
        for id in history.securities() {
            if let Some(series) = history.tail(id, available) {
                samples.insert(id.clone(), series);
            }
        }

        Ok(Self::from_samples(samples))
    }

    /// Estimate from a table of equiprobable state payoffs.
    ///
    /// Each security lists its payoff in every state of the world; all states
    /// are equally likely, so the formulas match the sample estimate.
    pub fn from_state_payoffs(
        payoffs: BTreeMap<SecurityId, Vec<f64>>,
    ) -> Result<Self, OptimizerError> {
        let states = payoffs.values().map(Vec::len).min().unwrap_or(0);
        if states == 0 || payoffs.values().any(|p| p.len() != states) {
            return Err(OptimizerError::InsufficientData {
                available: states,
                required: 1,
            });
        }
        Ok(Self::from_samples(payoffs))
    }

    fn from_samples(samples: BTreeMap<SecurityId, Vec<f64>>) -> Self {
        let securities: Vec<SecurityId> = samples.keys().cloned().collect();
        let series: Vec<Vec<f64>> = samples.into_values().collect();
        let n = securities.len();
        let t = series.first().map(Vec::len).unwrap_or(0);

        let expected_payoffs: Vec<f64> = series
            .iter()
            .map(|s| s.iter().sum::<f64>() / t.max(1) as f64)
            .collect();

        let mut covariance = vec![0.0; n * n];
        for obs in 0..t {
            let deviation: Vec<f64> = (0..n)
                .map(|i| series[i][obs] - expected_payoffs[i])
                .collect();
            for i in 0..n {
                for j in i..n {
                    covariance[i * n + j] += deviation[i] * deviation[j];
                }
            }
        }

        let norm = t.max(1) as f64;
        for i in 0..n {
            for j in i..n {
                let value = covariance[i * n + j] / norm;
                covariance[i * n + j] = value;
                covariance[j * n + i] = value;
            }
        }

        Self {
            securities,
            expected_payoffs,
            covariance,
            observations: t,
        }
    }

    pub fn securities(&self) -> &[SecurityId] {
        &self.securities
    }

    pub fn len(&self) -> usize {
        self.securities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.securities.is_empty()
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn index_of(&self, id: &SecurityId) -> Option<usize> {
        self.securities.iter().position(|s| s == id)
    }

    pub fn expected_payoffs(&self) -> &[f64] {
        &self.expected_payoffs
    }

    pub fn expected_payoff(&self, id: &SecurityId) -> Option<f64> {
        self.index_of(id).map(|i| self.expected_payoffs[i])
    }

    /// Row-major covariance matrix.
    pub fn covariance_matrix(&self) -> &[f64] {
        &self.covariance
    }

    pub fn covariance(&self, i: usize, j: usize) -> f64 {
        self.covariance[i * self.len() + j]
    }

    pub fn variance(&self, i: usize) -> f64 {
        self.covariance(i, i)
    }

    /// Payoff variance of a holdings vector given in estimate order.
    pub fn portfolio_variance(&self, holdings: &[f64]) -> f64 {
        matrix::quadratic_form(&self.covariance, self.len(), holdings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SecurityId {
        SecurityId::from(s)
    }

    #[test]
    fn test_insufficient_history() {
        let mut history = PriceHistory::new(10);
        history.push(id("A"), 1.0);
        history.push(id("A"), 2.0);

        let err = RiskEstimate::from_history(&history, 5).unwrap_err();
        assert_eq!(
            err,
            OptimizerError::InsufficientData {
                available: 2,
                required: 5
            }
        );
    }

    #[test]
    fn test_mean_and_covariance_from_history() {
        let mut history = PriceHistory::new(10);
        for (a, b) in [(1.0, 2.0), (3.0, 2.0), (2.0, 5.0), (2.0, -1.0)] {
            history.push(id("A"), a);
            history.push(id("B"), b);
        }

        let estimate = RiskEstimate::from_history(&history, 4).unwrap();
        assert_eq!(estimate.expected_payoff(&id("A")), Some(2.0));
        assert_eq!(estimate.expected_payoff(&id("B")), Some(2.0));
        // Var(A) = (1 + 1 + 0 + 0) / 4
        assert!((estimate.variance(0) - 0.5).abs() < 1e-12);
        // Var(B) = (0 + 0 + 9 + 9) / 4
        assert!((estimate.variance(1) - 4.5).abs() < 1e-12);
        // Cov = (0 + 0 + 0 + 0) / 4
        assert!(estimate.covariance(0, 1).abs() < 1e-12);
        assert_eq!(estimate.covariance(0, 1), estimate.covariance(1, 0));
    }

    #[test]
    fn test_state_payoff_table() {
        // Four equiprobable states
        let payoffs = BTreeMap::from([
            (id("A"), vec![10.0, 0.0, 10.0, 0.0]),
            (id("B"), vec![0.0, 10.0, 0.0, 10.0]),
        ]);
        let estimate = RiskEstimate::from_state_payoffs(payoffs).unwrap();

        assert_eq!(estimate.expected_payoffs(), &[5.0, 5.0]);
        assert!((estimate.variance(0) - 25.0).abs() < 1e-12);
        assert!((estimate.covariance(0, 1) + 25.0).abs() < 1e-12);
        // Perfect hedge: one unit of each has no variance
        assert!(estimate.portfolio_variance(&[1.0, 1.0]).abs() < 1e-12);
    }

    #[test]
    fn test_ragged_state_table_rejected() {
        let payoffs = BTreeMap::from([(id("A"), vec![1.0, 2.0]), (id("B"), vec![1.0])]);
        assert!(RiskEstimate::from_state_payoffs(payoffs).is_err());
    }
}
