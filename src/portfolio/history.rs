//! Rolling price-history window feeding the risk model.

use crate::utils::to_f64;
use crate::venue::{MarketData, SecurityId};
use std::collections::{BTreeMap, VecDeque};

/// Fixed-capacity window of payoff observations per security.
///
/// Each tick appends one observation (the quote mid) per security; the oldest
/// observation is dropped once the window is full.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    capacity: usize,
    series: BTreeMap<SecurityId, VecDeque<f64>>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    /// Append one observation per security from a market data snapshot.
    pub fn record(&mut self, market: &MarketData) {
        for (id, security) in market {
            self.push(id.clone(), to_f64(security.quote.mid()));
        }
    }

    /// Append a single observation.
    pub fn push(&mut self, id: SecurityId, price: f64) {
        if !price.is_finite() {
            return;
        }
        let series = self.series.entry(id).or_default();
        series.push_back(price);
        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    /// Number of observations available for every tracked security.
    pub fn aligned_len(&self) -> usize {
        self.series.values().map(VecDeque::len).min().unwrap_or(0)
    }

    pub fn securities(&self) -> impl Iterator<Item = &SecurityId> {
        self.series.keys()
    }

    /// The most recent `n` observations of a security, oldest first.
    pub fn tail(&self, id: &SecurityId, n: usize) -> Option<Vec<f64>> {
        let series = self.series.get(id)?;
        if series.len() < n {
            return None;
        }
        Some(series.iter().skip(series.len() - n).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_bounded() {
        let mut history = PriceHistory::new(3);
        let a = SecurityId::from("A");
        for price in [1.0, 2.0, 3.0, 4.0, 5.0] {
            history.push(a.clone(), price);
        }

        assert_eq!(history.aligned_len(), 3);
        assert_eq!(history.tail(&a, 3).unwrap(), vec![3.0, 4.0, 5.0]);
        assert_eq!(history.tail(&a, 2).unwrap(), vec![4.0, 5.0]);
        assert!(history.tail(&a, 4).is_none());
    }

    #[test]
    fn test_aligned_length_uses_shortest_series() {
        let mut history = PriceHistory::new(10);
        history.push(SecurityId::from("A"), 1.0);
        history.push(SecurityId::from("A"), 1.1);
        history.push(SecurityId::from("B"), 2.0);

        assert_eq!(history.aligned_len(), 1);
    }

    #[test]
    fn test_non_finite_observations_ignored() {
        let mut history = PriceHistory::new(10);
        history.push(SecurityId::from("A"), f64::NAN);
        assert_eq!(history.aligned_len(), 0);
    }
}
