//! Closing-window market making around fair value.

use crate::config::QuotingConfig;
use crate::portfolio::OptimalPortfolio;
use crate::risk::PositionTracker;
use crate::utils::{round_down_to_lot, round_down_to_tick, round_up_to_tick};
use crate::venue::{MarketData, OrderIntent, OrderPurpose, OrderSide, SecurityId, VenueLimits};
use rust_decimal::Decimal;
use tracing::debug;

/// Builds bid/ask quote pairs from the optimizer's fair values.
#[derive(Debug, Clone)]
pub struct Quoter {
    config: QuotingConfig,
    max_order_size: Decimal,
    limits: VenueLimits,
}

impl Quoter {
    pub fn new(config: QuotingConfig, max_order_size: Decimal, limits: VenueLimits) -> Self {
        Self {
            config,
            max_order_size,
            limits,
        }
    }

    /// Bid and ask prices around a fair value, or `None` if the bounds leave
    /// no room for a spread.
    pub fn quote_prices(&self, fair: Decimal) -> Option<(Decimal, Decimal)> {
        let half_spread = fair * self.config.half_spread_pct;
        let bid = round_down_to_tick(fair - half_spread, self.limits.tick_size)
            .max(self.limits.min_price);
        let ask = round_up_to_tick(fair + half_spread, self.limits.tick_size)
            .min(self.limits.max_price);
        (bid < ask && bid <= self.limits.max_price && ask >= self.limits.min_price)
            .then_some((bid, ask))
    }

    /// Leg size allowed by quote size, order cap and inventory budget.
    pub fn leg_size(&self, side: OrderSide, holding: Decimal) -> Decimal {
        let room = match side {
            OrderSide::Buy => self.config.max_inventory_units - holding,
            OrderSide::Sell => self.config.max_inventory_units + holding,
        };
        let size = self.config.quote_size.min(self.max_order_size).min(room);
        round_down_to_lot(size.max(Decimal::ZERO), self.limits.lot_size)
    }

    /// MARKET_MAKE intents for every security with a fair value.
    ///
    /// A security is not requoted while any leg of its previous quote is
    /// still resting.
    pub fn intents(
        &self,
        target: &OptimalPortfolio,
        tracker: &PositionTracker,
        market: &MarketData,
    ) -> Vec<OrderIntent> {
        let (holdings, cash) = tracker.snapshot();
        let performance = target.performance();
        let mut intents = Vec::new();

        for (id, &fair) in &target.expected_payoffs {
            if !market.contains_key(id) || fair <= Decimal::ZERO {
                continue;
            }
            if tracker.has_pending(id, OrderPurpose::MarketMake) {
                debug!(security = %id, "Previous quote still resting");
                continue;
            }
            let Some((bid, ask)) = self.quote_prices(fair) else {
                debug!(security = %id, fair = %fair, "No room to quote");
                continue;
            };

            for (side, price) in [(OrderSide::Buy, bid), (OrderSide::Sell, ask)] {
                let quantity = self.leg_size(side, holdings.get(id));
                if quantity <= Decimal::ZERO {
                    debug!(security = %id, side = ?side, "Inventory limit reached");
                    continue;
                }

                let intent = quote(id, side, price, quantity);
                if self.config.require_performance_gain
                    && !performance.improves(cash.total, &holdings, &intent)
                {
                    debug!(security = %id, side = ?side, price = %price, "Quote would lower performance");
                    continue;
                }
                intents.push(intent);
            }
        }

        intents
    }
}

fn quote(id: &SecurityId, side: OrderSide, price: Decimal, quantity: Decimal) -> OrderIntent {
    OrderIntent {
        security: id.clone(),
        side,
        price,
        quantity,
        purpose: OrderPurpose::MarketMake,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::RiskEstimate;
    use crate::venue::{HoldingsVector, MarketQuote, OrderId, Security, SecurityClass};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn quoter() -> Quoter {
        Quoter::new(QuotingConfig::default(), dec!(10), VenueLimits::default())
    }

    fn market(name: &str) -> MarketData {
        let id = SecurityId::from(name);
        BTreeMap::from([(
            id.clone(),
            Security {
                id,
                class: SecurityClass::Stock,
                quote: MarketQuote::new(Some(dec!(9.9)), Some(dec!(10.1)), dec!(10)),
            },
        )])
    }

    fn fair(name: &str, value: Decimal) -> OptimalPortfolio {
        OptimalPortfolio::fixed(
            HoldingsVector::new(),
            BTreeMap::from([(SecurityId::from(name), value)]),
        )
    }

    #[test]
    fn test_quote_prices_straddle_fair_value() {
        // 1% of 10.005 = 0.10005
        assert_eq!(
            quoter().quote_prices(dec!(10.005)),
            Some((dec!(9.90), dec!(10.11)))
        );
    }

    #[test]
    fn test_quote_prices_clamped_to_bounds() {
        let (bid, ask) = quoter().quote_prices(dec!(0.011)).unwrap();
        assert_eq!(bid, dec!(0.01));
        assert_eq!(ask, dec!(0.02));
    }

    #[test]
    fn test_leg_size_respects_inventory() {
        let quoter = quoter();
        assert_eq!(quoter.leg_size(OrderSide::Buy, dec!(0)), dec!(1));
        assert_eq!(quoter.leg_size(OrderSide::Buy, dec!(50)), dec!(0));
        assert_eq!(quoter.leg_size(OrderSide::Sell, dec!(-50)), dec!(0));
        assert_eq!(quoter.leg_size(OrderSide::Sell, dec!(-49.5)), dec!(0));
    }

    #[test]
    fn test_emits_bid_and_ask() {
        let tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        let intents = quoter().intents(&fair("A", dec!(10)), &tracker, &market("A"));

        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].side, OrderSide::Buy);
        assert_eq!(intents[0].price, dec!(9.90));
        assert_eq!(intents[1].side, OrderSide::Sell);
        assert_eq!(intents[1].price, dec!(10.10));
        assert!(intents.iter().all(|i| i.purpose == OrderPurpose::MarketMake));
    }

    #[test]
    fn test_no_new_quote_while_one_leg_rests() {
        // Bid of the previous pair filled, the ask is still resting
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        tracker.register_pending(
            OrderId(1),
            quote(&SecurityId::from("A"), OrderSide::Sell, dec!(10.10), dec!(1)),
            Utc::now(),
        );

        let intents = quoter().intents(&fair("A", dec!(10)), &tracker, &market("A"));
        assert!(intents.is_empty());
    }

    #[test]
    fn test_rebalance_order_does_not_block_quotes() {
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        tracker.register_pending(
            OrderId(1),
            OrderIntent {
                security: SecurityId::from("A"),
                side: OrderSide::Buy,
                price: dec!(9.50),
                quantity: dec!(1),
                purpose: OrderPurpose::Rebalance,
            },
            Utc::now(),
        );

        let intents = quoter().intents(&fair("A", dec!(10)), &tracker, &market("A"));
        assert_eq!(intents.len(), 2);
    }

    #[test]
    fn test_performance_filter_drops_losing_leg() {
        let a = SecurityId::from("A");
        let config = QuotingConfig {
            require_performance_gain: true,
            ..QuotingConfig::default()
        };
        let quoter = Quoter::new(config, dec!(10), VenueLimits::default());

        // Large long position in a volatile security: buying more adds risk
        // worth more than the spread earned, selling reduces it
        let mut target = fair("A", dec!(10));
        target.risk = RiskEstimate::from_state_payoffs(BTreeMap::from([(
            a.clone(),
            vec![0.0, 20.0],
        )]))
        .unwrap();
        target.risk_aversion = 0.05;

        let holdings: HoldingsVector = [(a, dec!(20))].into_iter().collect();
        let tracker = PositionTracker::new(holdings, dec!(1000));
        let intents = quoter.intents(&target, &tracker, &market("A"));

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Sell);
    }
}
