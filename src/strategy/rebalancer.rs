//! Reactive rebalancing toward the optimal portfolio.

use crate::config::{DecisionConfig, Materiality};
use crate::portfolio::OptimalPortfolio;
use crate::risk::PositionTracker;
use crate::utils::{round_down_to_lot, round_to_tick};
use crate::venue::{
    MarketData, OrderIntent, OrderPurpose, OrderSide, SecurityId, VenueLimits,
};
use rust_decimal::Decimal;
use tracing::debug;

/// Gap between target and current holdings of one security.
#[derive(Debug, Clone, PartialEq)]
pub struct Deviation {
    pub security: SecurityId,
    pub current: Decimal,
    pub target: Decimal,
    /// Mid price used for value-based materiality
    pub price: Decimal,
}

impl Deviation {
    /// Units needed to reach the target (positive = buy).
    pub fn gap(&self) -> Decimal {
        self.target - self.current
    }

    pub fn side(&self) -> OrderSide {
        if self.gap() > Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// Finds material deviations and sizes orders to close them.
#[derive(Debug, Clone)]
pub struct Rebalancer {
    materiality: Materiality,
    max_order_size: Decimal,
    limits: VenueLimits,
}

impl Rebalancer {
    pub fn new(config: &DecisionConfig, limits: VenueLimits) -> Self {
        Self {
            materiality: config.materiality,
            max_order_size: config.max_order_size,
            limits,
        }
    }

    /// Securities whose holding differs materially from the target.
    ///
    /// Securities without market data are not considered.
    pub fn material_deviations(
        &self,
        target: &OptimalPortfolio,
        tracker: &PositionTracker,
        market: &MarketData,
    ) -> Vec<Deviation> {
        target
            .holdings
            .iter()
            .filter_map(|(id, &target_qty)| {
                let security = market.get(id)?;
                let deviation = Deviation {
                    security: id.clone(),
                    current: tracker.holding(id),
                    target: target_qty,
                    price: security.quote.mid(),
                };
                self.materiality
                    .is_material(deviation.gap(), deviation.price)
                    .then_some(deviation)
            })
            .collect()
    }

    /// One REBALANCE intent per deviation that has no order in flight.
    pub fn intents(
        &self,
        deviations: &[Deviation],
        tracker: &PositionTracker,
        market: &MarketData,
    ) -> Vec<OrderIntent> {
        let mut intents = Vec::new();

        for deviation in deviations {
            if tracker.has_pending(&deviation.security, OrderPurpose::Rebalance) {
                debug!(security = %deviation.security, "Rebalance already pending");
                continue;
            }
            let Some(security) = market.get(&deviation.security) else {
                continue;
            };

            let quantity = round_down_to_lot(deviation.gap().abs(), self.limits.lot_size)
                .min(round_down_to_lot(self.max_order_size, self.limits.lot_size));
            if quantity <= Decimal::ZERO {
                continue;
            }

            let side = deviation.side();
            let raw_price = match side {
                OrderSide::Buy => security.quote.buy_price(),
                OrderSide::Sell => security.quote.sell_price(),
            };
            let price = round_to_tick(raw_price, self.limits.tick_size)
                .max(self.limits.min_price)
                .min(self.limits.max_price);

            debug!(
                security = %deviation.security,
                current = %deviation.current,
                target = %deviation.target,
                side = ?side,
                quantity = %quantity,
                price = %price,
                "Rebalance intent"
            );

            intents.push(OrderIntent {
                security: deviation.security.clone(),
                side,
                price,
                quantity,
                purpose: OrderPurpose::Rebalance,
            });
        }

        intents
    }
}
