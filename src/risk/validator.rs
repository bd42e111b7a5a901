//! Pre-submission order checks against venue constraints.

use super::position_tracker::PositionTracker;
use crate::portfolio::describe;
use crate::utils::is_multiple_of;
use crate::venue::{OrderIntent, OrderPurpose, OrderSide, SecurityId, VenueLimits};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Why an intent may not be sent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("price {price} is not a multiple of tick {tick}")]
    PriceOffTick { price: Decimal, tick: Decimal },

    #[error("price {price} outside [{min}, {max}]")]
    PriceOutOfBounds {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("quantity {0} must be positive")]
    NonPositiveQuantity(Decimal),

    #[error("quantity {quantity} exceeds max order size {max}")]
    QuantityTooLarge { quantity: Decimal, max: Decimal },

    #[error("quantity {quantity} is not a multiple of lot {lot}")]
    QuantityOffLot { quantity: Decimal, lot: Decimal },

    #[error("insufficient cash: need {required}, available {available}")]
    InsufficientCash {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient units of {security}: need {required}, available {available}")]
    InsufficientUnits {
        security: SecurityId,
        required: Decimal,
        available: Decimal,
    },

    #[error("{purpose} order already pending for {security}")]
    DuplicatePending {
        security: SecurityId,
        purpose: OrderPurpose,
    },

    #[error("order at {price} would cross our own resting order on {security}")]
    SelfCross { security: SecurityId, price: Decimal },

    #[error("outstanding order limit {0} reached")]
    TooManyOrders(usize),
}

/// Result of validating one tick's intents.
#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    pub accepted: Vec<OrderIntent>,
    pub rejected: Vec<(OrderIntent, RejectReason)>,
}

/// Resources claimed by intents accepted earlier in the same batch.
#[derive(Debug, Default)]
struct Reservations<'a> {
    cash: Decimal,
    units: BTreeMap<SecurityId, Decimal>,
    accepted: Vec<&'a OrderIntent>,
}

/// Checks order intents against venue limits and the tracker's state.
#[derive(Debug, Clone)]
pub struct OrderValidator {
    limits: VenueLimits,
}

impl OrderValidator {
    pub fn new(limits: VenueLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &VenueLimits {
        &self.limits
    }

    /// Validate a single intent.
    pub fn validate(
        &self,
        intent: &OrderIntent,
        tracker: &PositionTracker,
    ) -> Result<(), RejectReason> {
        self.check(intent, tracker, &Reservations::default())
    }

    /// Validate intents in order, charging each accepted one against the
    /// cash, units and order slots available to the ones after it.
    pub fn validate_batch(
        &self,
        intents: Vec<OrderIntent>,
        tracker: &PositionTracker,
    ) -> BatchValidation {
        let mut accepted_idx = Vec::new();
        let mut rejected = Vec::new();

        {
            let mut reservations = Reservations::default();
            for (i, intent) in intents.iter().enumerate() {
                match self.check(intent, tracker, &reservations) {
                    Ok(()) => {
                        match intent.side {
                            OrderSide::Buy => reservations.cash += intent.notional(),
                            OrderSide::Sell => {
                                *reservations
                                    .units
                                    .entry(intent.security.clone())
                                    .or_insert(Decimal::ZERO) += intent.quantity
                            }
                        }
                        reservations.accepted.push(intent);
                        accepted_idx.push(i);
                    }
                    Err(reason) => {
                        warn!(
                            order = %describe(intent),
                            purpose = %intent.purpose,
                            reason = %reason,
                            "Order intent rejected"
                        );
                        rejected.push((i, reason));
                    }
                }
            }
        }

        let mut slots: Vec<Option<OrderIntent>> = intents.into_iter().map(Some).collect();
        let accepted = accepted_idx
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();
        let rejected = rejected
            .into_iter()
            .filter_map(|(i, reason)| slots[i].take().map(|intent| (intent, reason)))
            .collect();

        BatchValidation { accepted, rejected }
    }

    fn check(
        &self,
        intent: &OrderIntent,
        tracker: &PositionTracker,
        reserved: &Reservations<'_>,
    ) -> Result<(), RejectReason> {
        let limits = &self.limits;

        if intent.price < limits.min_price || intent.price > limits.max_price {
            return Err(RejectReason::PriceOutOfBounds {
                price: intent.price,
                min: limits.min_price,
                max: limits.max_price,
            });
        }
        if !is_multiple_of(intent.price, limits.tick_size) {
            return Err(RejectReason::PriceOffTick {
                price: intent.price,
                tick: limits.tick_size,
            });
        }

        if intent.quantity <= Decimal::ZERO {
            return Err(RejectReason::NonPositiveQuantity(intent.quantity));
        }
        if intent.quantity > limits.max_order_size {
            return Err(RejectReason::QuantityTooLarge {
                quantity: intent.quantity,
                max: limits.max_order_size,
            });
        }
        if !is_multiple_of(intent.quantity, limits.lot_size) {
            return Err(RejectReason::QuantityOffLot {
                quantity: intent.quantity,
                lot: limits.lot_size,
            });
        }

        if tracker.pending_count() + reserved.accepted.len() >= limits.max_outstanding_orders {
            return Err(RejectReason::TooManyOrders(limits.max_outstanding_orders));
        }

        let duplicate = match intent.purpose {
            OrderPurpose::Rebalance => {
                tracker.has_pending(&intent.security, intent.purpose)
                    || reserved.accepted.iter().any(|o| {
                        o.security == intent.security && o.purpose == intent.purpose
                    })
            }
            // A quote pair goes out together; nothing new while any leg of an
            // earlier pair rests
            OrderPurpose::MarketMake => {
                tracker.has_pending(&intent.security, intent.purpose)
                    || reserved.accepted.iter().any(|o| {
                        o.security == intent.security
                            && o.purpose == intent.purpose
                            && o.side == intent.side
                    })
            }
        };
        if duplicate {
            return Err(RejectReason::DuplicatePending {
                security: intent.security.clone(),
                purpose: intent.purpose,
            });
        }

        let resting = tracker
            .pending_for(&intent.security)
            .map(|o| &o.intent)
            .chain(
                reserved
                    .accepted
                    .iter()
                    .copied()
                    .filter(|o| o.security == intent.security),
            );
        for other in resting {
            let crosses = match (intent.side, other.side) {
                (OrderSide::Buy, OrderSide::Sell) => intent.price >= other.price,
                (OrderSide::Sell, OrderSide::Buy) => intent.price <= other.price,
                _ => false,
            };
            if crosses {
                return Err(RejectReason::SelfCross {
                    security: intent.security.clone(),
                    price: intent.price,
                });
            }
        }

        match intent.side {
            OrderSide::Buy => {
                let available = tracker.cash_available() - reserved.cash;
                let required = intent.notional();
                if required > available {
                    return Err(RejectReason::InsufficientCash {
                        required,
                        available,
                    });
                }
            }
            OrderSide::Sell => {
                let already = reserved
                    .units
                    .get(&intent.security)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                let available =
                    tracker.units_available(&intent.security) - already + limits.short_capacity;
                if intent.quantity > available {
                    return Err(RejectReason::InsufficientUnits {
                        security: intent.security.clone(),
                        required: intent.quantity,
                        available,
                    });
                }
            }
        }

        Ok(())
    }
}
