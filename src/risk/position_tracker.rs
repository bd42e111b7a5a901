//! Holdings, cash and pending-order bookkeeping.
//!
//! The tracker is the bot's view of its own account. It changes only when the
//! venue confirms something (a fill or a cancel) or when the bot explicitly
//! resyncs from the venue after losing connectivity.

use crate::venue::{
    CashState, HoldingsVector, OrderId, OrderIntent, OrderPurpose, OrderSide, SecurityId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Order accepted by the venue and not yet fully filled or cancelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOrder {
    pub order_id: OrderId,
    pub intent: OrderIntent,
    pub remaining: Decimal,
    pub submitted_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Cash reserved by the unfilled part of a buy.
    pub fn reserved_cash(&self) -> Decimal {
        match self.intent.side {
            OrderSide::Buy => self.remaining * self.intent.price,
            OrderSide::Sell => Decimal::ZERO,
        }
    }

    /// Units reserved by the unfilled part of a sell.
    pub fn reserved_units(&self) -> Decimal {
        match self.intent.side {
            OrderSide::Buy => Decimal::ZERO,
            OrderSide::Sell => self.remaining,
        }
    }
}

/// Fill ids remembered for deduplication. Venues redeliver recent fills only,
/// so the oldest ids are forgotten first.
const MAX_REMEMBERED_FILLS: usize = 10_000;

/// Result of applying a fill confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Applied,
    /// The fill id was seen before
    Duplicate,
    /// No pending order and no security/side to fall back on
    UnknownOrder,
}

/// Tracks holdings, cash and our resting orders.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    holdings: HoldingsVector,
    cash: Decimal,
    pending: BTreeMap<OrderId, PendingOrder>,
    seen_fills: HashSet<u64>,
    fill_order: VecDeque<u64>,
}

impl PositionTracker {
    pub fn new(holdings: HoldingsVector, cash: Decimal) -> Self {
        Self {
            holdings,
            cash,
            pending: BTreeMap::new(),
            seen_fills: HashSet::new(),
            fill_order: VecDeque::new(),
        }
    }

    /// Apply a fill against a pending order.
    ///
    /// Idempotent by `fill_id`: a repeated confirmation changes nothing.
    pub fn apply_fill(
        &mut self,
        order_id: OrderId,
        fill_id: u64,
        price: Decimal,
        quantity: Decimal,
    ) -> FillOutcome {
        let Some(order) = self.pending.get(&order_id) else {
            warn!(order_id = %order_id, fill_id, "Fill for unknown order ignored");
            return FillOutcome::UnknownOrder;
        };
        let security = order.intent.security.clone();
        let side = order.intent.side;
        self.apply_fill_for(order_id, fill_id, &security, side, price, quantity)
    }

    /// Apply a fill that carries its own security and side.
    ///
    /// Used for fills on orders the tracker never registered, e.g. orders
    /// left over from a previous run.
    pub fn apply_fill_for(
        &mut self,
        order_id: OrderId,
        fill_id: u64,
        security: &SecurityId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> FillOutcome {
        if !self.remember_fill(fill_id) {
            debug!(order_id = %order_id, fill_id, "Duplicate fill ignored");
            return FillOutcome::Duplicate;
        }

        let signed = side.sign() * quantity;
        self.holdings.adjust(security, signed);
        self.cash -= signed * price;

        let mut completed = false;
        if let Some(order) = self.pending.get_mut(&order_id) {
            order.remaining = (order.remaining - quantity).max(Decimal::ZERO);
            completed = order.remaining.is_zero();
        } else {
            warn!(order_id = %order_id, security = %security, "Fill for untracked order applied");
        }
        if completed {
            self.pending.remove(&order_id);
        }

        info!(
            order_id = %order_id,
            security = %security,
            side = ?side,
            price = %price,
            quantity = %quantity,
            holding = %self.holdings.get(security),
            cash = %self.cash,
            "Fill applied"
        );

        FillOutcome::Applied
    }

    /// Record a fill id. Returns false if it was already seen.
    fn remember_fill(&mut self, fill_id: u64) -> bool {
        if !self.seen_fills.insert(fill_id) {
            return false;
        }
        self.fill_order.push_back(fill_id);
        if self.fill_order.len() > MAX_REMEMBERED_FILLS {
            if let Some(oldest) = self.fill_order.pop_front() {
                self.seen_fills.remove(&oldest);
            }
        }
        true
    }

    /// Drop a pending order after the venue confirmed its cancellation.
    pub fn apply_cancel(&mut self, order_id: OrderId) -> Option<PendingOrder> {
        let removed = self.pending.remove(&order_id);
        match &removed {
            Some(order) => debug!(
                order_id = %order_id,
                security = %order.intent.security,
                remaining = %order.remaining,
                "Cancel confirmed"
            ),
            None => debug!(order_id = %order_id, "Cancel confirmed for untracked order"),
        }
        removed
    }

    /// Record an order the venue accepted.
    pub fn register_pending(&mut self, order_id: OrderId, intent: OrderIntent, now: DateTime<Utc>) {
        let remaining = intent.quantity;
        self.pending.insert(
            order_id,
            PendingOrder {
                order_id,
                intent,
                remaining,
                submitted_at: now,
            },
        );
    }

    /// Current holdings and cash.
    pub fn snapshot(&self) -> (HoldingsVector, CashState) {
        (
            self.holdings.clone(),
            CashState {
                total: self.cash,
                available: self.cash_available(),
            },
        )
    }

    pub fn holdings(&self) -> &HoldingsVector {
        &self.holdings
    }

    pub fn holding(&self, security: &SecurityId) -> Decimal {
        self.holdings.get(security)
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Cash minus what pending buys would spend if filled.
    pub fn cash_available(&self) -> Decimal {
        let reserved: Decimal = self.pending.values().map(PendingOrder::reserved_cash).sum();
        self.cash - reserved
    }

    /// Holdings minus what pending sells would deliver if filled.
    pub fn units_available(&self, security: &SecurityId) -> Decimal {
        let reserved: Decimal = self
            .pending_for(security)
            .map(PendingOrder::reserved_units)
            .sum();
        self.holdings.get(security) - reserved
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingOrder> {
        self.pending.values()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_order(&self, order_id: OrderId) -> Option<&PendingOrder> {
        self.pending.get(&order_id)
    }

    pub fn is_tracked(&self, order_id: OrderId) -> bool {
        self.pending.contains_key(&order_id)
    }

    pub fn pending_for<'a>(
        &'a self,
        security: &'a SecurityId,
    ) -> impl Iterator<Item = &'a PendingOrder> + 'a {
        self.pending
            .values()
            .filter(move |o| &o.intent.security == security)
    }

    /// Whether any order of this purpose is pending for the security.
    pub fn has_pending(&self, security: &SecurityId, purpose: OrderPurpose) -> bool {
        self.pending_for(security)
            .any(|o| o.intent.purpose == purpose)
    }

    /// Overwrite holdings and cash with the venue's view.
    ///
    /// Pending orders are kept; fills for them still arrive as events.
    pub fn resync(&mut self, holdings: HoldingsVector, cash: Decimal) {
        let mut securities: Vec<&SecurityId> = self.holdings.securities().collect();
        securities.extend(holdings.securities());
        securities.sort();
        securities.dedup();

        for security in securities {
            let ours = self.holdings.get(security);
            let theirs = holdings.get(security);
            if ours != theirs {
                warn!(
                    security = %security,
                    tracked = %ours,
                    venue = %theirs,
                    "Holdings diverged from venue"
                );
            }
        }
        if self.cash != cash {
            warn!(tracked = %self.cash, venue = %cash, "Cash diverged from venue");
        }

        self.holdings = holdings;
        self.cash = cash;
        info!(
            cash = %self.cash,
            pending = self.pending.len(),
            "Position tracker resynced"
        );
    }

    /// Pending orders submitted at least `max_age` ago.
    pub fn stale_orders(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<OrderId> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        self.pending
            .values()
            .filter(|o| now - o.submitted_at >= max_age)
            .map(|o| o.order_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent(side: OrderSide, price: Decimal, quantity: Decimal) -> OrderIntent {
        OrderIntent {
            security: SecurityId::from("A"),
            side,
            price,
            quantity,
            purpose: OrderPurpose::Rebalance,
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_buy_fill_updates_holdings_and_cash() {
        let a = SecurityId::from("A");
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        tracker.register_pending(OrderId(1), intent(OrderSide::Buy, dec!(10), dec!(5)), t0());

        assert_eq!(tracker.cash_available(), dec!(950));

        let outcome = tracker.apply_fill(OrderId(1), 1, dec!(10), dec!(2));
        assert_eq!(outcome, FillOutcome::Applied);
        assert_eq!(tracker.holding(&a), dec!(2));
        assert_eq!(tracker.cash(), dec!(980));
        // Three units still pending at 10
        assert_eq!(tracker.cash_available(), dec!(950));
        assert_eq!(tracker.pending_order(OrderId(1)).unwrap().remaining, dec!(3));

        tracker.apply_fill(OrderId(1), 2, dec!(10), dec!(3));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.cash_available(), dec!(950));
        assert_eq!(tracker.holding(&a), dec!(5));
    }

    #[test]
    fn test_duplicate_fill_is_ignored() {
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        tracker.register_pending(OrderId(1), intent(OrderSide::Buy, dec!(10), dec!(5)), t0());

        tracker.apply_fill(OrderId(1), 42, dec!(10), dec!(2));
        let before = tracker.snapshot();
        let outcome = tracker.apply_fill(OrderId(1), 42, dec!(10), dec!(2));

        assert_eq!(outcome, FillOutcome::Duplicate);
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn test_sell_reserves_units() {
        let a = SecurityId::from("A");
        let holdings: HoldingsVector = [(a.clone(), dec!(4))].into_iter().collect();
        let mut tracker = PositionTracker::new(holdings, dec!(0));
        tracker.register_pending(OrderId(7), intent(OrderSide::Sell, dec!(12), dec!(3)), t0());

        assert_eq!(tracker.units_available(&a), dec!(1));
        assert_eq!(tracker.cash_available(), dec!(0));

        tracker.apply_fill(OrderId(7), 1, dec!(12), dec!(3));
        assert_eq!(tracker.holding(&a), dec!(1));
        assert_eq!(tracker.cash(), dec!(36));
        assert_eq!(tracker.units_available(&a), dec!(1));
    }

    #[test]
    fn test_cancel_releases_reservation() {
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(100));
        tracker.register_pending(OrderId(3), intent(OrderSide::Buy, dec!(20), dec!(2)), t0());
        assert_eq!(tracker.cash_available(), dec!(60));

        assert!(tracker.apply_cancel(OrderId(3)).is_some());
        assert_eq!(tracker.cash_available(), dec!(100));
        assert!(tracker.apply_cancel(OrderId(3)).is_none());
    }

    #[test]
    fn test_unknown_order_fill() {
        let a = SecurityId::from("A");
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(100));

        assert_eq!(
            tracker.apply_fill(OrderId(9), 1, dec!(5), dec!(1)),
            FillOutcome::UnknownOrder
        );
        assert_eq!(
            tracker.apply_fill_for(OrderId(9), 1, &a, OrderSide::Sell, dec!(5), dec!(1)),
            FillOutcome::Applied
        );
        assert_eq!(tracker.holding(&a), dec!(-1));
        assert_eq!(tracker.cash(), dec!(105));
    }

    #[test]
    fn test_fill_memory_is_bounded() {
        let a = SecurityId::from("A");
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000000));

        for fill_id in 1..=(MAX_REMEMBERED_FILLS as u64 + 1) {
            tracker.apply_fill_for(OrderId(fill_id), fill_id, &a, OrderSide::Buy, dec!(1), dec!(1));
        }

        assert_eq!(tracker.seen_fills.len(), MAX_REMEMBERED_FILLS);
        assert!(!tracker.seen_fills.contains(&1));
        let last = MAX_REMEMBERED_FILLS as u64 + 1;
        assert_eq!(
            tracker.apply_fill_for(OrderId(last), last, &a, OrderSide::Buy, dec!(1), dec!(1)),
            FillOutcome::Duplicate
        );
        assert_eq!(tracker.holding(&a), Decimal::from(last));
    }

    #[test]
    fn test_pending_lookup_by_purpose() {
        let a = SecurityId::from("A");
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        let mut quote = intent(OrderSide::Buy, dec!(9), dec!(1));
        quote.purpose = OrderPurpose::MarketMake;
        tracker.register_pending(OrderId(1), quote, t0());

        assert!(tracker.has_pending(&a, OrderPurpose::MarketMake));
        assert!(!tracker.has_pending(&a, OrderPurpose::Rebalance));
        assert!(!tracker.has_pending(&SecurityId::from("B"), OrderPurpose::MarketMake));
    }

    #[test]
    fn test_resync_keeps_pending_orders() {
        let a = SecurityId::from("A");
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        tracker.register_pending(OrderId(1), intent(OrderSide::Buy, dec!(10), dec!(1)), t0());

        let venue_holdings: HoldingsVector = [(a.clone(), dec!(3))].into_iter().collect();
        tracker.resync(venue_holdings, dec!(970));

        assert_eq!(tracker.holding(&a), dec!(3));
        assert_eq!(tracker.cash(), dec!(970));
        assert_eq!(tracker.pending_count(), 1);
        assert_eq!(tracker.cash_available(), dec!(960));
    }

    #[test]
    fn test_stale_orders() {
        let mut tracker = PositionTracker::new(HoldingsVector::new(), dec!(1000));
        tracker.register_pending(OrderId(1), intent(OrderSide::Buy, dec!(10), dec!(1)), t0());
        tracker.register_pending(
            OrderId(2),
            intent(OrderSide::Buy, dec!(10), dec!(1)),
            t0() + chrono::Duration::seconds(20),
        );

        let now = t0() + chrono::Duration::seconds(30);
        assert_eq!(
            tracker.stale_orders(now, Duration::from_secs(30)),
            vec![OrderId(1)]
        );
    }
}
