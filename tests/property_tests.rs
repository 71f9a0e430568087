//! Property tests for pricing and reconciliation invariants.
//!
//! Uses proptest to verify:
//! 1. Price rounding is idempotent and bounded by the bucket tolerance
//! 2. Money rounding is stable at five decimals
//! 3. Fill aggregation is independent of how a total is split into fills

mod common;

use proptest::prelude::*;
use std::sync::Arc;
use tradeflow::{
    round5, round_half_even, OrderAction, OrderKind, OrderRequest, Persistence, PriceRounder,
};

fn rounder() -> PriceRounder {
    PriceRounder::new(Arc::new(common::default_limits()))
}

fn arb_price() -> impl Strategy<Value = f64> {
    // Two-decimal prices inside the configured bucket.
    (100u32..4_999u32).prop_map(|cents| f64::from(cents) / 100.0)
}

fn arb_action() -> impl Strategy<Value = OrderAction> {
    prop_oneof![Just(OrderAction::Buy), Just(OrderAction::Sell)]
}

proptest! {
    /// Rounding an already-rounded price changes nothing.
    #[test]
    fn price_rounding_is_idempotent(price in arb_price(), action in arb_action()) {
        let r = rounder();
        let once = r.round_price(price, action);
        let twice = r.round_price(once, action);
        prop_assert!((once - twice).abs() < 1e-9, "once={once} twice={twice}");
    }

    /// A snapped price never moves further than tolerance plus the one-cent
    /// nudge, and always moves against the action's direction of urgency.
    #[test]
    fn price_rounding_is_bounded(price in arb_price(), action in arb_action()) {
        let r = rounder();
        let rounded = r.round_price(price, action);
        let moved = rounded - price;
        prop_assert!(moved.abs() <= 0.09 + 0.01 + 1e-9, "price={price} rounded={rounded}");
        match action {
            // Buys snap down to just above the level, sells snap up to just
            // below it.
            OrderAction::Buy => prop_assert!(moved <= 0.01 + 1e-9),
            OrderAction::Sell => prop_assert!(moved >= -(0.01 + 1e-9)),
        }
    }

    /// Five-decimal money rounding is a fixed point.
    #[test]
    fn money_rounding_is_stable(value in -1.0e6..1.0e6f64) {
        let once = round5(value);
        prop_assert_eq!(once, round5(once));
        // Result carries at most five decimals.
        let scaled = once * 1e5;
        prop_assert!((scaled - scaled.round()).abs() < 1e-4, "value={}", value);
    }

    /// Half-even: exact midpoints land on the even neighbor.
    #[test]
    fn midpoints_round_to_even(units in 0u32..1_000u32) {
        let value = f64::from(units) + 0.5;
        let rounded = round_half_even(value, 0);
        let rounded = rounded as i64;
        prop_assert_eq!(rounded % 2, 0, "value={} rounded={}", value, rounded);
    }

    /// The weighted average fill price depends only on the fill set's totals,
    /// not on how the quantity was split across execution reports.
    #[test]
    fn fill_aggregation_is_split_independent(split in 1u32..99u32) {
        let e = common::engine();
        let strategy = common::strategy();

        let mut order = e.factory.create_order(
            &strategy,
            OrderRequest::new(OrderAction::Buy, OrderKind::Market, 100),
        ).unwrap();
        order.fills.push(common::fill(20.0, split));
        order.fills.push(common::fill(20.5, 100 - split));
        let order = e.reconciler.persist_trade_orderfill(order).unwrap();

        prop_assert!(order.is_filled);
        prop_assert_eq!(order.filled_quantity, 100);
        let expected = round5((20.0 * f64::from(split) + 20.5 * f64::from(100 - split)) / 100.0);
        prop_assert_eq!(order.average_filled_price, expected);

        let trade = e.store.find_trade_for_strategy(common::STRATEGY_ID).unwrap().unwrap();
        prop_assert_eq!(trade.open_quantity, 100);
        prop_assert!(trade.is_open);
    }
}
