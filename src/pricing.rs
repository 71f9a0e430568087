//! Exchange-valid price rounding.
//!
//! Prices clustered at whole and half dollar levels attract resting order
//! walls. The rounder snaps a price sitting just past such a level to one
//! cent ahead of it (direction by action), using the tolerance configured for
//! the price's entry-limit bucket. Granularity 1.0 is tried before 0.5 and
//! the first match wins; this tie-break order encodes the exchange tick rule
//! and must not be reordered.

use crate::domain::{EntryLimitTable, OrderAction, PositionSide};
use std::sync::Arc;

/// Whole-dollar first, then half-dollar.
const GRANULARITIES: [f64; 2] = [1.0, 0.5];

/// One-cent nudge applied ahead of the snapped level.
const NUDGE: f64 = 0.01;

/// Stateless price rounding over an entry-limit table.
#[derive(Debug, Clone)]
pub struct PriceRounder {
    limits: Arc<EntryLimitTable>,
}

impl PriceRounder {
    pub fn new(limits: Arc<EntryLimitTable>) -> Self {
        Self { limits }
    }

    /// Shift a stop price away from the position by `offset` (added for
    /// longs, subtracted for shorts), then round.
    pub fn add_penny_and_round_stop(
        &self,
        price: f64,
        side: PositionSide,
        action: OrderAction,
        offset: f64,
    ) -> f64 {
        let shifted = match side {
            PositionSide::Long => price + offset,
            PositionSide::Short => price - offset,
        };
        self.round_price(shifted, action)
    }

    /// Snap `price` to an exchange-valid level for `action`.
    ///
    /// Buys snap one cent above the nearest whole/half level when within the
    /// bucket tolerance at or past it; sells snap one cent below when within
    /// tolerance at or short of it. Prices outside any bucket, or outside
    /// tolerance, pass through unchanged.
    pub fn round_price(&self, price: f64, action: OrderAction) -> f64 {
        let Some(limit) = self.limits.bucket_for(price) else {
            return price;
        };
        let tolerance = limit.price_round;

        for granularity in GRANULARITIES {
            let shifted = price + (1.0 - granularity);
            let whole = shifted.round();
            let remainder = shifted - whole;

            let within = match action {
                OrderAction::Buy => remainder >= 0.0 && remainder <= tolerance,
                OrderAction::Sell => remainder <= 0.0 && remainder >= -tolerance,
            };
            if within {
                let nudge = match action {
                    OrderAction::Buy => NUDGE,
                    OrderAction::Sell => -NUDGE,
                };
                return whole + nudge - (1.0 - granularity);
            }
        }
        price
    }
}
