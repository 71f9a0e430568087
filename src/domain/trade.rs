//! Trade — the aggregate over all orders opening and closing one position.

use super::ids::{StrategyId, TradeId};
use super::strategy::PositionSide;
use serde::{Deserialize, Serialize};

/// Aggregate fill state across every order belonging to one round trip.
///
/// All quantity/value fields are recomputed from scratch by the reconciler
/// whenever any sibling order's fill state changes; nothing here is patched
/// incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<TradeId>,
    pub strategy_id: StrategyId,
    /// Side defined by the order carrying `is_open_position`.
    pub side: PositionSide,
    /// Total filled quantity across all legs (open and close both count).
    pub total_quantity: u32,
    /// Signed net position: buys add, sells subtract.
    pub open_quantity: i64,
    /// Unsigned sum of `avg fill price x filled quantity` over all legs.
    pub total_value: f64,
    pub average_price: f64,
    pub total_commission: f64,
    pub profit_loss: f64,
    pub is_open: bool,
}

impl Trade {
    /// Create an unpersisted trade shell for the first order of a strategy.
    pub fn new(strategy_id: StrategyId, side: PositionSide) -> Self {
        Self {
            id: None,
            strategy_id,
            side,
            total_quantity: 0,
            open_quantity: 0,
            total_value: 0.0,
            average_price: 0.0,
            total_commission: 0.0,
            profit_loss: 0.0,
            is_open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trade_is_flat() {
        let trade = Trade::new(StrategyId(1), PositionSide::Long);
        assert!(!trade.is_open);
        assert_eq!(trade.open_quantity, 0);
        assert_eq!(trade.total_quantity, 0);
        assert!(trade.id.is_none());
    }

    #[test]
    fn trade_serialization_roundtrip() {
        let mut trade = Trade::new(StrategyId(3), PositionSide::Short);
        trade.id = Some(TradeId(9));
        trade.open_quantity = -200;
        trade.is_open = true;
        let json = serde_json::to_string(&trade).unwrap();
        let deser: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(trade.id, deser.id);
        assert_eq!(trade.open_quantity, deser.open_quantity);
        assert_eq!(trade.is_open, deser.is_open);
    }
}
