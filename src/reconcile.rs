//! Position reconciliation: folds an order's fill set into trade aggregates
//! and strategy lifecycle transitions.
//!
//! Every invocation re-reads the full sibling-order set from the system of
//! record and recomputes totals from scratch. The read-modify-write is
//! serialized behind one process-wide mutex: fills arrive on the broker
//! callback thread while workers persist new orders concurrently, and both
//! paths land here.

use crate::domain::{
    round5, OrderStatus, PositionSide, StrategyStatus, Trade, TradeOrder,
};
use crate::error::EngineError;
use crate::persistence::Persistence;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct PositionReconciler {
    persistence: Arc<dyn Persistence>,
    // Process-wide write serialization; sufficient at human order volumes.
    lock: Mutex<()>,
}

impl PositionReconciler {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            lock: Mutex::new(()),
        }
    }

    /// Fold an order's execution reports into its fill aggregates, then
    /// reconcile the trade.
    pub fn persist_trade_orderfill(&self, order: TradeOrder) -> Result<TradeOrder, EngineError> {
        let mut order = order;
        let filled: u32 = order.fills.iter().map(|f| f.quantity).sum();
        if filled > 0 {
            let value: f64 = order
                .fills
                .iter()
                .map(|f| f.price * f64::from(f.quantity))
                .sum();
            order.filled_quantity = filled;
            order.average_filled_price = round5(value / f64::from(filled));
            order.commission = round5(order.fills.iter().map(|f| f.commission).sum());
            if filled >= order.quantity {
                order.is_filled = true;
                order.status = OrderStatus::Filled;
                order.filled_date = order.fills.iter().map(|f| f.time).max();
            }
        }
        self.persist_trade_order(order)
    }

    /// Reconcile one order against its trade: resolve the trade shell,
    /// recompute aggregates over all sibling orders, and apply lifecycle
    /// transitions.
    pub fn persist_trade_order(&self, order: TradeOrder) -> Result<TradeOrder, EngineError> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut order = order;
        let key = order.order_key.ok_or(EngineError::MissingOrderKey)?;
        let mut strategy = self
            .persistence
            .find_tradestrategy_by_id(order.strategy_id)?;

        // First order for the strategy creates the trade shell; its action
        // defines the trade side and it becomes the open-position order.
        let mut trade = match self.persistence.find_trade_for_strategy(order.strategy_id)? {
            Some(trade) => trade,
            None => {
                let side = PositionSide::from_opening_action(order.action);
                order.is_open_position = true;
                let shell = Trade::new(order.strategy_id, side);
                let saved = self.persistence.save_trade(&shell)?;
                debug!(
                    strategy_id = %order.strategy_id,
                    trade_id = ?saved.id,
                    ?side,
                    "created trade shell"
                );
                saved
            }
        };
        order.trade_id = trade.id;

        if order.quantity > 0 && order.filled_quantity == order.quantity {
            order.is_filled = true;
            order.status = OrderStatus::Filled;
        }

        // Recompute over the full sibling set with the incoming order
        // substituted in.
        let trade_id = trade.id.ok_or_else(|| {
            EngineError::Internal("trade shell was saved without an id".to_string())
        })?;
        let mut siblings = self.persistence.find_orders_by_trade(trade_id)?;
        match siblings.iter_mut().find(|o| o.order_key == Some(key)) {
            Some(existing) => *existing = order.clone(),
            None => siblings.push(order.clone()),
        }

        let mut all_cancelled = true;
        let mut total_filled: u32 = 0;
        let mut open_quantity: i64 = 0;
        let mut total_value = 0.0;
        let mut net_value = 0.0;
        let mut total_commission = 0.0;
        for sibling in &siblings {
            if sibling.status != OrderStatus::Cancelled {
                all_cancelled = false;
            }
            if sibling.filled_quantity > 0 {
                let qty = f64::from(sibling.filled_quantity);
                let value = sibling.average_filled_price * qty;
                total_filled += sibling.filled_quantity;
                open_quantity += sibling.action.sign() * i64::from(sibling.filled_quantity);
                total_value += value;
                // Net proceeds: sells add, buys subtract.
                net_value -= sibling.action.sign() as f64 * value;
                total_commission += sibling.commission;
            }
        }

        if total_filled > 0 && total_filled != trade.total_quantity {
            trade.total_quantity = total_filled;
            trade.open_quantity = open_quantity;
            trade.total_value = round5(total_value);
            // Divides by half the total filled quantity: the open and close
            // legs of a round trip both count toward the total, so one
            // matched pair yields the per-share average. Preserved as-is.
            trade.average_price = round5(total_value / (f64::from(total_filled) / 2.0));
            trade.total_commission = round5(total_commission);
            trade.profit_loss = round5(net_value);

            if open_quantity != 0 && !trade.is_open {
                trade.is_open = true;
                strategy.status = Some(StrategyStatus::Open);
                self.persistence.save_tradestrategy(&strategy)?;
                info!(strategy_id = %strategy.id, open_quantity, "position opened");
            } else if open_quantity == 0 && trade.is_open {
                trade.is_open = false;
                strategy.status = Some(StrategyStatus::Closed);
                self.persistence.save_tradestrategy(&strategy)?;
                info!(
                    strategy_id = %strategy.id,
                    profit_loss = trade.profit_loss,
                    "position closed"
                );
            }
            self.persistence.save_trade(&trade)?;
        } else if all_cancelled && !siblings.is_empty() && strategy.status.is_none() {
            strategy.status = Some(StrategyStatus::Cancelled);
            self.persistence.save_tradestrategy(&strategy)?;
            info!(strategy_id = %strategy.id, "all orders cancelled");
        } else if (round5(total_commission) - trade.total_commission).abs() > f64::EPSILON {
            trade.total_commission = round5(total_commission);
            self.persistence.save_trade(&trade)?;
        }

        let saved = self.persistence.save_trade_order(&order)?;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Contract, OrderAction, OrderFill, OrderKind, StrategyId, TradeStrategy, TradingSession,
    };
    use crate::persistence::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn store_with_strategy() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_strategy(TradeStrategy {
            id: StrategyId(1),
            contract: Contract::new("SPY"),
            account_number: "DU12345".to_string(),
            session: TradingSession {
                open: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
                close: Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap(),
            },
            rule_name: "test_rule".to_string(),
            risk_amount: 500.0,
            side: PositionSide::Long,
            status: None,
            trade_enabled: true,
        });
        store
    }

    fn fill(price: f64, quantity: u32) -> OrderFill {
        OrderFill {
            price,
            quantity,
            time: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            commission: 1.0,
        }
    }

    #[test]
    fn first_order_creates_trade_and_sets_open_position_flag() {
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut order = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::StopLimit, 100);
        order.order_key = Some(store.next_order_key());
        order.limit_price = Some(20.04);
        order.aux_price = Some(20.0);

        let saved = reconciler.persist_trade_order(order).unwrap();
        assert!(saved.is_open_position);
        assert!(saved.trade_id.is_some());

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert_eq!(trade.side, PositionSide::Long);
        assert!(!trade.is_open);
    }

    #[test]
    fn missing_order_key_is_rejected() {
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store);
        let order = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::Market, 100);
        let err = reconciler.persist_trade_order(order).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::MISSING_ORDER_KEY);
    }

    #[test]
    fn full_fill_opens_position() {
        // Scenario: one BUY StopLimit order, quantity 100, fully filled
        // at 20.25.
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut order = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::StopLimit, 100);
        order.order_key = Some(store.next_order_key());
        order.limit_price = Some(20.29);
        order.aux_price = Some(20.25);
        let order = reconciler.persist_trade_order(order).unwrap();

        let mut filled = order;
        filled.fills.push(fill(20.25, 100));
        let filled = reconciler.persist_trade_orderfill(filled).unwrap();
        assert!(filled.is_filled);
        assert_eq!(filled.filled_quantity, 100);
        assert_eq!(filled.average_filled_price, 20.25);
        assert!(filled.filled_date.is_some());

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert!(trade.is_open);
        assert_eq!(trade.open_quantity, 100);
        assert_eq!(trade.total_quantity, 100);
        // Average divides the value sum by half the total quantity.
        assert_eq!(trade.average_price, round5(2025.0 / 50.0));

        let strategy = store.find_tradestrategy_by_id(StrategyId(1)).unwrap();
        assert_eq!(strategy.status, Some(StrategyStatus::Open));
    }

    #[test]
    fn round_trip_closes_position_with_profit() {
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut open = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::Market, 100);
        open.order_key = Some(store.next_order_key());
        open.fills.push(fill(20.0, 100));
        reconciler.persist_trade_orderfill(open).unwrap();

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        let mut close = TradeOrder::new(StrategyId(1), OrderAction::Sell, OrderKind::Market, 100);
        close.order_key = Some(store.next_order_key());
        close.trade_id = trade.id;
        close.fills.push(fill(21.0, 100));
        reconciler.persist_trade_orderfill(close).unwrap();

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert!(!trade.is_open);
        assert_eq!(trade.open_quantity, 0);
        assert_eq!(trade.total_quantity, 200);
        assert_eq!(trade.profit_loss, 100.0);
        assert_eq!(trade.total_commission, 2.0);

        let strategy = store.find_tradestrategy_by_id(StrategyId(1)).unwrap();
        assert_eq!(strategy.status, Some(StrategyStatus::Closed));
    }

    #[test]
    fn partial_fills_recompute_from_scratch() {
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut order = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::Limit, 100);
        order.order_key = Some(store.next_order_key());
        order.limit_price = Some(20.10);
        order.fills.push(fill(20.0, 40));
        let order = reconciler.persist_trade_orderfill(order).unwrap();
        assert!(!order.is_filled);
        assert_eq!(order.filled_quantity, 40);

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert!(trade.is_open);
        assert_eq!(trade.open_quantity, 40);

        let mut order = order;
        order.fills.push(fill(20.2, 60));
        let order = reconciler.persist_trade_orderfill(order).unwrap();
        assert!(order.is_filled);
        assert_eq!(order.filled_quantity, 100);
        // Value-weighted: (20.0 * 40 + 20.2 * 60) / 100.
        assert_eq!(order.average_filled_price, 20.12);

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert_eq!(trade.open_quantity, 100);
        assert_eq!(trade.total_quantity, 100);
    }

    #[test]
    fn all_orders_cancelled_sets_status_exactly_once() {
        // Scenario: every order cancelled with zero fills; status becomes
        // Cancelled once and is never re-set.
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut first = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::Limit, 100);
        first.order_key = Some(store.next_order_key());
        first.limit_price = Some(20.0);
        let first = reconciler.persist_trade_order(first).unwrap();

        let mut second = TradeOrder::new(StrategyId(1), OrderAction::Sell, OrderKind::Stop, 100);
        second.order_key = Some(store.next_order_key());
        second.aux_price = Some(19.5);
        second.trade_id = first.trade_id;
        let second = reconciler.persist_trade_order(second).unwrap();

        let mut first_cancelled = first;
        first_cancelled.status = OrderStatus::Cancelled;
        reconciler.persist_trade_order(first_cancelled).unwrap();
        assert_eq!(
            store.find_tradestrategy_by_id(StrategyId(1)).unwrap().status,
            None
        );

        let mut second_cancelled = second;
        second_cancelled.status = OrderStatus::Cancelled;
        let second_cancelled = reconciler.persist_trade_order(second_cancelled).unwrap();
        assert_eq!(
            store.find_tradestrategy_by_id(StrategyId(1)).unwrap().status,
            Some(StrategyStatus::Cancelled)
        );

        // Re-persisting does not flip an already-set status.
        store
            .save_tradestrategy(&{
                let mut s = store.find_tradestrategy_by_id(StrategyId(1)).unwrap();
                s.status = Some(StrategyStatus::Closed);
                s
            })
            .unwrap();
        reconciler.persist_trade_order(second_cancelled).unwrap();
        assert_eq!(
            store.find_tradestrategy_by_id(StrategyId(1)).unwrap().status,
            Some(StrategyStatus::Closed)
        );
    }

    #[test]
    fn commission_only_change_persists_commission() {
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut order = TradeOrder::new(StrategyId(1), OrderAction::Buy, OrderKind::Market, 100);
        order.order_key = Some(store.next_order_key());
        order.fills.push(fill(20.0, 100));
        let order = reconciler.persist_trade_orderfill(order).unwrap();

        // Broker revises the commission after the fill; quantities are
        // unchanged.
        let mut revised = order;
        revised.fills[0].commission = 2.5;
        reconciler.persist_trade_orderfill(revised).unwrap();

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert_eq!(trade.total_commission, 2.5);
        assert_eq!(trade.total_quantity, 100);
    }

    #[test]
    fn short_side_open_quantity_is_negative() {
        let store = store_with_strategy();
        let reconciler = PositionReconciler::new(store.clone());

        let mut order = TradeOrder::new(StrategyId(1), OrderAction::Sell, OrderKind::Market, 200);
        order.order_key = Some(store.next_order_key());
        order.fills.push(fill(30.0, 200));
        let saved = reconciler.persist_trade_orderfill(order).unwrap();
        assert!(saved.is_open_position);

        let trade = store.find_trade_for_strategy(StrategyId(1)).unwrap().unwrap();
        assert_eq!(trade.side, PositionSide::Short);
        assert_eq!(trade.open_quantity, -200);
        assert!(trade.is_open);
    }
}
