//! Order construction and mutation.
//!
//! Every operation follows the same validate -> round -> submit -> record
//! pattern: prices are made exchange-valid, the order goes to the broker
//! collaborator, and the acknowledged order is folded back through the
//! reconciler so the trade shell and lifecycle state stay consistent.

use crate::broker::Broker;
use crate::domain::{
    EntryLimitTable, OrderAction, OrderKind, TimeInForce, TradeOrder, TradeStrategy,
};
use crate::error::EngineError;
use crate::persistence::{Persistence, PositionOrders};
use crate::pricing::PriceRounder;
use crate::reconcile::PositionReconciler;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

/// Lot-size rounding that collapses to zero falls back to this many shares.
const MIN_QUANTITY: u32 = 10;

/// OCA legs reduce sibling quantity on partial fills, with overfill
/// protection.
const OCA_TYPE_REDUCE_WITH_BLOCK: u8 = 2;

/// Parameters for a single order submission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub action: OrderAction,
    pub kind: OrderKind,
    pub quantity: u32,
    pub limit_price: Option<f64>,
    pub aux_price: Option<f64>,
    pub oca_group: Option<String>,
    pub trigger_method: u8,
    pub override_constraints: bool,
    pub time_in_force: TimeInForce,
    pub round_price: bool,
    pub transmit: bool,
    pub routing: String,
}

impl OrderRequest {
    pub fn new(action: OrderAction, kind: OrderKind, quantity: u32) -> Self {
        Self {
            action,
            kind,
            quantity,
            limit_price: None,
            aux_price: None,
            oca_group: None,
            trigger_method: 0,
            override_constraints: false,
            time_in_force: TimeInForce::Day,
            round_price: true,
            transmit: true,
            routing: "SMART".to_string(),
        }
    }

    pub fn with_limit_price(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_aux_price(mut self, price: f64) -> Self {
        self.aux_price = Some(price);
        self
    }

    pub fn with_oca_group(mut self, group: impl Into<String>) -> Self {
        self.oca_group = Some(group.into());
        self
    }

    pub fn with_round_price(mut self, round: bool) -> Self {
        self.round_price = round;
        self
    }

    pub fn with_transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = routing.into();
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }
}

/// Builds and mutates order aggregates on behalf of strategy rules.
pub struct OrderFactory {
    broker: Arc<dyn Broker>,
    persistence: Arc<dyn Persistence>,
    reconciler: Arc<PositionReconciler>,
    rounder: PriceRounder,
    limits: Arc<EntryLimitTable>,
}

impl OrderFactory {
    pub fn new(
        broker: Arc<dyn Broker>,
        persistence: Arc<dyn Persistence>,
        reconciler: Arc<PositionReconciler>,
        limits: Arc<EntryLimitTable>,
    ) -> Self {
        Self {
            broker,
            persistence,
            rounder: PriceRounder::new(limits.clone()),
            reconciler,
            limits,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub fn rounder(&self) -> &PriceRounder {
        &self.rounder
    }

    /// Validate, round, submit, and record a single order.
    pub fn create_order(
        &self,
        strategy: &TradeStrategy,
        request: OrderRequest,
    ) -> Result<TradeOrder, EngineError> {
        if request.quantity == 0 {
            return Err(EngineError::ZeroQuantity);
        }

        let (limit_price, aux_price) = self.resolve_prices(&request)?;

        let mut order = TradeOrder::new(strategy.id, request.action, request.kind, request.quantity);
        order.order_key = Some(self.persistence.next_order_key());
        order.limit_price = limit_price;
        order.aux_price = aux_price;
        order.oca_group = request.oca_group;
        if order.oca_group.is_some() {
            order.oca_type = OCA_TYPE_REDUCE_WITH_BLOCK;
        }
        order.trigger_method = request.trigger_method;
        order.override_constraints = request.override_constraints;
        order.time_in_force = request.time_in_force;
        order.transmit = request.transmit;
        order.routing = request.routing;

        let acked = self.broker.place_order(&strategy.contract, &order)?;
        let saved = self.reconciler.persist_trade_order(acked)?;
        debug!(
            strategy_id = %strategy.id,
            order_key = ?saved.order_key,
            action = ?saved.action,
            kind = ?saved.kind,
            quantity = saved.quantity,
            "order submitted"
        );
        Ok(saved)
    }

    fn resolve_prices(
        &self,
        request: &OrderRequest,
    ) -> Result<(Option<f64>, Option<f64>), EngineError> {
        match request.kind {
            OrderKind::Market => Ok((Some(0.0), Some(0.0))),
            OrderKind::Limit => {
                let limit = request.limit_price.ok_or(EngineError::MissingLimitPrice)?;
                let limit = if request.round_price {
                    self.rounder.round_price(limit, request.action)
                } else {
                    limit
                };
                Ok((Some(limit), request.aux_price))
            }
            OrderKind::Stop => {
                let aux = request.aux_price.ok_or(EngineError::MissingStopPrice)?;
                let aux = if request.round_price {
                    self.rounder.round_price(aux, request.action)
                } else {
                    aux
                };
                Ok((request.limit_price, Some(aux)))
            }
            OrderKind::StopLimit => {
                let limit = request.limit_price.ok_or(EngineError::MissingLimitPrice)?;
                let aux = request.aux_price.ok_or(EngineError::MissingStopPrice)?;
                if request.round_price {
                    // Round the trigger first and carry the configured
                    // limit-trigger spread across unchanged.
                    let rounded_aux = self.rounder.round_price(aux, request.action);
                    Ok((Some(rounded_aux + (limit - aux)), Some(rounded_aux)))
                } else {
                    Ok((Some(limit), Some(aux)))
                }
            }
        }
    }

    /// Open a position sized by the strategy's risk budget.
    ///
    /// Quantity is the risk amount divided by the entry-to-stop distance,
    /// capped by the bucket's margin fraction of account buying power, then
    /// rounded to the bucket's lot size. One StopLimit order triggers at the
    /// (rounded) entry with the bracket limit offset applied by direction.
    pub fn create_risk_open_position(
        &self,
        strategy: &TradeStrategy,
        position: &PositionOrders,
        action: OrderAction,
        entry_price: f64,
        stop_price: f64,
        routing: &str,
    ) -> Result<TradeOrder, EngineError> {
        if position.has_open_position() {
            return Err(EngineError::PositionAlreadyOpen(strategy.id));
        }

        let risk_per_share = (entry_price - stop_price).abs();
        if risk_per_share <= f64::EPSILON {
            return Err(EngineError::ZeroRiskRange {
                entry: entry_price,
                stop: stop_price,
            });
        }
        let mut quantity = (strategy.risk_amount / risk_per_share).floor();

        let entry = self.rounder.round_price(entry_price, action);
        let limit = self
            .limits
            .bucket_for(entry)
            .ok_or(EngineError::NoEntryLimit(entry))?;

        if limit.percent_of_margin > 0.0 {
            let account = self
                .persistence
                .find_account_by_number(&strategy.account_number)?;
            let cap = account.buying_power * limit.percent_of_margin;
            if quantity * entry > cap {
                info!(
                    strategy_id = %strategy.id,
                    quantity,
                    cap,
                    "margin cap shrinking position"
                );
                quantity = (cap / entry).floor();
            }
        }

        let lot = f64::from(limit.share_round.max(1));
        let mut shares = ((quantity / lot).round() * lot) as u32;
        if shares == 0 {
            shares = MIN_QUANTITY;
        }

        let limit_price = match action {
            OrderAction::Buy => entry + limit.limit_amount,
            OrderAction::Sell => entry - limit.limit_amount,
        };

        let request = OrderRequest::new(action, OrderKind::StopLimit, shares)
            .with_limit_price(limit_price)
            .with_aux_price(entry)
            .with_round_price(false)
            .with_routing(routing);
        self.create_order(strategy, request)
    }

    /// Place a stop/target bracket around the open position.
    ///
    /// Both legs share one randomly generated OCA group. The target is
    /// submitted first, then the stop: the last member submitted is the only
    /// one the broker allows to be updated later.
    pub fn create_stop_and_target(
        &self,
        strategy: &TradeStrategy,
        position: &PositionOrders,
        stop_price: f64,
        target_price: f64,
        quantity: u32,
        routing: &str,
    ) -> Result<(TradeOrder, TradeOrder), EngineError> {
        let trade = position
            .open_trade
            .as_ref()
            .ok_or(EngineError::NoOpenPosition(strategy.id))?;
        let action = trade.side.closing_action();
        let oca_group = generate_oca_group();

        let target_request = OrderRequest::new(action, OrderKind::Limit, quantity)
            .with_limit_price(target_price)
            .with_oca_group(oca_group.clone())
            .with_routing(routing);
        let target = self.create_order(strategy, target_request)?;

        let stop_request = OrderRequest::new(action, OrderKind::Stop, quantity)
            .with_aux_price(stop_price)
            .with_oca_group(oca_group)
            .with_routing(routing);
        let stop = self.create_order(strategy, stop_request)?;

        Ok((target, stop))
    }

    /// Bracket priced in risk units off the open order's average fill:
    /// one unit is `risk_amount / quantity` per share.
    pub fn create_stop_and_target_risk_units(
        &self,
        strategy: &TradeStrategy,
        position: &PositionOrders,
        stop_units: f64,
        target_units: f64,
        routing: &str,
    ) -> Result<(TradeOrder, TradeOrder), EngineError> {
        let trade = position
            .open_trade
            .as_ref()
            .ok_or(EngineError::NoOpenPosition(strategy.id))?;
        let quantity = trade.open_quantity.unsigned_abs() as u32;
        if quantity == 0 {
            return Err(EngineError::NoOpenPosition(strategy.id));
        }
        let open_order = position
            .open_position_order()
            .ok_or(EngineError::NoOpenPosition(strategy.id))?;
        let avg = open_order.average_filled_price;
        let per_unit = strategy.risk_amount / f64::from(quantity);

        let (stop_price, target_price) = match trade.side {
            crate::domain::PositionSide::Long => {
                (avg - stop_units * per_unit, avg + target_units * per_unit)
            }
            crate::domain::PositionSide::Short => {
                (avg + stop_units * per_unit, avg - target_units * per_unit)
            }
        };
        self.create_stop_and_target(strategy, position, stop_price, target_price, quantity, routing)
    }

    /// Re-validate, re-round, and resubmit a changed order.
    pub fn update_order(
        &self,
        strategy: &TradeStrategy,
        order: &TradeOrder,
    ) -> Result<TradeOrder, EngineError> {
        if order.quantity == 0 {
            return Err(EngineError::ZeroQuantity);
        }
        if order.kind.requires_limit_price() && order.limit_price.is_none() {
            return Err(EngineError::MissingLimitPrice);
        }
        if order.kind.requires_aux_price() && order.aux_price.is_none() {
            return Err(EngineError::MissingStopPrice);
        }
        let mut order = order.clone();
        self.round_order_prices(&mut order);
        let acked = self.broker.place_order(&strategy.contract, &order)?;
        let saved = self.reconciler.persist_trade_order(acked)?;
        debug!(order_key = ?saved.order_key, "order updated");
        Ok(saved)
    }

    /// Re-snap a mutated order's prices, mirroring the rounding applied at
    /// creation. Idempotent on prices that are already exchange-valid.
    fn round_order_prices(&self, order: &mut TradeOrder) {
        match order.kind {
            OrderKind::Market => {
                order.limit_price = Some(0.0);
                order.aux_price = Some(0.0);
            }
            OrderKind::Limit => {
                if let Some(limit) = order.limit_price {
                    order.limit_price = Some(self.rounder.round_price(limit, order.action));
                }
            }
            OrderKind::Stop => {
                if let Some(aux) = order.aux_price {
                    order.aux_price = Some(self.rounder.round_price(aux, order.action));
                }
            }
            OrderKind::StopLimit => {
                if let (Some(limit), Some(aux)) = (order.limit_price, order.aux_price) {
                    let rounded_aux = self.rounder.round_price(aux, order.action);
                    order.limit_price = Some(rounded_aux + (limit - aux));
                    order.aux_price = Some(rounded_aux);
                }
            }
        }
    }

    /// Ask the broker to cancel; the terminal status arrives via execution
    /// reports. Inactive orders are left alone.
    pub fn cancel_order(&self, order: &TradeOrder) -> Result<(), EngineError> {
        if order.is_active() {
            self.broker.cancel_order(order)?;
            debug!(order_key = ?order.order_key, "cancel requested");
        }
        Ok(())
    }

    pub fn cancel_all_orders(&self, position: &PositionOrders) -> Result<(), EngineError> {
        for order in position.active_orders() {
            self.cancel_order(order)?;
        }
        Ok(())
    }

    /// Move the stop leg(s) of the active OCA bracket to a new trigger price.
    pub fn move_stop_oca_price(
        &self,
        strategy: &TradeStrategy,
        position: &PositionOrders,
        new_stop_price: f64,
    ) -> Result<Vec<TradeOrder>, EngineError> {
        let mut updated = Vec::new();
        for order in position.active_orders() {
            if order.kind == OrderKind::Stop && order.oca_group.is_some() {
                let mut changed = order.clone();
                changed.aux_price = Some(new_stop_price);
                updated.push(self.update_order(strategy, &changed)?);
            }
        }
        Ok(updated)
    }

    /// Flatten the open position with a market order for the absolute open
    /// quantity, opposite side. Returns `None` when already flat.
    pub fn close_position(
        &self,
        strategy: &TradeStrategy,
        position: &PositionOrders,
    ) -> Result<Option<TradeOrder>, EngineError> {
        let open_quantity = position.open_quantity();
        if open_quantity == 0 {
            return Ok(None);
        }
        let action = if open_quantity > 0 {
            OrderAction::Sell
        } else {
            OrderAction::Buy
        };
        let request = OrderRequest::new(action, OrderKind::Market, open_quantity.unsigned_abs() as u32);
        let order = self.create_order(strategy, request)?;
        info!(strategy_id = %strategy.id, open_quantity, "closing position");
        Ok(Some(order))
    }

    /// Cancel all working orders, then flatten.
    pub fn cancel_orders_close_position(
        &self,
        strategy: &TradeStrategy,
        position: &PositionOrders,
    ) -> Result<Option<TradeOrder>, EngineError> {
        self.cancel_all_orders(position)?;
        self.close_position(strategy, position)
    }

    /// True when still-active order quantity covers the absolute open
    /// position.
    ///
    /// Both legs of an active OCA bracket count toward the sum, so a fully
    /// bracketed position over-counts. Preserved deliberately.
    pub fn is_position_covered(&self, position: &PositionOrders) -> bool {
        let open = position.open_quantity().unsigned_abs();
        let active: u64 = position
            .active_orders()
            .map(|o| u64::from(o.quantity))
            .sum();
        active >= open
    }
}

fn generate_oca_group() -> String {
    format!("oca-{}", rand::thread_rng().gen::<u32>())
}
