//! Trade orders and execution fills.

use super::ids::{OrderKey, StrategyId, TradeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn opposite(self) -> Self {
        match self {
            OrderAction::Buy => OrderAction::Sell,
            OrderAction::Sell => OrderAction::Buy,
        }
    }

    /// Signed direction of filled quantity: buys add, sells subtract.
    pub fn sign(self) -> i64 {
        match self {
            OrderAction::Buy => 1,
            OrderAction::Sell => -1,
        }
    }
}

/// Order type taxonomy.
///
/// Prices live on the order itself (`limit_price`/`aux_price`) rather than in
/// the enum because exchange-valid rounding mutates them in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Fill at the next available price. Both prices forced to zero.
    Market,
    /// Fill at `limit_price` or better.
    Limit,
    /// Becomes a market order once `aux_price` (the stop trigger) is touched.
    Stop,
    /// Becomes a limit order at `limit_price` once `aux_price` is touched.
    StopLimit,
}

impl OrderKind {
    /// True if the type carries a limit price.
    pub fn requires_limit_price(self) -> bool {
        matches!(self, OrderKind::Limit | OrderKind::StopLimit)
    }

    /// True if the type carries a stop trigger (aux) price.
    pub fn requires_aux_price(self) -> bool {
        matches!(self, OrderKind::Stop | OrderKind::StopLimit)
    }
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created but not yet acknowledged by the broker.
    Unsubmitted,
    /// Working at the broker.
    Submitted,
    /// Completely filled.
    Filled,
    /// Cancelled at the broker or by the user.
    Cancelled,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    GoodTillCancel,
}

/// One immutable execution report belonging to a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub price: f64,
    pub quantity: u32,
    pub time: DateTime<Utc>,
    pub commission: f64,
}

/// A single order with full lifecycle tracking.
///
/// Fill aggregates (`filled_quantity`, `average_filled_price`, `commission`)
/// are always the sum over `fills`, recomputed by the reconciler — never
/// patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub order_key: Option<OrderKey>,
    pub strategy_id: StrategyId,
    pub trade_id: Option<TradeId>,
    pub action: OrderAction,
    pub kind: OrderKind,
    pub quantity: u32,
    pub limit_price: Option<f64>,
    /// Stop trigger price for Stop/StopLimit orders.
    pub aux_price: Option<f64>,
    pub status: OrderStatus,
    /// Exactly one order per trade carries this flag; it defines the
    /// trade's side.
    pub is_open_position: bool,
    pub is_filled: bool,
    pub filled_quantity: u32,
    pub average_filled_price: f64,
    pub commission: f64,
    pub oca_group: Option<String>,
    pub oca_type: u8,
    pub time_in_force: TimeInForce,
    pub trigger_method: u8,
    pub override_constraints: bool,
    pub transmit: bool,
    pub routing: String,
    pub fills: Vec<OrderFill>,
    pub created_at: DateTime<Utc>,
    pub filled_date: Option<DateTime<Utc>>,
}

impl TradeOrder {
    /// Create a new unsubmitted order with default broker parameters.
    pub fn new(
        strategy_id: StrategyId,
        action: OrderAction,
        kind: OrderKind,
        quantity: u32,
    ) -> Self {
        Self {
            order_key: None,
            strategy_id,
            trade_id: None,
            action,
            kind,
            quantity,
            limit_price: None,
            aux_price: None,
            status: OrderStatus::Unsubmitted,
            is_open_position: false,
            is_filled: false,
            filled_quantity: 0,
            average_filled_price: 0.0,
            commission: 0.0,
            oca_group: None,
            oca_type: 0,
            time_in_force: TimeInForce::Day,
            trigger_method: 0,
            override_constraints: false,
            transmit: true,
            routing: "SMART".to_string(),
            fills: Vec::new(),
            created_at: Utc::now(),
            filled_date: None,
        }
    }

    /// True while the order can still execute or be cancelled.
    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Unsubmitted | OrderStatus::Submitted)
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.filled_quantity)
    }
}
