//! Tradestrategy — the binding of one contract, one trading session, and one
//! strategy rule.

use super::account::Contract;
use super::ids::StrategyId;
use super::order::OrderAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position side (semantic representation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side opened by the given action: a buy opens long, a sell opens short.
    pub fn from_opening_action(action: OrderAction) -> Self {
        match action {
            OrderAction::Buy => PositionSide::Long,
            OrderAction::Sell => PositionSide::Short,
        }
    }

    /// Action that closes a position on this side.
    pub fn closing_action(self) -> OrderAction {
        match self {
            PositionSide::Long => OrderAction::Sell,
            PositionSide::Short => OrderAction::Buy,
        }
    }
}

/// Tradestrategy lifecycle status. `None` on the strategy means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Open,
    Closed,
    Cancelled,
}

/// Trading session window. Bars stamped outside the window are observed but
/// do not trigger decision cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSession {
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

impl TradingSession {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.open && time < self.close
    }
}

/// One tradable binding: contract + session + rule + account + risk budget.
///
/// `status` is mutated only by the reconciler (open/close/cancel-all); every
/// other consumer treats the persisted copy as the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStrategy {
    pub id: StrategyId,
    pub contract: Contract,
    pub account_number: String,
    pub session: TradingSession,
    /// Registry name of the decision rule driving this strategy.
    pub rule_name: String,
    /// Dollar risk budget per position, used by risk-based sizing.
    pub risk_amount: f64,
    pub side: PositionSide,
    pub status: Option<StrategyStatus>,
    pub trade_enabled: bool,
}
