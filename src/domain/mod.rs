//! Domain types for the tradeflow engine.

pub mod account;
pub mod bar;
pub mod entry_limit;
pub mod ids;
pub mod money;
pub mod order;
pub mod strategy;
pub mod trade;

pub use account::{Account, Contract};
pub use bar::Bar;
pub use entry_limit::{EntryLimit, EntryLimitError, EntryLimitTable};
pub use ids::{OrderKey, StrategyId, TradeId};
pub use money::{round5, round_half_even, MONEY_SCALE};
pub use order::{OrderAction, OrderFill, OrderKind, OrderStatus, TimeInForce, TradeOrder};
pub use strategy::{PositionSide, StrategyStatus, TradeStrategy, TradingSession};
pub use trade::Trade;
