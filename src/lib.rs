//! Live trading engine core.
//!
//! Streams of OHLCV bars drive per-strategy worker threads; rules decide,
//! the order factory validates and submits, and the reconciler folds broker
//! execution reports back into trade and strategy lifecycle state.
//!
//! The crate is broker- and storage-agnostic: live integrations implement
//! the [`broker::Broker`] and [`persistence::Persistence`] seams. In-process
//! doubles ([`broker::SimBroker`], [`persistence::MemoryStore`]) back the
//! test suite and demo wiring.

pub mod broker;
pub mod domain;
pub mod error;
pub mod factory;
pub mod persistence;
pub mod pricing;
pub mod reconcile;
pub mod rule;
pub mod series;
pub mod worker;

pub use broker::{Broker, BrokerError, SimBroker};
pub use domain::{
    round5, round_half_even, Account, Bar, Contract, EntryLimit, EntryLimitError, EntryLimitTable,
    OrderAction, OrderFill, OrderKey, OrderKind, OrderStatus, PositionSide, StrategyId,
    StrategyStatus, TimeInForce, Trade, TradeId, TradeOrder, TradeStrategy, TradingSession,
};
pub use error::{codes, EngineError, Severity};
pub use factory::{OrderFactory, OrderRequest};
pub use persistence::{MemoryStore, Persistence, PersistenceError, PositionOrders};
pub use pricing::PriceRounder;
pub use reconcile::PositionReconciler;
pub use rule::{RuleContext, RuleRegistry, StrategyRule};
pub use series::{BarSeries, BarSignal, Wake};
pub use worker::{StrategyWorker, WorkerEvent, WorkerListener, WorkerState};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn money_helpers_available_at_crate_root() {
        assert_eq!(round5(1.234564), 1.23456);
        assert_eq!(round_half_even(2.5, 0), 2.0);
    }

    #[test]
    fn shared_types_are_send_and_sync() {
        assert_send_sync::<BarSeries>();
        assert_send_sync::<BarSignal>();
        assert_send_sync::<SimBroker>();
        assert_send_sync::<MemoryStore>();
        assert_send_sync::<PositionReconciler>();
        assert_send_sync::<OrderFactory>();
        assert_send_sync::<StrategyWorker>();
        assert_send_sync::<RuleRegistry>();
    }
}
