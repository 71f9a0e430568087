//! Shared wiring for integration tests.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::{Arc, Once};
use tradeflow::{
    Account, Bar, Contract, EntryLimit, EntryLimitTable, MemoryStore, OrderFactory, OrderFill,
    PositionSide, PositionReconciler, SimBroker, StrategyId, TradeStrategy, TradingSession,
};

pub const STRATEGY_ID: StrategyId = StrategyId(1);
pub const ACCOUNT: &str = "DU12345";

pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<SimBroker>,
    pub reconciler: Arc<PositionReconciler>,
    pub factory: Arc<OrderFactory>,
}

/// Wire the engine collaborators around an in-memory store and broker
/// double, seeded with one long strategy and a funded account.
pub fn engine() -> Engine {
    engine_with_limits(default_limits())
}

pub fn engine_with_limits(limits: EntryLimitTable) -> Engine {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert_strategy(strategy());
    store.insert_account(Account {
        account_number: ACCOUNT.to_string(),
        buying_power: 100_000.0,
    });
    let broker = Arc::new(SimBroker::new());
    let reconciler = Arc::new(PositionReconciler::new(store.clone()));
    let factory = Arc::new(OrderFactory::new(
        broker.clone(),
        store.clone(),
        reconciler.clone(),
        Arc::new(limits),
    ));
    Engine {
        store,
        broker,
        reconciler,
        factory,
    }
}

/// Capture engine logs in test output when `RUST_LOG` is set.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn default_limits() -> EntryLimitTable {
    EntryLimitTable::new(vec![EntryLimit {
        range_lower: 0.0,
        range_upper: 50.0,
        price_round: 0.09,
        limit_amount: 0.04,
        share_round: 100,
        percent_of_margin: 0.0,
    }])
    .unwrap()
}

pub fn strategy() -> TradeStrategy {
    TradeStrategy {
        id: STRATEGY_ID,
        contract: Contract::new("SPY"),
        account_number: ACCOUNT.to_string(),
        session: TradingSession {
            open: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
            close: Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap(),
        },
        rule_name: "risk_entry".to_string(),
        risk_amount: 500.0,
        side: PositionSide::Long,
        status: None,
        trade_enabled: true,
    }
}

/// A five-minute bar inside the seeded trading session.
pub fn session_bar(minute: u32, close: f64) -> Bar {
    Bar {
        time: Utc.with_ymd_and_hms(2024, 1, 2, 15, minute, 0).unwrap(),
        open: close - 0.3,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1_000,
    }
}

pub fn fill(price: f64, quantity: u32) -> OrderFill {
    OrderFill {
        price,
        quantity,
        time: Utc.with_ymd_and_hms(2024, 1, 2, 15, 5, 0).unwrap(),
        commission: 1.0,
    }
}
