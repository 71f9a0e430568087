//! Persistence collaborator interface and an in-memory system of record.
//!
//! All order/trade/position state is owned by the system of record; workers
//! re-read it every decision cycle instead of trusting a cache, because fills
//! can arrive on a different thread. Storage details (SQL, ORM) live outside
//! this engine behind the [`Persistence`] trait.

use crate::domain::{
    Account, OrderKey, StrategyId, Trade, TradeId, TradeOrder, TradeStrategy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("tradestrategy {0} not found")]
    StrategyNotFound(StrategyId),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("trade {0} not found")]
    TradeNotFound(TradeId),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Per-tradestrategy view: the full order set plus the current open position.
///
/// Always rebuilt from the system of record before each decision cycle —
/// never carried across cycles.
#[derive(Debug, Clone)]
pub struct PositionOrders {
    pub strategy: TradeStrategy,
    pub orders: Vec<TradeOrder>,
    /// The strategy's trade while a position is open, `None` when flat.
    pub open_trade: Option<Trade>,
}

impl PositionOrders {
    pub fn has_open_position(&self) -> bool {
        self.open_trade.is_some()
    }

    /// Signed net open quantity; 0 when flat.
    pub fn open_quantity(&self) -> i64 {
        self.open_trade.as_ref().map_or(0, |t| t.open_quantity)
    }

    /// Orders still able to execute or be cancelled.
    pub fn active_orders(&self) -> impl Iterator<Item = &TradeOrder> {
        self.orders.iter().filter(|o| o.is_active())
    }

    /// The order that opened (or will open) the position, if any.
    pub fn open_position_order(&self) -> Option<&TradeOrder> {
        self.orders.iter().find(|o| o.is_open_position)
    }
}

/// System-of-record seam consumed by workers, the order factory, and the
/// reconciler.
pub trait Persistence: Send + Sync {
    fn find_tradestrategy_by_id(&self, id: StrategyId)
        -> Result<TradeStrategy, PersistenceError>;

    fn find_position_orders(&self, id: StrategyId) -> Result<PositionOrders, PersistenceError>;

    fn find_account_by_number(&self, number: &str) -> Result<Account, PersistenceError>;

    fn find_trade_order_by_key(
        &self,
        key: OrderKey,
    ) -> Result<Option<TradeOrder>, PersistenceError>;

    /// Current trade for the strategy (this engine scopes one round trip per
    /// tradestrategy session).
    fn find_trade_for_strategy(
        &self,
        id: StrategyId,
    ) -> Result<Option<Trade>, PersistenceError>;

    fn find_orders_by_trade(&self, trade_id: TradeId)
        -> Result<Vec<TradeOrder>, PersistenceError>;

    fn save_tradestrategy(&self, strategy: &TradeStrategy) -> Result<(), PersistenceError>;

    /// Persist a trade, assigning an id on first save.
    fn save_trade(&self, trade: &Trade) -> Result<Trade, PersistenceError>;

    fn save_trade_order(&self, order: &TradeOrder) -> Result<TradeOrder, PersistenceError>;

    /// Allocate the next caller-assigned unique order key.
    fn next_order_key(&self) -> OrderKey;
}

#[derive(Debug, Default)]
struct MemoryInner {
    strategies: HashMap<StrategyId, TradeStrategy>,
    accounts: HashMap<String, Account>,
    trades: HashMap<TradeId, Trade>,
    orders: HashMap<OrderKey, TradeOrder>,
}

/// In-memory [`Persistence`] implementation for tests and demo wiring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    order_key_seq: AtomicU32,
    trade_id_seq: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_strategy(&self, strategy: TradeStrategy) {
        self.lock().strategies.insert(strategy.id, strategy);
    }

    pub fn insert_account(&self, account: Account) {
        self.lock()
            .accounts
            .insert(account.account_number.clone(), account);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Persistence for MemoryStore {
    fn find_tradestrategy_by_id(
        &self,
        id: StrategyId,
    ) -> Result<TradeStrategy, PersistenceError> {
        self.lock()
            .strategies
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::StrategyNotFound(id))
    }

    fn find_position_orders(&self, id: StrategyId) -> Result<PositionOrders, PersistenceError> {
        let inner = self.lock();
        let strategy = inner
            .strategies
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::StrategyNotFound(id))?;
        let mut orders: Vec<TradeOrder> = inner
            .orders
            .values()
            .filter(|o| o.strategy_id == id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.order_key);
        let open_trade = inner
            .trades
            .values()
            .find(|t| t.strategy_id == id && t.is_open)
            .cloned();
        Ok(PositionOrders {
            strategy,
            orders,
            open_trade,
        })
    }

    fn find_account_by_number(&self, number: &str) -> Result<Account, PersistenceError> {
        self.lock()
            .accounts
            .get(number)
            .cloned()
            .ok_or_else(|| PersistenceError::AccountNotFound(number.to_string()))
    }

    fn find_trade_order_by_key(
        &self,
        key: OrderKey,
    ) -> Result<Option<TradeOrder>, PersistenceError> {
        Ok(self.lock().orders.get(&key).cloned())
    }

    fn find_trade_for_strategy(
        &self,
        id: StrategyId,
    ) -> Result<Option<Trade>, PersistenceError> {
        let inner = self.lock();
        let mut trades: Vec<&Trade> = inner
            .trades
            .values()
            .filter(|t| t.strategy_id == id)
            .collect();
        trades.sort_by_key(|t| t.id);
        Ok(trades.last().map(|t| (*t).clone()))
    }

    fn find_orders_by_trade(
        &self,
        trade_id: TradeId,
    ) -> Result<Vec<TradeOrder>, PersistenceError> {
        let inner = self.lock();
        let mut orders: Vec<TradeOrder> = inner
            .orders
            .values()
            .filter(|o| o.trade_id == Some(trade_id))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.order_key);
        Ok(orders)
    }

    fn save_tradestrategy(&self, strategy: &TradeStrategy) -> Result<(), PersistenceError> {
        self.lock().strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    fn save_trade(&self, trade: &Trade) -> Result<Trade, PersistenceError> {
        let mut saved = trade.clone();
        if saved.id.is_none() {
            saved.id = Some(TradeId(self.trade_id_seq.fetch_add(1, Ordering::SeqCst) + 1));
        }
        let id = saved.id.ok_or_else(|| {
            PersistenceError::Storage("trade id assignment failed".to_string())
        })?;
        self.lock().trades.insert(id, saved.clone());
        Ok(saved)
    }

    fn save_trade_order(&self, order: &TradeOrder) -> Result<TradeOrder, PersistenceError> {
        let key = order.order_key.ok_or_else(|| {
            PersistenceError::Storage("cannot save an order without a key".to_string())
        })?;
        self.lock().orders.insert(key, order.clone());
        Ok(order.clone())
    }

    fn next_order_key(&self) -> OrderKey {
        OrderKey(self.order_key_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
