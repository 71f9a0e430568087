//! Broker collaborator interface.
//!
//! The wire protocol lives outside this engine; orders cross the seam through
//! the [`Broker`] trait and failures come back as [`BrokerError`]. No retry or
//! backoff happens here — a failed submission is reported and left for
//! higher-level logic to resubmit.

use crate::domain::{Contract, OrderKey, OrderStatus, TradeOrder, TradeStrategy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker rejected order {order_key:?}: {reason}")]
    Rejected {
        order_key: Option<OrderKey>,
        reason: String,
    },

    #[error("broker connection failure: {0}")]
    Connection(String),
}

/// Order transmission seam to the live broker.
pub trait Broker: Send + Sync {
    /// Submit or modify an order. The returned order may carry
    /// server-assigned fields (status, broker ids).
    fn place_order(&self, contract: &Contract, order: &TradeOrder)
        -> Result<TradeOrder, BrokerError>;

    /// Request cancellation; the terminal status arrives asynchronously via
    /// the broker's execution reports.
    fn cancel_order(&self, order: &TradeOrder) -> Result<(), BrokerError>;

    /// Whether a realtime bar subscription is active for the strategy's
    /// contract.
    fn is_realtime_bars_running(&self, strategy: &TradeStrategy) -> bool;
}

/// In-process broker double: acknowledges submissions synchronously and
/// records everything it is asked to do.
///
/// Used by the test suite and by demo wiring; fills are injected by the
/// caller through the reconciler, the way live execution reports would be.
#[derive(Debug, Default)]
pub struct SimBroker {
    placed: Mutex<Vec<TradeOrder>>,
    cancelled: Mutex<Vec<OrderKey>>,
    reject_next: AtomicBool,
    realtime_bars: AtomicBool,
}

impl SimBroker {
    pub fn new() -> Self {
        Self {
            realtime_bars: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Make the next `place_order` call fail, exercising the error path.
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn set_realtime_bars(&self, running: bool) {
        self.realtime_bars.store(running, Ordering::SeqCst);
    }

    /// Orders placed so far, in submission order.
    pub fn placed_orders(&self) -> Vec<TradeOrder> {
        self.placed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Keys of orders asked to cancel, in request order.
    pub fn cancel_requests(&self) -> Vec<OrderKey> {
        self.cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Broker for SimBroker {
    fn place_order(
        &self,
        _contract: &Contract,
        order: &TradeOrder,
    ) -> Result<TradeOrder, BrokerError> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::Rejected {
                order_key: order.order_key,
                reason: "simulated rejection".to_string(),
            });
        }
        let mut acked = order.clone();
        if acked.status == OrderStatus::Unsubmitted {
            acked.status = OrderStatus::Submitted;
        }
        self.placed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(acked.clone());
        Ok(acked)
    }

    fn cancel_order(&self, order: &TradeOrder) -> Result<(), BrokerError> {
        let key = order.order_key.ok_or(BrokerError::Rejected {
            order_key: None,
            reason: "cannot cancel an order without a key".to_string(),
        })?;
        self.cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(key);
        Ok(())
    }

    fn is_realtime_bars_running(&self, _strategy: &TradeStrategy) -> bool {
        self.realtime_bars.load(Ordering::SeqCst)
    }
}
