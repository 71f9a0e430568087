//! Engine error taxonomy: severity by numeric id, stable codes per condition.
//!
//! Callers branch on `code()`, never on message text. Severity 1 is fatal and
//! makes a worker self-cancel; 2 and 3 are surfaced and the loop continues.

use crate::broker::BrokerError;
use crate::domain::StrategyId;
use crate::persistence::PersistenceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error severity by numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    Warning,
    Info,
}

impl Severity {
    pub fn id(self) -> u8 {
        match self {
            Severity::Fatal => 1,
            Severity::Warning => 2,
            Severity::Info => 3,
        }
    }

    /// Unknown ids are treated as fatal.
    pub fn from_id(id: u8) -> Self {
        match id {
            2 => Severity::Warning,
            3 => Severity::Info,
            _ => Severity::Fatal,
        }
    }
}

/// Stable numeric codes for each failure condition.
pub mod codes {
    pub const ZERO_QUANTITY: u32 = 101;
    pub const MISSING_LIMIT_PRICE: u32 = 102;
    pub const MISSING_STOP_PRICE: u32 = 103;
    pub const POSITION_ALREADY_OPEN: u32 = 104;
    pub const NO_OPEN_POSITION: u32 = 105;
    pub const MISSING_ORDER_KEY: u32 = 106;
    pub const ZERO_RISK_RANGE: u32 = 107;
    pub const NO_ENTRY_LIMIT: u32 = 108;
    pub const SERIES_TRUNCATED: u32 = 109;
    pub const BROKER: u32 = 110;
    pub const PERSISTENCE: u32 = 111;
    pub const INTERNAL: u32 = 112;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order quantity cannot be zero")]
    ZeroQuantity,

    #[error("limit order requires a limit price")]
    MissingLimitPrice,

    #[error("stop order requires a stop price")]
    MissingStopPrice,

    #[error("position already open for tradestrategy {0}")]
    PositionAlreadyOpen(StrategyId),

    #[error("no open position for tradestrategy {0}")]
    NoOpenPosition(StrategyId),

    #[error("trade order has no order key")]
    MissingOrderKey,

    #[error("entry price {entry} equals stop price {stop}; risk per share is zero")]
    ZeroRiskRange { entry: f64, stop: f64 },

    #[error("entry limit table has no bucket for price {0}")]
    NoEntryLimit(f64),

    #[error("bar series shrank from {seen} to {live} bars")]
    SeriesTruncated { seen: usize, live: usize },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> u32 {
        match self {
            EngineError::ZeroQuantity => codes::ZERO_QUANTITY,
            EngineError::MissingLimitPrice => codes::MISSING_LIMIT_PRICE,
            EngineError::MissingStopPrice => codes::MISSING_STOP_PRICE,
            EngineError::PositionAlreadyOpen(_) => codes::POSITION_ALREADY_OPEN,
            EngineError::NoOpenPosition(_) => codes::NO_OPEN_POSITION,
            EngineError::MissingOrderKey => codes::MISSING_ORDER_KEY,
            EngineError::ZeroRiskRange { .. } => codes::ZERO_RISK_RANGE,
            EngineError::NoEntryLimit(_) => codes::NO_ENTRY_LIMIT,
            EngineError::SeriesTruncated { .. } => codes::SERIES_TRUNCATED,
            EngineError::Broker(_) => codes::BROKER,
            EngineError::Persistence(_) => codes::PERSISTENCE,
            EngineError::Internal(_) => codes::INTERNAL,
        }
    }

    /// Every condition in this enum stops the worker; warnings and infos are
    /// emitted directly as events, not raised as errors.
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}
