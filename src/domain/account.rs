//! Account and contract metadata consumed by sizing and submission.

use serde::{Deserialize, Serialize};

/// Brokerage account snapshot. Only the fields this engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_number: String,
    /// Available buying power; bounds risk-sized positions when a margin cap
    /// applies for the entry price bucket.
    pub buying_power: f64,
}

/// Tradable contract reference passed through to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
}

impl Contract {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }
}
