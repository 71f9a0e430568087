//! Entry limits — price-bucketed rounding and risk parameters.
//!
//! Externally supplied pure data: each row covers a half-open price range and
//! carries the rounding tolerance, bracket-limit offset, lot-rounding size,
//! and margin-risk cap used at that price level.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One price-range row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLimit {
    /// Inclusive lower bound of the price bucket.
    pub range_lower: f64,
    /// Exclusive upper bound of the price bucket.
    pub range_upper: f64,
    /// Tolerance for snapping prices near whole/half levels.
    pub price_round: f64,
    /// Offset added to the entry price to form the bracket limit price.
    pub limit_amount: f64,
    /// Lot size positions are rounded to.
    pub share_round: u32,
    /// Fraction of buying power a single position may consume; 0 disables
    /// the cap.
    pub percent_of_margin: f64,
}

impl EntryLimit {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.range_lower && price < self.range_upper
    }
}

#[derive(Debug, Error)]
pub enum EntryLimitError {
    #[error("entry limit table is empty")]
    Empty,

    #[error("entry limit row has inverted range [{lower}, {upper})")]
    InvertedRange { lower: f64, upper: f64 },

    #[error("failed to parse entry limit table: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Price-bucketed lookup table over [`EntryLimit`] rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLimitTable {
    rows: Vec<EntryLimit>,
}

impl EntryLimitTable {
    pub fn new(mut rows: Vec<EntryLimit>) -> Result<Self, EntryLimitError> {
        if rows.is_empty() {
            return Err(EntryLimitError::Empty);
        }
        for row in &rows {
            if row.range_lower >= row.range_upper {
                return Err(EntryLimitError::InvertedRange {
                    lower: row.range_lower,
                    upper: row.range_upper,
                });
            }
        }
        rows.sort_by(|a, b| a.range_lower.total_cmp(&b.range_lower));
        Ok(Self { rows })
    }

    /// Load from a TOML document with `[[limit]]` array-of-tables rows.
    pub fn from_toml_str(doc: &str) -> Result<Self, EntryLimitError> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(rename = "limit")]
            limits: Vec<EntryLimit>,
        }
        let parsed: Doc = toml::from_str(doc)?;
        Self::new(parsed.limits)
    }

    /// Row whose range contains `price`, if any.
    pub fn bucket_for(&self, price: f64) -> Option<&EntryLimit> {
        self.rows.iter().find(|row| row.contains(price))
    }

    pub fn rows(&self) -> &[EntryLimit] {
        &self.rows
    }
}
