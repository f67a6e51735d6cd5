use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative tolerance when checking a supplied total against the component sum.
pub const TOTAL_VALUE_REL_TOLERANCE: f64 = 1e-6;

/// A single holding within a portfolio snapshot.
///
/// Immutable once constructed; `new` rejects non-positive quantity or price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub unit_price: f64,
}

impl Holding {
    pub fn new(symbol: impl Into<String>, quantity: f64, unit_price: f64) -> Result<Self> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(anyhow!("Holding symbol must be non-empty"));
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(anyhow!("Holding {} has non-positive quantity: {}", symbol, quantity));
        }
        if !unit_price.is_finite() || unit_price <= 0.0 {
            return Err(anyhow!("Holding {} has non-positive unit price: {}", symbol, unit_price));
        }
        Ok(Self {
            symbol,
            quantity,
            unit_price,
        })
    }

    pub fn value(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

/// A point-in-time view of a portfolio.
///
/// Invariant: `total_value` equals the sum of holding values within
/// `TOTAL_VALUE_REL_TOLERANCE` relative tolerance. Constructing from zero
/// holdings is an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub owner_identifier: String,
    pub holdings: Vec<Holding>,
    pub total_value: f64,
    pub snapshot_time: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// Build a snapshot, deriving `total_value` from the holdings.
    pub fn new(owner_identifier: impl Into<String>, holdings: Vec<Holding>) -> Result<Self> {
        if holdings.is_empty() {
            return Err(anyhow!("Portfolio must contain at least one holding"));
        }
        let total_value = holdings.iter().map(Holding::value).sum();
        Ok(Self {
            owner_identifier: owner_identifier.into(),
            holdings,
            total_value,
            snapshot_time: Utc::now(),
        })
    }

    /// Build a snapshot from an externally supplied total, verifying it
    /// against the component sum.
    pub fn with_total(
        owner_identifier: impl Into<String>,
        holdings: Vec<Holding>,
        total_value: f64,
        snapshot_time: DateTime<Utc>,
    ) -> Result<Self> {
        if holdings.is_empty() {
            return Err(anyhow!("Portfolio must contain at least one holding"));
        }
        let calculated: f64 = holdings.iter().map(Holding::value).sum();
        let scale = calculated.abs().max(1.0);
        if (total_value - calculated).abs() > TOTAL_VALUE_REL_TOLERANCE * scale {
            return Err(anyhow!(
                "total_value ({}) does not match sum of holding values ({})",
                total_value,
                calculated
            ));
        }
        Ok(Self {
            owner_identifier: owner_identifier.into(),
            holdings,
            total_value,
            snapshot_time,
        })
    }

    /// Value share of a single holding at snapshot time.
    pub fn weight_of(&self, symbol: &str) -> Option<f64> {
        self.holdings
            .iter()
            .find(|h| h.symbol == symbol)
            .map(|h| h.value() / self.total_value)
    }
}
