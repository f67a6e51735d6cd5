use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Daily close history for one symbol.
///
/// Closes are ascending by day with the most recent close last. The engine
/// consumes these as already-parsed in-memory structures; acquisition and
/// file loading live outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub symbol: String,
    pub closes: Vec<f64>,
}

impl PriceHistory {
    pub fn new(symbol: impl Into<String>, closes: Vec<f64>) -> Self {
        Self {
            symbol: symbol.into(),
            closes,
        }
    }

    /// Simple daily returns: (close[t] - close[t-1]) / close[t-1].
    pub fn daily_returns(&self) -> Vec<f64> {
        self.closes
            .windows(2)
            .map(|pair| {
                let (prev, cur) = (pair[0], pair[1]);
                if prev > 0.0 && prev.is_finite() && cur.is_finite() {
                    (cur - prev) / prev
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// The last `days` daily returns, or None if fewer are available.
    pub fn trailing_returns(&self, days: usize) -> Option<Vec<f64>> {
        let returns = self.daily_returns();
        if returns.len() < days {
            return None;
        }
        Some(returns[returns.len() - days..].to_vec())
    }

    /// Number of daily returns derivable from this history.
    pub fn available_return_days(&self) -> usize {
        self.closes.len().saturating_sub(1)
    }
}

/// Pre-loaded price histories for the reference asset and all constituents.
#[derive(Debug, Clone, Default)]
pub struct MarketDataSet {
    histories: HashMap<String, PriceHistory>,
}

impl MarketDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, history: PriceHistory) {
        self.histories.insert(history.symbol.clone(), history);
    }

    pub fn history(&self, symbol: &str) -> Option<&PriceHistory> {
        self.histories.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_returns() {
        let history = PriceHistory::new("ETH", vec![100.0, 110.0, 99.0]);
        let returns = history.daily_returns();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_trailing_returns_window() {
        let history = PriceHistory::new("ETH", vec![100.0, 101.0, 102.0, 103.0]);
        let trailing = history.trailing_returns(2).unwrap();
        assert_eq!(trailing.len(), 2);
        assert!(history.trailing_returns(4).is_none());
    }

    #[test]
    fn test_zero_prev_close_yields_zero_return() {
        let history = PriceHistory::new("BAD", vec![0.0, 10.0]);
        assert_eq!(history.daily_returns(), vec![0.0]);
    }

    #[test]
    fn test_market_data_set_lookup() {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", vec![100.0, 101.0]));
        assert!(data.history("ETH").is_some());
        assert!(data.history("UNI").is_none());
        assert_eq!(data.len(), 1);
    }
}
