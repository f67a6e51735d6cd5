//! Correlation analysis
//!
//! Computes a portfolio's statistical co-movement against the reference
//! asset over a fixed trailing window, classifies it into a qualitative
//! bracket, and attaches scenario context from the knowledge store.

use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::knowledge::{BracketScenarioContext, CoMovementBracket, HistoricalKnowledgeStore};
use crate::market_data::MarketDataSet;
use crate::portfolio::PortfolioSnapshot;
use crate::stats::{pearson_correlation, weighted_return_series};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Pearson coefficient in [-1, 1]; sign preserved for inverse movement.
    pub coefficient: f64,
    /// Magnitude as a rounded percentage in [0, 100].
    pub percentage: u32,
    pub bracket: CoMovementBracket,
    pub scenario_contexts: Vec<BracketScenarioContext>,
    /// Holdings left out of the weighting for insufficient price history.
    pub excluded_symbols: Vec<String>,
    /// Days of returns actually used (bounded by the configured window).
    pub effective_window_days: usize,
    pub narrative: String,
}

/// Analysis outcome. Insufficient price history is a distinguished result,
/// never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CorrelationOutcome {
    Complete(CorrelationResult),
    InsufficientData { detail: String },
}

impl CorrelationOutcome {
    pub fn as_complete(&self) -> Option<&CorrelationResult> {
        match self {
            CorrelationOutcome::Complete(result) => Some(result),
            CorrelationOutcome::InsufficientData { .. } => None,
        }
    }
}

pub struct CorrelationAnalyzer {
    market_data: Arc<MarketDataSet>,
    reference_symbol: String,
    knowledge: Arc<HistoricalKnowledgeStore>,
}

impl CorrelationAnalyzer {
    pub fn new(
        market_data: Arc<MarketDataSet>,
        reference_symbol: impl Into<String>,
        knowledge: Arc<HistoricalKnowledgeStore>,
    ) -> Self {
        Self {
            market_data,
            reference_symbol: reference_symbol.into(),
            knowledge,
        }
    }

    /// Run the correlation analysis for one snapshot.
    ///
    /// Weights are value shares at snapshot time, held fixed across the
    /// window (documented approximation, not a rebalanced return). Holdings
    /// with fewer than `min_history_days` usable returns are excluded from
    /// the weighting with a note; when the excluded value share exceeds
    /// `max_excluded_value_ratio` the outcome degrades to insufficient data.
    pub async fn analyze(
        &self,
        snapshot: &PortfolioSnapshot,
        config: &EngineConfig,
    ) -> Result<CorrelationOutcome> {
        let reference = self
            .market_data
            .history(&self.reference_symbol)
            .ok_or_else(|| {
                anyhow!(
                    "Reference asset {} has no loaded price history",
                    self.reference_symbol
                )
            })?;

        if reference.available_return_days() < config.min_history_days {
            return Ok(CorrelationOutcome::InsufficientData {
                detail: format!(
                    "Reference asset {} has only {} days of returns, need {}",
                    self.reference_symbol,
                    reference.available_return_days(),
                    config.min_history_days
                ),
            });
        }

        // Partition holdings into included and excluded by history depth.
        let mut included: Vec<(f64, Vec<f64>)> = Vec::new();
        let mut excluded_symbols: Vec<String> = Vec::new();
        let mut excluded_value = 0.0;

        for holding in &snapshot.holdings {
            let available = self
                .market_data
                .history(&holding.symbol)
                .map(|h| h.available_return_days())
                .unwrap_or(0);

            if available < config.min_history_days {
                warn!(
                    "Holding {} has insufficient history ({} days), excluding from weighting",
                    holding.symbol, available
                );
                excluded_symbols.push(holding.symbol.clone());
                excluded_value += holding.value();
                continue;
            }

            let returns = self
                .market_data
                .history(&holding.symbol)
                .map(|h| h.daily_returns())
                .unwrap_or_default();
            included.push((holding.value(), returns));
        }

        let excluded_ratio = excluded_value / snapshot.total_value;
        if included.is_empty() {
            return Ok(CorrelationOutcome::InsufficientData {
                detail: "No holding has sufficient price history for the window".to_string(),
            });
        }
        if excluded_ratio > config.max_excluded_value_ratio {
            return Ok(CorrelationOutcome::InsufficientData {
                detail: format!(
                    "{} holdings covering {:.1}% of portfolio value lack sufficient history",
                    excluded_symbols.len(),
                    excluded_ratio * 100.0
                ),
            });
        }

        // Trailing alignment: every series ends at the snapshot day, so the
        // usable window is the shortest available depth, capped at the
        // configured window.
        let effective_window = included
            .iter()
            .map(|(_, returns)| returns.len())
            .chain(std::iter::once(reference.available_return_days()))
            .min()
            .unwrap_or(0)
            .min(config.window_days);

        // Renormalize weights over the included holdings only.
        let included_value: f64 = included.iter().map(|(value, _)| value).sum();
        let components: Vec<(f64, &[f64])> = included
            .iter()
            .map(|(value, returns)| {
                let weight = value / included_value;
                let tail = &returns[returns.len() - effective_window..];
                (weight, tail)
            })
            .collect();

        let portfolio_returns = weighted_return_series(&components)?;
        let reference_returns = reference
            .trailing_returns(effective_window)
            .ok_or_else(|| anyhow!("Reference window shrank below the effective window"))?;

        let coefficient =
            pearson_correlation(&portfolio_returns, &reference_returns)?.clamp(-1.0, 1.0);
        let percentage = (coefficient.abs() * 100.0).round() as u32;
        let bracket = CoMovementBracket::from_percentage(percentage);

        info!(
            "Correlation vs {}: coefficient={:.4}, percentage={}%, bracket={:?} ({} included, {} excluded)",
            self.reference_symbol,
            coefficient,
            percentage,
            bracket,
            included.len(),
            excluded_symbols.len()
        );

        let scenario_contexts = self.knowledge.lookup_bracket_performance(bracket).await;
        let narrative = build_narrative(
            &self.reference_symbol,
            coefficient,
            percentage,
            bracket,
            effective_window,
            &excluded_symbols,
            &scenario_contexts,
        );

        Ok(CorrelationOutcome::Complete(CorrelationResult {
            coefficient,
            percentage,
            bracket,
            scenario_contexts,
            excluded_symbols,
            effective_window_days: effective_window,
            narrative,
        }))
    }
}

fn build_narrative(
    reference_symbol: &str,
    coefficient: f64,
    percentage: u32,
    bracket: CoMovementBracket,
    effective_window: usize,
    excluded_symbols: &[String],
    scenario_contexts: &[BracketScenarioContext],
) -> String {
    let direction = if coefficient >= 0.0 {
        "positively"
    } else {
        "negatively"
    };
    let mut parts = vec![format!(
        "Your portfolio is {}% {} correlated to {} over the past {} days. Co-movement bracket: {}.",
        percentage,
        direction,
        reference_symbol,
        effective_window,
        bracket.label()
    )];

    if !excluded_symbols.is_empty() {
        parts.push(format!(
            " Excluded from the weighting for insufficient price history: {}.",
            excluded_symbols.join(", ")
        ));
    }

    for context in scenario_contexts {
        parts.push(format!(
            " During the {} ({}), portfolios in this bracket lost {:.0}% vs {:.0}% for {}.",
            context.scenario_name,
            context.period_label,
            context.expected_loss_pct.abs(),
            context.reference_loss_pct.abs(),
            reference_symbol
        ));
    }

    parts.concat()
}
