//! Concentration analysis
//!
//! Maps each holding to a named category, computes per-category portfolio
//! shares, flags categories exceeding the danger threshold, and attaches
//! scenario and opportunity-cost context from the knowledge store.

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::knowledge::{CategoryScenarioContext, HistoricalKnowledgeStore};
use crate::portfolio::PortfolioSnapshot;

/// Symbol -> category mapping table, pre-loaded by the caller.
#[derive(Debug, Clone, Default)]
pub struct CategoryMap {
    map: HashMap<String, String>,
}

impl CategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, C)>,
        S: Into<String>,
        C: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(symbol, category)| (symbol.into(), category.into()))
            .collect();
        Self { map }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, category: impl Into<String>) {
        self.map.insert(symbol.into(), category.into());
    }

    pub fn category_of(&self, symbol: &str) -> Option<&str> {
        self.map.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryHolding {
    pub category_name: String,
    pub value: f64,
    /// Share of total portfolio value, in percent. Unknown symbols stay in
    /// the denominator, so unknown exposure depresses these shares.
    pub percentage: f64,
    pub member_symbols: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRiskContext {
    pub category_name: String,
    pub scenario_contexts: Vec<CategoryScenarioContext>,
    pub opportunity_cost_narrative: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiversificationLabel {
    WellDiversified,
    Moderate,
    HighConcentration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentrationResult {
    pub breakdown: BTreeMap<String, CategoryHolding>,
    /// Categories strictly above the danger threshold, largest share first.
    pub concentrated_categories: Vec<String>,
    pub diversification_label: DiversificationLabel,
    pub category_risks: Vec<CategoryRiskContext>,
    pub unknown_symbols: BTreeSet<String>,
    /// Share of total value held in unmapped symbols, in percent.
    pub unknown_value_pct: f64,
    pub narrative: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConcentrationOutcome {
    Complete(ConcentrationResult),
    InsufficientData { detail: String },
}

impl ConcentrationOutcome {
    pub fn as_complete(&self) -> Option<&ConcentrationResult> {
        match self {
            ConcentrationOutcome::Complete(result) => Some(result),
            ConcentrationOutcome::InsufficientData { .. } => None,
        }
    }
}

pub struct ConcentrationAnalyzer {
    categories: Arc<CategoryMap>,
    knowledge: Arc<HistoricalKnowledgeStore>,
}

impl ConcentrationAnalyzer {
    pub fn new(categories: Arc<CategoryMap>, knowledge: Arc<HistoricalKnowledgeStore>) -> Self {
        Self {
            categories,
            knowledge,
        }
    }

    /// Run the concentration analysis for one snapshot.
    pub async fn analyze(
        &self,
        snapshot: &PortfolioSnapshot,
        config: &EngineConfig,
    ) -> Result<ConcentrationOutcome> {
        let mut breakdown: BTreeMap<String, CategoryHolding> = BTreeMap::new();
        let mut unknown_symbols: BTreeSet<String> = BTreeSet::new();
        let mut unknown_value = 0.0;

        for holding in &snapshot.holdings {
            match self.categories.category_of(&holding.symbol) {
                Some(category) => {
                    let entry =
                        breakdown
                            .entry(category.to_string())
                            .or_insert_with(|| CategoryHolding {
                                category_name: category.to_string(),
                                value: 0.0,
                                percentage: 0.0,
                                member_symbols: BTreeSet::new(),
                            });
                    entry.value += holding.value();
                    entry.member_symbols.insert(holding.symbol.clone());
                }
                None => {
                    warn!(
                        "Symbol {} absent from the category mapping, accumulating as unknown",
                        holding.symbol
                    );
                    unknown_symbols.insert(holding.symbol.clone());
                    unknown_value += holding.value();
                }
            }
        }

        if breakdown.is_empty() {
            return Ok(ConcentrationOutcome::InsufficientData {
                detail: format!(
                    "No holding maps to a known category ({} unknown symbols)",
                    unknown_symbols.len()
                ),
            });
        }

        // Unknown value stays in the denominator: category shares are of the
        // full total, never of the mapped subtotal.
        for category in breakdown.values_mut() {
            category.percentage = category.value / snapshot.total_value * 100.0;
        }
        let unknown_value_pct = unknown_value / snapshot.total_value * 100.0;

        let mut concentrated_categories: Vec<String> = breakdown
            .values()
            .filter(|c| c.percentage > config.danger_threshold_pct)
            .map(|c| c.category_name.clone())
            .collect();
        concentrated_categories.sort_by(|a, b| {
            let pa = breakdown[a].percentage;
            let pb = breakdown[b].percentage;
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(b))
        });

        let largest_share = breakdown
            .values()
            .map(|c| c.percentage)
            .fold(0.0_f64, f64::max);
        let diversification_label = if !concentrated_categories.is_empty() {
            DiversificationLabel::HighConcentration
        } else if largest_share > config.moderate_threshold_pct {
            DiversificationLabel::Moderate
        } else {
            DiversificationLabel::WellDiversified
        };

        info!(
            "Concentration: {} categories, largest share {:.1}%, {} concentrated, label {:?}",
            breakdown.len(),
            largest_share,
            concentrated_categories.len(),
            diversification_label
        );

        let mut category_risks = Vec::new();
        for category in &concentrated_categories {
            let scenario_contexts = self.knowledge.lookup_category_performance(category).await;
            let opportunity_cost_narrative = match self
                .knowledge
                .lookup_opportunity_cost(category)
                .await
            {
                Some(cost) => cost.narrative(),
                None => "No recovery comparison is available for alternative categories.".to_string(),
            };
            category_risks.push(CategoryRiskContext {
                category_name: category.clone(),
                scenario_contexts,
                opportunity_cost_narrative,
            });
        }

        let narrative = build_narrative(
            &breakdown,
            &concentrated_categories,
            diversification_label,
            &category_risks,
            &unknown_symbols,
            unknown_value_pct,
        );

        Ok(ConcentrationOutcome::Complete(ConcentrationResult {
            breakdown,
            concentrated_categories,
            diversification_label,
            category_risks,
            unknown_symbols,
            unknown_value_pct,
            narrative,
        }))
    }
}

fn build_narrative(
    breakdown: &BTreeMap<String, CategoryHolding>,
    concentrated_categories: &[String],
    label: DiversificationLabel,
    category_risks: &[CategoryRiskContext],
    unknown_symbols: &BTreeSet<String>,
    unknown_value_pct: f64,
) -> String {
    let mut sorted: Vec<&CategoryHolding> = breakdown.values().collect();
    sorted.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.category_name.cmp(&b.category_name))
    });

    let mut parts = vec![format!(
        "Your portfolio is distributed across {} categories:",
        breakdown.len()
    )];
    for category in &sorted {
        let members: Vec<&str> = category.member_symbols.iter().map(String::as_str).collect();
        parts.push(format!(
            "\n- {}: {:.1}% - {}",
            category.category_name,
            category.percentage,
            members.join(", ")
        ));
    }

    if !unknown_symbols.is_empty() {
        let unknown: Vec<&str> = unknown_symbols.iter().map(String::as_str).collect();
        parts.push(format!(
            "\n- Unmapped symbols ({:.1}%): {}",
            unknown_value_pct,
            unknown.join(", ")
        ));
    }

    if concentrated_categories.is_empty() {
        parts.push("\n\nWell-diversified across categories, no concentration warnings.".to_string());
    } else {
        for category in concentrated_categories {
            let share = breakdown[category].percentage;
            parts.push(format!(
                "\n\nHIGH CONCENTRATION: {:.1}% of your portfolio is in {} holdings. If {} falls, most of your portfolio falls with it.",
                share, category, category
            ));
        }
        for risk in category_risks {
            for context in &risk.scenario_contexts {
                parts.push(format!(
                    "\nDuring the {} ({}), {} lost {:.0}% vs {:.0}% for the reference asset.",
                    context.scenario_name,
                    context.period_label,
                    risk.category_name,
                    context.category_loss_pct.abs(),
                    context.reference_loss_pct.abs()
                ));
            }
            parts.push(format!("\n{}", risk.opportunity_cost_narrative));
        }
    }

    if label == DiversificationLabel::Moderate {
        parts.push(
            "\n\nThe largest category sits above the moderate threshold; watch it before it becomes a concentration."
                .to_string(),
        );
    }

    parts.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeBackendKind, builtin_scenarios};
    use crate::portfolio::Holding;

    fn demo_categories() -> CategoryMap {
        CategoryMap::from_entries([
            ("UNI", "DeFi Governance"),
            ("AAVE", "DeFi Governance"),
            ("COMP", "DeFi Governance"),
            ("MATIC", "Layer-2"),
            ("OP", "Layer-2"),
            ("USDC", "Stablecoins"),
            ("YFI", "Yield Protocols"),
        ])
    }

    fn analyzer() -> ConcentrationAnalyzer {
        let knowledge = Arc::new(HistoricalKnowledgeStore::new(
            builtin_scenarios(),
            KnowledgeBackendKind::Table,
        ));
        ConcentrationAnalyzer::new(Arc::new(demo_categories()), knowledge)
    }

    fn snapshot(holdings: Vec<Holding>) -> PortfolioSnapshot {
        PortfolioSnapshot::new("owner-1", holdings).unwrap()
    }

    #[tokio::test]
    async fn test_concentrated_category_flagged() {
        let outcome = analyzer()
            .analyze(
                &snapshot(vec![
                    Holding::new("UNI", 68.0, 10.0).unwrap(),
                    Holding::new("MATIC", 32.0, 10.0).unwrap(),
                ]),
                &EngineConfig::default(),
            )
            .await
            .unwrap();
        let result = outcome.as_complete().expect("complete result");
        assert_eq!(result.concentrated_categories, vec!["DeFi Governance"]);
        assert_eq!(
            result.diversification_label,
            DiversificationLabel::HighConcentration
        );
        assert_eq!(result.category_risks.len(), 1);
        assert!(!result.category_risks[0].scenario_contexts.is_empty());
        assert!(result.category_risks[0]
            .opportunity_cost_narrative
            .contains("Layer-2"));
    }

    #[tokio::test]
    async fn test_percentages_sum_to_hundred_with_unknowns() {
        let outcome = analyzer()
            .analyze(
                &snapshot(vec![
                    Holding::new("UNI", 50.0, 10.0).unwrap(),
                    Holding::new("MATIC", 30.0, 10.0).unwrap(),
                    Holding::new("MYSTERY", 20.0, 10.0).unwrap(),
                ]),
                &EngineConfig::default(),
            )
            .await
            .unwrap();
        let result = outcome.as_complete().expect("complete result");
        assert!(result.unknown_symbols.contains("MYSTERY"));
        assert!((result.unknown_value_pct - 20.0).abs() < 1e-9);

        let known_sum: f64 = result.breakdown.values().map(|c| c.percentage).sum();
        assert!((known_sum + result.unknown_value_pct - 100.0).abs() < 1e-9);
        // Unknown exposure depresses the mapped shares.
        assert!((result.breakdown["DeFi Governance"].percentage - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_well_diversified_explicit_narrative() {
        let outcome = analyzer()
            .analyze(
                &snapshot(vec![
                    Holding::new("UNI", 30.0, 10.0).unwrap(),
                    Holding::new("MATIC", 35.0, 10.0).unwrap(),
                    Holding::new("USDC", 35.0, 10.0).unwrap(),
                ]),
                &EngineConfig::default(),
            )
            .await
            .unwrap();
        let result = outcome.as_complete().expect("complete result");
        assert!(result.concentrated_categories.is_empty());
        assert_eq!(
            result.diversification_label,
            DiversificationLabel::WellDiversified
        );
        assert!(result.narrative.contains("no concentration warnings"));
    }

    #[tokio::test]
    async fn test_moderate_band_on_largest_share() {
        let outcome = analyzer()
            .analyze(
                &snapshot(vec![
                    Holding::new("UNI", 55.0, 10.0).unwrap(),
                    Holding::new("MATIC", 25.0, 10.0).unwrap(),
                    Holding::new("USDC", 20.0, 10.0).unwrap(),
                ]),
                &EngineConfig::default(),
            )
            .await
            .unwrap();
        let result = outcome.as_complete().expect("complete result");
        assert!(result.concentrated_categories.is_empty());
        assert_eq!(result.diversification_label, DiversificationLabel::Moderate);
    }

    #[tokio::test]
    async fn test_danger_threshold_is_strict() {
        // Exactly at the threshold is not concentrated.
        let outcome = analyzer()
            .analyze(
                &snapshot(vec![
                    Holding::new("UNI", 60.0, 10.0).unwrap(),
                    Holding::new("MATIC", 40.0, 10.0).unwrap(),
                ]),
                &EngineConfig::default(),
            )
            .await
            .unwrap();
        let result = outcome.as_complete().expect("complete result");
        assert!(result.concentrated_categories.is_empty());
        assert_eq!(result.diversification_label, DiversificationLabel::Moderate);
    }

    #[tokio::test]
    async fn test_all_unknown_is_insufficient_data() {
        let outcome = analyzer()
            .analyze(
                &snapshot(vec![Holding::new("MYSTERY", 10.0, 10.0).unwrap()]),
                &EngineConfig::default(),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ConcentrationOutcome::InsufficientData { .. }
        ));
    }
}
