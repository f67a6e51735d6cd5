//! Historical knowledge store
//!
//! Answers lookups of bracket and category performance during named
//! historical stress scenarios. Two interchangeable backends satisfy the
//! same contract: a graph backend pattern-matching over loaded facts, and a
//! table backend doing direct lookups over the loaded records. Callers never
//! see which backend served a call; a primary failure retries the fallback
//! exactly once, and a double failure yields an empty result set.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Qualitative classification of the co-movement coefficient magnitude.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CoMovementBracket {
    Low,
    Moderate,
    High,
}

impl CoMovementBracket {
    /// High >85%, Moderate 70-85%, Low <70%.
    pub fn from_percentage(percentage: u32) -> Self {
        if percentage > 85 {
            CoMovementBracket::High
        } else if percentage >= 70 {
            CoMovementBracket::Moderate
        } else {
            CoMovementBracket::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CoMovementBracket::High => "High (>85%)",
            CoMovementBracket::Moderate => "Moderate (70-85%)",
            CoMovementBracket::Low => "Low (<70%)",
        }
    }
}

/// A stored historical stress event, loaded once at process start and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub scenario_id: String,
    pub display_name: String,
    pub period_label: String,
    pub reference_asset_drawdown_pct: f64,
    pub bracket_loss_table: BTreeMap<CoMovementBracket, f64>,
    pub category_loss_table: BTreeMap<String, f64>,
    pub recovery_winners: BTreeSet<String>,
    pub recovery_period_label: String,
    /// Category -> recovery gain pct for the recovery window.
    pub recovery_gain_table: BTreeMap<String, f64>,
    /// Category -> best performing symbol during the recovery window.
    pub best_recovery_performer: BTreeMap<String, String>,
}

/// Excerpt of a scenario scoped to one co-movement bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketScenarioContext {
    pub scenario_id: String,
    pub scenario_name: String,
    pub period_label: String,
    pub expected_loss_pct: f64,
    pub reference_loss_pct: f64,
}

/// Excerpt of a scenario scoped to one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScenarioContext {
    pub scenario_id: String,
    pub scenario_name: String,
    pub period_label: String,
    pub category_loss_pct: f64,
    pub reference_loss_pct: f64,
}

/// Best alternative-category recovery outcome for a concentrated portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityCost {
    pub scenario_name: String,
    pub missed_category: String,
    pub best_performer: String,
    pub recovery_gain_pct: f64,
    pub recovery_period_label: String,
}

impl OpportunityCost {
    pub fn narrative(&self) -> String {
        format!(
            "During the {} recovery ({}), {} holdings such as {} gained {:.0}%.",
            self.scenario_name,
            self.recovery_period_label,
            self.missed_category,
            self.best_performer,
            self.recovery_gain_pct
        )
    }
}

/// Backend contract. Both implementations must return byte-identical output
/// for identical input.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    async fn bracket_performance(
        &self,
        bracket: CoMovementBracket,
    ) -> Result<Vec<BracketScenarioContext>>;

    async fn category_performance(&self, category: &str) -> Result<Vec<CategoryScenarioContext>>;

    async fn opportunity_cost(&self, category: &str) -> Result<Option<OpportunityCost>>;
}

/// Direct table lookups over pre-loaded scenario records.
pub struct TableBackend {
    records: Vec<ScenarioRecord>,
}

impl TableBackend {
    pub fn new(mut records: Vec<ScenarioRecord>) -> Self {
        records.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
        Self { records }
    }
}

#[async_trait]
impl KnowledgeBackend for TableBackend {
    async fn bracket_performance(
        &self,
        bracket: CoMovementBracket,
    ) -> Result<Vec<BracketScenarioContext>> {
        let mut contexts = Vec::new();
        for record in &self.records {
            if let Some(&loss) = record.bracket_loss_table.get(&bracket) {
                contexts.push(BracketScenarioContext {
                    scenario_id: record.scenario_id.clone(),
                    scenario_name: record.display_name.clone(),
                    period_label: record.period_label.clone(),
                    expected_loss_pct: loss,
                    reference_loss_pct: record.reference_asset_drawdown_pct,
                });
            }
        }
        Ok(contexts)
    }

    async fn category_performance(&self, category: &str) -> Result<Vec<CategoryScenarioContext>> {
        let mut contexts = Vec::new();
        for record in &self.records {
            if let Some(&loss) = record.category_loss_table.get(category) {
                contexts.push(CategoryScenarioContext {
                    scenario_id: record.scenario_id.clone(),
                    scenario_name: record.display_name.clone(),
                    period_label: record.period_label.clone(),
                    category_loss_pct: loss,
                    reference_loss_pct: record.reference_asset_drawdown_pct,
                });
            }
        }
        Ok(contexts)
    }

    async fn opportunity_cost(&self, category: &str) -> Result<Option<OpportunityCost>> {
        let mut best: Option<OpportunityCost> = None;
        for record in &self.records {
            for (missed_category, &gain) in &record.recovery_gain_table {
                if missed_category == category {
                    continue;
                }
                let performer = record
                    .best_recovery_performer
                    .get(missed_category)
                    .cloned()
                    .unwrap_or_else(|| {
                        record.recovery_winners.iter().next().cloned().unwrap_or_default()
                    });
                let candidate = OpportunityCost {
                    scenario_name: record.display_name.clone(),
                    missed_category: missed_category.clone(),
                    best_performer: performer,
                    recovery_gain_pct: gain,
                    recovery_period_label: record.recovery_period_label.clone(),
                };
                let better = match &best {
                    None => true,
                    Some(current) => gain > current.recovery_gain_pct,
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }
}

/// One fact in the loaded knowledge graph.
///
/// The graph holds the same information as the scenario records, flattened
/// into facts queried by pattern matching. Atoms are ordered by scenario id
/// at load so query output matches the table backend byte for byte.
#[derive(Debug, Clone)]
enum Atom {
    Scenario {
        id: String,
        name: String,
        period: String,
        recovery_period: String,
        reference_drawdown_pct: f64,
    },
    BracketLoss {
        scenario: String,
        bracket: CoMovementBracket,
        loss_pct: f64,
    },
    CategoryLoss {
        scenario: String,
        category: String,
        loss_pct: f64,
    },
    RecoveryGain {
        scenario: String,
        category: String,
        performer: String,
        gain_pct: f64,
    },
}

/// Pattern-matching queries over a loaded fact graph.
pub struct GraphBackend {
    atoms: Vec<Atom>,
}

impl GraphBackend {
    pub fn load(records: &[ScenarioRecord]) -> Self {
        let mut sorted: Vec<&ScenarioRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));

        let mut atoms = Vec::new();
        for record in sorted {
            atoms.push(Atom::Scenario {
                id: record.scenario_id.clone(),
                name: record.display_name.clone(),
                period: record.period_label.clone(),
                recovery_period: record.recovery_period_label.clone(),
                reference_drawdown_pct: record.reference_asset_drawdown_pct,
            });
            for (&bracket, &loss) in &record.bracket_loss_table {
                atoms.push(Atom::BracketLoss {
                    scenario: record.scenario_id.clone(),
                    bracket,
                    loss_pct: loss,
                });
            }
            for (category, &loss) in &record.category_loss_table {
                atoms.push(Atom::CategoryLoss {
                    scenario: record.scenario_id.clone(),
                    category: category.clone(),
                    loss_pct: loss,
                });
            }
            for (category, &gain) in &record.recovery_gain_table {
                let performer = record
                    .best_recovery_performer
                    .get(category)
                    .cloned()
                    .unwrap_or_else(|| {
                        record.recovery_winners.iter().next().cloned().unwrap_or_default()
                    });
                atoms.push(Atom::RecoveryGain {
                    scenario: record.scenario_id.clone(),
                    category: category.clone(),
                    performer,
                    gain_pct: gain,
                });
            }
        }
        debug!("Loaded knowledge graph with {} atoms", atoms.len());
        Self { atoms }
    }

    fn scenario_meta(&self, scenario_id: &str) -> Result<(&str, &str, &str, f64)> {
        self.atoms
            .iter()
            .find_map(|atom| match atom {
                Atom::Scenario {
                    id,
                    name,
                    period,
                    recovery_period,
                    reference_drawdown_pct,
                } if id == scenario_id => Some((
                    name.as_str(),
                    period.as_str(),
                    recovery_period.as_str(),
                    *reference_drawdown_pct,
                )),
                _ => None,
            })
            .ok_or_else(|| anyhow!("Scenario fact missing for {}", scenario_id))
    }
}

#[async_trait]
impl KnowledgeBackend for GraphBackend {
    async fn bracket_performance(
        &self,
        bracket: CoMovementBracket,
    ) -> Result<Vec<BracketScenarioContext>> {
        // match (BracketLoss ?scenario bracket ?loss)
        let mut contexts = Vec::new();
        for atom in &self.atoms {
            if let Atom::BracketLoss {
                scenario,
                bracket: fact_bracket,
                loss_pct,
            } = atom
            {
                if *fact_bracket != bracket {
                    continue;
                }
                let (name, period, _, reference_drawdown) = self.scenario_meta(scenario)?;
                contexts.push(BracketScenarioContext {
                    scenario_id: scenario.clone(),
                    scenario_name: name.to_string(),
                    period_label: period.to_string(),
                    expected_loss_pct: *loss_pct,
                    reference_loss_pct: reference_drawdown,
                });
            }
        }
        Ok(contexts)
    }

    async fn category_performance(&self, category: &str) -> Result<Vec<CategoryScenarioContext>> {
        // match (CategoryLoss ?scenario category ?loss)
        let mut contexts = Vec::new();
        for atom in &self.atoms {
            if let Atom::CategoryLoss {
                scenario,
                category: fact_category,
                loss_pct,
            } = atom
            {
                if fact_category != category {
                    continue;
                }
                let (name, period, _, reference_drawdown) = self.scenario_meta(scenario)?;
                contexts.push(CategoryScenarioContext {
                    scenario_id: scenario.clone(),
                    scenario_name: name.to_string(),
                    period_label: period.to_string(),
                    category_loss_pct: *loss_pct,
                    reference_loss_pct: reference_drawdown,
                });
            }
        }
        Ok(contexts)
    }

    async fn opportunity_cost(&self, category: &str) -> Result<Option<OpportunityCost>> {
        // match (RecoveryGain ?scenario ?other ?performer ?gain), ?other != category
        let mut best: Option<OpportunityCost> = None;
        for atom in &self.atoms {
            if let Atom::RecoveryGain {
                scenario,
                category: fact_category,
                performer,
                gain_pct,
            } = atom
            {
                if fact_category == category {
                    continue;
                }
                let (name, _, recovery_period, _) = self.scenario_meta(scenario)?;
                let candidate = OpportunityCost {
                    scenario_name: name.to_string(),
                    missed_category: fact_category.clone(),
                    best_performer: performer.clone(),
                    recovery_gain_pct: *gain_pct,
                    recovery_period_label: recovery_period.to_string(),
                };
                let better = match &best {
                    None => true,
                    Some(current) => *gain_pct > current.recovery_gain_pct,
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }
}

/// Backend selector, supplied through the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnowledgeBackendKind {
    Graph,
    Table,
}

/// Primary/fallback pair behind one opaque lookup surface.
///
/// Lookup failure semantics: a primary error retries the fallback exactly
/// once and logs the degradation; a double failure returns an empty result
/// (no historical context) and never propagates as a hard error.
pub struct HistoricalKnowledgeStore {
    primary: Arc<dyn KnowledgeBackend>,
    fallback: Arc<dyn KnowledgeBackend>,
}

impl HistoricalKnowledgeStore {
    pub fn new(records: Vec<ScenarioRecord>, kind: KnowledgeBackendKind) -> Self {
        let primary: Arc<dyn KnowledgeBackend> = match kind {
            KnowledgeBackendKind::Graph => Arc::new(GraphBackend::load(&records)),
            KnowledgeBackendKind::Table => Arc::new(TableBackend::new(records.clone())),
        };
        let fallback: Arc<dyn KnowledgeBackend> = Arc::new(TableBackend::new(records));
        Self { primary, fallback }
    }

    /// Test seam: wire arbitrary backends.
    pub fn with_backends(
        primary: Arc<dyn KnowledgeBackend>,
        fallback: Arc<dyn KnowledgeBackend>,
    ) -> Self {
        Self { primary, fallback }
    }

    pub async fn lookup_bracket_performance(
        &self,
        bracket: CoMovementBracket,
    ) -> Vec<BracketScenarioContext> {
        match self.primary.bracket_performance(bracket).await {
            Ok(contexts) => contexts,
            Err(primary_err) => {
                warn!(
                    "Primary knowledge backend failed for bracket lookup ({}), retrying fallback: {:#}",
                    bracket.label(),
                    primary_err
                );
                match self.fallback.bracket_performance(bracket).await {
                    Ok(contexts) => contexts,
                    Err(fallback_err) => {
                        error!(
                            "Knowledge lookup unavailable for bracket {}: {:#}",
                            bracket.label(),
                            fallback_err
                        );
                        Vec::new()
                    }
                }
            }
        }
    }

    pub async fn lookup_category_performance(&self, category: &str) -> Vec<CategoryScenarioContext> {
        match self.primary.category_performance(category).await {
            Ok(contexts) => contexts,
            Err(primary_err) => {
                warn!(
                    "Primary knowledge backend failed for category lookup ({}), retrying fallback: {:#}",
                    category, primary_err
                );
                match self.fallback.category_performance(category).await {
                    Ok(contexts) => contexts,
                    Err(fallback_err) => {
                        error!(
                            "Knowledge lookup unavailable for category {}: {:#}",
                            category, fallback_err
                        );
                        Vec::new()
                    }
                }
            }
        }
    }

    pub async fn lookup_opportunity_cost(&self, category: &str) -> Option<OpportunityCost> {
        match self.primary.opportunity_cost(category).await {
            Ok(cost) => cost,
            Err(primary_err) => {
                warn!(
                    "Primary knowledge backend failed for opportunity cost ({}), retrying fallback: {:#}",
                    category, primary_err
                );
                match self.fallback.opportunity_cost(category).await {
                    Ok(cost) => cost,
                    Err(fallback_err) => {
                        error!(
                            "Knowledge lookup unavailable for opportunity cost {}: {:#}",
                            category, fallback_err
                        );
                        None
                    }
                }
            }
        }
    }
}

/// The built-in deterministic scenario set: three historical stress events
/// with their loss tables, recovery winners, and recovery gains.
pub fn builtin_scenarios() -> Vec<ScenarioRecord> {
    vec![
        ScenarioRecord {
            scenario_id: "stress_2022_bear".to_string(),
            display_name: "2022 Bear Market".to_string(),
            period_label: "Nov 2021 - Dec 2022".to_string(),
            reference_asset_drawdown_pct: -75.0,
            bracket_loss_table: BTreeMap::from([
                (CoMovementBracket::High, -68.0),
                (CoMovementBracket::Moderate, -62.0),
                (CoMovementBracket::Low, -48.0),
            ]),
            category_loss_table: BTreeMap::from([
                ("DeFi Governance".to_string(), -75.0),
                ("Layer-2".to_string(), -60.0),
                ("Yield Protocols".to_string(), -80.0),
                ("Stablecoins".to_string(), -5.0),
            ]),
            recovery_winners: BTreeSet::from([
                "SOL".to_string(),
                "MATIC".to_string(),
                "OP".to_string(),
            ]),
            recovery_period_label: "Jun 2022 - Dec 2023".to_string(),
            recovery_gain_table: BTreeMap::from([
                ("Layer-2".to_string(), 510.0),
                ("Stablecoins".to_string(), 8.0),
            ]),
            best_recovery_performer: BTreeMap::from([
                ("Layer-2".to_string(), "MATIC".to_string()),
                ("Stablecoins".to_string(), "USDC".to_string()),
            ]),
        },
        ScenarioRecord {
            scenario_id: "stress_2021_correction".to_string(),
            display_name: "2021 Correction".to_string(),
            period_label: "May 2021 - Jul 2021".to_string(),
            reference_asset_drawdown_pct: -55.0,
            bracket_loss_table: BTreeMap::from([
                (CoMovementBracket::High, -48.0),
                (CoMovementBracket::Moderate, -43.0),
                (CoMovementBracket::Low, -32.0),
            ]),
            category_loss_table: BTreeMap::from([
                ("DeFi Governance".to_string(), -58.0),
                ("Layer-2".to_string(), -50.0),
                ("Yield Protocols".to_string(), -54.0),
                ("Stablecoins".to_string(), -2.0),
            ]),
            recovery_winners: BTreeSet::from(["MATIC".to_string(), "AVAX".to_string()]),
            recovery_period_label: "Aug 2021 - Nov 2021".to_string(),
            recovery_gain_table: BTreeMap::from([
                ("Layer-2".to_string(), 320.0),
                ("DeFi Governance".to_string(), 95.0),
            ]),
            best_recovery_performer: BTreeMap::from([
                ("Layer-2".to_string(), "MATIC".to_string()),
                ("DeFi Governance".to_string(), "AAVE".to_string()),
            ]),
        },
        ScenarioRecord {
            scenario_id: "stress_2020_covid".to_string(),
            display_name: "2020 Covid Crash".to_string(),
            period_label: "Mar 2020".to_string(),
            reference_asset_drawdown_pct: -65.0,
            bracket_loss_table: BTreeMap::from([
                (CoMovementBracket::High, -57.0),
                (CoMovementBracket::Moderate, -50.0),
                (CoMovementBracket::Low, -38.0),
            ]),
            category_loss_table: BTreeMap::from([
                ("DeFi Governance".to_string(), -48.0),
                ("Layer-2".to_string(), -52.0),
                ("Yield Protocols".to_string(), -55.0),
                ("Stablecoins".to_string(), -1.0),
            ]),
            recovery_winners: BTreeSet::from(["ETH".to_string(), "LINK".to_string()]),
            recovery_period_label: "Apr 2020 - Aug 2020".to_string(),
            recovery_gain_table: BTreeMap::from([
                ("DeFi Governance".to_string(), 210.0),
                ("Yield Protocols".to_string(), 180.0),
            ]),
            best_recovery_performer: BTreeMap::from([
                ("DeFi Governance".to_string(), "LINK".to_string()),
                ("Yield Protocols".to_string(), "YFI".to_string()),
            ]),
        },
    ]
}
