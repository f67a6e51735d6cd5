//! Risk synthesis
//!
//! Combines the correlation and concentration analyses into a single risk
//! judgment: compounding-risk detection, a historically grounded risk
//! multiplier, an overall risk level, and 1-3 ranked recommendations.
//! Synthesis is a pure function of the two results and the configuration;
//! identical inputs always produce identical output, recommendation order
//! included.

use log::info;
use serde::{Deserialize, Serialize};

use crate::concentration::{ConcentrationResult, DiversificationLabel};
use crate::config::EngineConfig;
use crate::correlation::CorrelationResult;
use crate::knowledge::CoMovementBracket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub rank: u8,
    pub action: String,
    pub rationale: String,
    pub expected_impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub correlation: CorrelationResult,
    pub concentration: ConcentrationResult,
    pub compounding_detected: bool,
    /// Dual-risk historical loss over the correlation-only expected loss.
    pub risk_multiplier: f64,
    /// False when no joint historical record exists and the multiplier is
    /// an estimate rather than a validated figure.
    pub multiplier_validated: bool,
    pub overall_risk_level: RiskLevel,
    pub recommendations: Vec<Recommendation>,
    pub narrative: String,
}

pub struct SynthesisEngine;

impl SynthesisEngine {
    /// Combine both analyses into the final judgment.
    pub fn synthesize(
        correlation: &CorrelationResult,
        concentration: &ConcentrationResult,
        config: &EngineConfig,
    ) -> SynthesisResult {
        let compounding_detected = correlation.percentage > config.compounding_correlation_pct
            && !concentration.concentrated_categories.is_empty();

        let (risk_multiplier, multiplier_validated, joint_scenario) = if compounding_detected {
            Self::risk_multiplier(correlation, concentration)
        } else {
            (1.0, false, None)
        };

        let overall_risk_level =
            Self::overall_risk_level(correlation, concentration, compounding_detected);

        let recommendations = Self::recommendations(
            correlation,
            concentration,
            compounding_detected,
            overall_risk_level,
            config,
        );

        let narrative = Self::narrative(
            correlation,
            concentration,
            compounding_detected,
            risk_multiplier,
            multiplier_validated,
            joint_scenario.as_deref(),
        );

        info!(
            "Synthesis: compounding={}, multiplier={:.2} (validated={}), risk_level={}, {} recommendations",
            compounding_detected,
            risk_multiplier,
            multiplier_validated,
            overall_risk_level.label(),
            recommendations.len()
        );

        SynthesisResult {
            correlation: correlation.clone(),
            concentration: concentration.clone(),
            compounding_detected,
            risk_multiplier,
            multiplier_validated,
            overall_risk_level,
            recommendations,
            narrative,
        }
    }

    /// Ordered mapping, first match wins.
    fn overall_risk_level(
        correlation: &CorrelationResult,
        concentration: &ConcentrationResult,
        compounding_detected: bool,
    ) -> RiskLevel {
        if compounding_detected && correlation.percentage > 90 {
            RiskLevel::Critical
        } else if compounding_detected {
            RiskLevel::High
        } else if correlation.bracket == CoMovementBracket::Moderate
            || concentration.diversification_label == DiversificationLabel::Moderate
        {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    /// Risk judgment when only the correlation analysis is available.
    pub fn risk_level_from_correlation_only(
        correlation: &CorrelationResult,
        config: &EngineConfig,
    ) -> RiskLevel {
        if correlation.percentage > config.compounding_correlation_pct {
            RiskLevel::High
        } else if correlation.bracket == CoMovementBracket::Moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    /// Risk judgment when only the concentration analysis is available.
    pub fn risk_level_from_concentration_only(concentration: &ConcentrationResult) -> RiskLevel {
        if !concentration.concentrated_categories.is_empty() {
            RiskLevel::High
        } else if concentration.diversification_label == DiversificationLabel::Moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    /// Dual-risk loss over correlation-only loss, from the worst scenario
    /// carrying both a bracket entry and the top concentrated category.
    fn risk_multiplier(
        correlation: &CorrelationResult,
        concentration: &ConcentrationResult,
    ) -> (f64, bool, Option<String>) {
        let Some(top_category) = concentration.concentrated_categories.first() else {
            return (1.0, false, None);
        };
        let Some(risk) = concentration
            .category_risks
            .iter()
            .find(|r| &r.category_name == top_category)
        else {
            return (1.0, false, None);
        };

        let mut best: Option<(f64, f64, String)> = None;
        for category_context in &risk.scenario_contexts {
            let Some(bracket_context) = correlation
                .scenario_contexts
                .iter()
                .find(|b| b.scenario_id == category_context.scenario_id)
            else {
                continue;
            };
            if bracket_context.expected_loss_pct == 0.0 {
                continue;
            }
            let replace = match &best {
                None => true,
                Some((current_loss, _, _)) => {
                    category_context.category_loss_pct.abs() > *current_loss
                }
            };
            if replace {
                best = Some((
                    category_context.category_loss_pct.abs(),
                    bracket_context.expected_loss_pct.abs(),
                    category_context.scenario_name.clone(),
                ));
            }
        }

        match best {
            Some((category_loss, bracket_loss, scenario_name)) => (
                category_loss / bracket_loss,
                true,
                Some(scenario_name),
            ),
            None => (1.0, false, None),
        }
    }

    fn recommendations(
        correlation: &CorrelationResult,
        concentration: &ConcentrationResult,
        compounding_detected: bool,
        overall_risk_level: RiskLevel,
        config: &EngineConfig,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if compounding_detected {
            // Concentration first: reducing it typically also reduces
            // correlation when the concentrated category moves with the
            // reference asset.
            recommendations.push(Self::concentration_recommendation(concentration, config, 1));
            recommendations.push(Self::correlation_recommendation(correlation, config, 2));
            recommendations.push(Self::prioritization_recommendation(3));
        } else if overall_risk_level == RiskLevel::Low
            && concentration.diversification_label == DiversificationLabel::WellDiversified
            && correlation.bracket == CoMovementBracket::Low
        {
            recommendations.push(Self::maintain_recommendation(correlation, concentration, config));
        } else {
            if !concentration.concentrated_categories.is_empty() {
                let rank = recommendations.len() as u8 + 1;
                recommendations.push(Self::concentration_recommendation(concentration, config, rank));
            } else if concentration.diversification_label == DiversificationLabel::Moderate {
                let rank = recommendations.len() as u8 + 1;
                recommendations.push(Self::trim_largest_recommendation(concentration, config, rank));
            }
            if correlation.bracket == CoMovementBracket::High {
                let rank = recommendations.len() as u8 + 1;
                recommendations.push(Self::correlation_recommendation(correlation, config, rank));
            } else if correlation.bracket == CoMovementBracket::Moderate {
                let rank = recommendations.len() as u8 + 1;
                recommendations.push(Self::watch_correlation_recommendation(correlation, rank));
            }
            if recommendations.is_empty() {
                recommendations.push(Self::maintain_recommendation(
                    correlation,
                    concentration,
                    config,
                ));
            }
        }

        recommendations.truncate(3);
        recommendations
    }

    fn concentration_recommendation(
        concentration: &ConcentrationResult,
        config: &EngineConfig,
        rank: u8,
    ) -> Recommendation {
        let top_category = concentration
            .concentrated_categories
            .first()
            .cloned()
            .unwrap_or_else(|| "the largest category".to_string());
        let share = concentration
            .breakdown
            .get(&top_category)
            .map(|c| c.percentage)
            .unwrap_or(0.0);

        let risk = concentration
            .category_risks
            .iter()
            .find(|r| r.category_name == top_category);
        let rationale = match risk.and_then(|r| r.scenario_contexts.first()) {
            Some(context) => format!(
                "Over-concentration means single-category crashes hit the whole portfolio: {} lost {:.0}% during the {} ({}).",
                top_category,
                context.category_loss_pct.abs(),
                context.scenario_name,
                context.period_label
            ),
            None => format!(
                "Over-concentration means a single-category crash hits most of the portfolio at once; no historical record is available for {}.",
                top_category
            ),
        };
        let expected_impact = match risk {
            Some(r) => format!(
                "Bringing {} below {:.0}% reduces single-category drawdown exposure. {}",
                top_category, config.moderate_threshold_pct, r.opportunity_cost_narrative
            ),
            None => format!(
                "Bringing {} below {:.0}% reduces single-category drawdown exposure.",
                top_category, config.moderate_threshold_pct
            ),
        };

        Recommendation {
            rank,
            action: format!(
                "Reduce {} concentration from {:.0}% to below {:.0}%",
                top_category, share, config.moderate_threshold_pct
            ),
            rationale,
            expected_impact,
        }
    }

    fn correlation_recommendation(
        correlation: &CorrelationResult,
        config: &EngineConfig,
        rank: u8,
    ) -> Recommendation {
        let (rationale, expected_impact) = match correlation.scenario_contexts.first() {
            Some(context) => (
                format!(
                    "At {}% co-movement the portfolio tracks the reference asset almost one for one; portfolios in this bracket lost {:.0}% during the {}.",
                    correlation.percentage,
                    context.expected_loss_pct.abs(),
                    context.scenario_name
                ),
                format!(
                    "Cutting co-movement below {}% historically kept drawdowns closer to {:.0}% instead of {:.0}%.",
                    config.compounding_correlation_pct,
                    context.expected_loss_pct.abs() * 0.9,
                    context.expected_loss_pct.abs()
                ),
            ),
            None => (
                format!(
                    "At {}% co-movement the portfolio tracks the reference asset almost one for one.",
                    correlation.percentage
                ),
                format!(
                    "Cutting co-movement below {}% reduces exposure to reference-asset drawdowns.",
                    config.compounding_correlation_pct
                ),
            ),
        };

        Recommendation {
            rank,
            action: format!(
                "Add holdings with low co-movement against the reference asset to bring correlation from {}% below {}%",
                correlation.percentage, config.compounding_correlation_pct
            ),
            rationale,
            expected_impact,
        }
    }

    fn trim_largest_recommendation(
        concentration: &ConcentrationResult,
        config: &EngineConfig,
        rank: u8,
    ) -> Recommendation {
        let largest = concentration
            .breakdown
            .values()
            .max_by(|a, b| {
                a.percentage
                    .partial_cmp(&b.percentage)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.category_name.cmp(&a.category_name))
            })
            .map(|c| (c.category_name.clone(), c.percentage))
            .unwrap_or_else(|| ("the largest category".to_string(), 0.0));

        Recommendation {
            rank,
            action: format!(
                "Trim {} from {:.0}% before it crosses the {:.0}% danger threshold",
                largest.0, largest.1, config.danger_threshold_pct
            ),
            rationale: format!(
                "{} is the largest allocation and already sits above the {:.0}% moderate threshold.",
                largest.0, config.moderate_threshold_pct
            ),
            expected_impact: "Keeping every category below the danger threshold avoids single-category drawdowns dominating portfolio losses.".to_string(),
        }
    }

    fn watch_correlation_recommendation(
        correlation: &CorrelationResult,
        rank: u8,
    ) -> Recommendation {
        Recommendation {
            rank,
            action: format!(
                "Monitor co-movement with the reference asset, currently {}%",
                correlation.percentage
            ),
            rationale: "Moderate co-movement still transmits most reference-asset drawdowns into the portfolio.".to_string(),
            expected_impact: "Quarterly checks catch drift into the high bracket before a stress event does.".to_string(),
        }
    }

    fn maintain_recommendation(
        correlation: &CorrelationResult,
        concentration: &ConcentrationResult,
        config: &EngineConfig,
    ) -> Recommendation {
        let mut categories: Vec<(&String, f64)> = concentration
            .breakdown
            .iter()
            .map(|(name, c)| (name, c.percentage))
            .collect();
        categories.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(b.0))
        });
        let allocation = categories
            .iter()
            .take(3)
            .map(|(name, pct)| format!("{} ({:.0}%)", name, pct))
            .collect::<Vec<_>>()
            .join(", ");

        Recommendation {
            rank: 1,
            action: "Maintain the current balanced portfolio structure".to_string(),
            rationale: format!(
                "Your {}% co-movement and diversified allocation ({}) limit compounding risk.",
                correlation.percentage, allocation
            ),
            expected_impact: format!(
                "Continue monitoring quarterly; revisit if any category exceeds {:.0}% or co-movement exceeds {}%.",
                config.moderate_threshold_pct, config.compounding_correlation_pct
            ),
        }
    }

    fn prioritization_recommendation(rank: u8) -> Recommendation {
        Recommendation {
            rank,
            action: "Address category concentration before correlation".to_string(),
            rationale: "When both risks are present, the concentrated category amplifies co-movement with the reference asset; reducing concentration also pulls correlation down as diversified holdings come in.".to_string(),
            expected_impact: "One rebalancing pass improves both risk dimensions at once instead of trading one off against the other.".to_string(),
        }
    }

    fn narrative(
        correlation: &CorrelationResult,
        concentration: &ConcentrationResult,
        compounding_detected: bool,
        risk_multiplier: f64,
        multiplier_validated: bool,
        joint_scenario: Option<&str>,
    ) -> String {
        if compounding_detected {
            let top_category = concentration
                .concentrated_categories
                .first()
                .cloned()
                .unwrap_or_default();
            let share = concentration
                .breakdown
                .get(&top_category)
                .map(|c| c.percentage)
                .unwrap_or(0.0);

            let mut parts = vec![format!(
                "Your {}% co-movement with the reference asset creates significant exposure on its own, and the {:.0}% {} concentration amplifies it: the two risks compound instead of adding.",
                correlation.percentage, share, top_category
            )];
            if multiplier_validated {
                if let Some(scenario) = joint_scenario {
                    parts.push(format!(
                        " In the {}, portfolios with this dual-risk structure lost {:.1}x what correlation alone predicted.",
                        scenario, risk_multiplier
                    ));
                }
            } else {
                parts.push(
                    " No joint historical record covers this exact combination; the risk multiplier is an estimate, not a historically validated figure."
                        .to_string(),
                );
            }
            parts.push(format!(
                " When {} and the reference asset fall together, losses multiply.",
                top_category
            ));
            parts.concat()
        } else {
            let bracket_word = match correlation.bracket {
                CoMovementBracket::High => "high",
                CoMovementBracket::Moderate => "manageable",
                CoMovementBracket::Low => "low",
            };
            let concentration_clause = match concentration.concentrated_categories.first() {
                None => "no category crosses the danger threshold".to_string(),
                Some(category) => format!(
                    "the {} concentration is not paired with high co-movement",
                    category
                ),
            };
            let mut parts = vec![format!(
                "Your {}% co-movement with the reference asset is {} and {}, so the compounding pattern is absent.",
                correlation.percentage, bracket_word, concentration_clause
            )];
            if let Some(context) = correlation.scenario_contexts.first() {
                parts.push(format!(
                    " During the {}, portfolios in this bracket lost around {:.0}% versus {:.0}% for the reference asset.",
                    context.scenario_name,
                    context.expected_loss_pct.abs(),
                    context.reference_loss_pct.abs()
                ));
            }
            parts.concat()
        }
    }
}
