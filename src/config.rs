use crate::knowledge::KnowledgeBackendKind;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-level configuration, supplied explicitly at Coordinator
/// construction. Request-scoped: no field is ever read from ambient global
/// state, so concurrent requests can run with different thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trailing window for the co-movement calculation, in days.
    #[serde(default = "default_window_days")]
    pub window_days: usize,
    /// Minimum usable return days before a holding joins the weighting.
    #[serde(default = "default_min_history_days")]
    pub min_history_days: usize,
    /// Excluded value share above which correlation degrades to
    /// insufficient data.
    #[serde(default = "default_max_excluded_value_ratio")]
    pub max_excluded_value_ratio: f64,
    /// Category share (percent) above which a category is concentrated.
    #[serde(default = "default_danger_threshold_pct")]
    pub danger_threshold_pct: f64,
    /// Largest-category share (percent) above which diversification is
    /// Moderate.
    #[serde(default = "default_moderate_threshold_pct")]
    pub moderate_threshold_pct: f64,
    /// Correlation percentage above which concentration compounds the risk.
    #[serde(default = "default_compounding_correlation_pct")]
    pub compounding_correlation_pct: u32,
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    #[serde(default = "default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,
    #[serde(default = "default_knowledge_backend")]
    pub knowledge_backend: KnowledgeBackendKind,
}

fn default_window_days() -> usize {
    90
}

fn default_min_history_days() -> usize {
    60
}

fn default_max_excluded_value_ratio() -> f64 {
    0.5
}

fn default_danger_threshold_pct() -> f64 {
    60.0
}

fn default_moderate_threshold_pct() -> f64 {
    40.0
}

fn default_compounding_correlation_pct() -> u32 {
    85
}

fn default_per_call_timeout_ms() -> u64 {
    10_000
}

fn default_overall_deadline_ms() -> u64 {
    60_000
}

fn default_knowledge_backend() -> KnowledgeBackendKind {
    KnowledgeBackendKind::Graph
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_history_days: default_min_history_days(),
            max_excluded_value_ratio: default_max_excluded_value_ratio(),
            danger_threshold_pct: default_danger_threshold_pct(),
            moderate_threshold_pct: default_moderate_threshold_pct(),
            compounding_correlation_pct: default_compounding_correlation_pct(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
            overall_deadline_ms: default_overall_deadline_ms(),
            knowledge_backend: default_knowledge_backend(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_history_days < 2 {
            return Err(anyhow!(
                "min_history_days must be at least 2, got: {}",
                self.min_history_days
            ));
        }
        if self.window_days < self.min_history_days {
            return Err(anyhow!(
                "window_days ({}) must be at least min_history_days ({})",
                self.window_days,
                self.min_history_days
            ));
        }
        if self.max_excluded_value_ratio <= 0.0 || self.max_excluded_value_ratio > 1.0 {
            return Err(anyhow!(
                "max_excluded_value_ratio must be in (0.0, 1.0], got: {}",
                self.max_excluded_value_ratio
            ));
        }
        if self.moderate_threshold_pct <= 0.0 || self.moderate_threshold_pct >= 100.0 {
            return Err(anyhow!(
                "moderate_threshold_pct must be in (0, 100), got: {}",
                self.moderate_threshold_pct
            ));
        }
        if self.danger_threshold_pct <= self.moderate_threshold_pct
            || self.danger_threshold_pct >= 100.0
        {
            return Err(anyhow!(
                "danger_threshold_pct must be between moderate_threshold_pct ({}) and 100, got: {}",
                self.moderate_threshold_pct,
                self.danger_threshold_pct
            ));
        }
        if self.compounding_correlation_pct == 0 || self.compounding_correlation_pct > 100 {
            return Err(anyhow!(
                "compounding_correlation_pct must be in [1, 100], got: {}",
                self.compounding_correlation_pct
            ));
        }
        if self.per_call_timeout_ms == 0 || self.overall_deadline_ms == 0 {
            return Err(anyhow!("Timeouts must be non-zero"));
        }
        if self.per_call_timeout_ms > self.overall_deadline_ms {
            return Err(anyhow!(
                "per_call_timeout_ms ({}) must not exceed overall_deadline_ms ({})",
                self.per_call_timeout_ms,
                self.overall_deadline_ms
            ));
        }
        Ok(())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }
}
