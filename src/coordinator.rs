//! Request coordination
//!
//! Owns the end-to-end request: dispatches both analyzer calls concurrently,
//! enforces per-call timeouts and the overall deadline, assembles partial
//! results when one side fails, invokes synthesis, and returns a
//! transparency-annotated report. Nothing below this boundary propagates an
//! unhandled error past it; every sub-failure is normalized into a per-call
//! outcome record.

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::concentration::{CategoryMap, ConcentrationAnalyzer, ConcentrationOutcome};
use crate::config::EngineConfig;
use crate::correlation::{CorrelationAnalyzer, CorrelationOutcome};
use crate::knowledge::HistoricalKnowledgeStore;
use crate::market_data::MarketDataSet;
use crate::portfolio::PortfolioSnapshot;
use crate::synthesis::{RiskLevel, SynthesisEngine, SynthesisResult};

/// Inbound contract from the conversational layer (out of scope here).
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    /// Caller-supplied identifier for tracing the response back.
    pub correlation_id: String,
    pub snapshot: PortfolioSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerKind {
    Correlation,
    Concentration,
}

impl AnalyzerKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::Correlation => "CorrelationAnalyzer",
            AnalyzerKind::Concentration => "ConcentrationAnalyzer",
        }
    }
}

/// Per-call resolution: Pending calls resolve to exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Succeeded,
    TimedOut,
    Failed { cause: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerCallRecord {
    pub analyzer: AnalyzerKind,
    pub status: CallStatus,
    pub duration_ms: u64,
}

/// Outbound contract: the assembled report. Analyzer results are carried
/// verbatim; any summarization belongs to the consuming layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub correlation_id: String,
    pub correlation: Option<CorrelationOutcome>,
    pub concentration: Option<ConcentrationOutcome>,
    pub synthesis: Option<SynthesisResult>,
    pub overall_risk_level: RiskLevel,
    /// Present whenever the judgment rests on partial information.
    pub degraded_note: Option<String>,
    pub call_records: Vec<AnalyzerCallRecord>,
    pub total_duration_ms: u64,
}

/// Terminal failure: no usable analysis on either side.
#[derive(Debug, Error)]
pub enum AnalysisFailure {
    #[error(
        "both analyzers failed for request {correlation_id}: correlation: {correlation_cause}; concentration: {concentration_cause}"
    )]
    BothAnalyzersFailed {
        correlation_id: String,
        correlation_cause: String,
        concentration_cause: String,
        call_records: Vec<AnalyzerCallRecord>,
    },
    #[error("request {correlation_id} exceeded the overall deadline of {deadline_ms}ms")]
    DeadlineExceeded {
        correlation_id: String,
        deadline_ms: u64,
    },
}

pub struct Coordinator {
    config: EngineConfig,
    correlation: Arc<CorrelationAnalyzer>,
    concentration: Arc<ConcentrationAnalyzer>,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        market_data: Arc<MarketDataSet>,
        reference_symbol: impl Into<String>,
        categories: Arc<CategoryMap>,
        knowledge: Arc<HistoricalKnowledgeStore>,
    ) -> Result<Self> {
        config.validate()?;
        let correlation = Arc::new(CorrelationAnalyzer::new(
            market_data,
            reference_symbol,
            Arc::clone(&knowledge),
        ));
        let concentration = Arc::new(ConcentrationAnalyzer::new(categories, knowledge));
        Ok(Self {
            config,
            correlation,
            concentration,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one analysis request end to end, bounded by the overall deadline.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisReport, AnalysisFailure> {
        let deadline = self.config.overall_deadline();
        let correlation_id = request.correlation_id.clone();
        match tokio::time::timeout(deadline, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Request {} exceeded the overall deadline of {:?}",
                    correlation_id, deadline
                );
                Err(AnalysisFailure::DeadlineExceeded {
                    correlation_id,
                    deadline_ms: self.config.overall_deadline_ms,
                })
            }
        }
    }

    async fn run(&self, request: AnalyzeRequest) -> Result<AnalysisReport, AnalysisFailure> {
        let started = Instant::now();
        let per_call = self.config.per_call_timeout();
        info!(
            "Dispatching both analyzers for request {} ({} holdings)",
            request.correlation_id,
            request.snapshot.holdings.len()
        );

        // Fan out: both calls run as independent tasks with no shared
        // mutable state; a timeout on one never cancels the other.
        let correlation_handle = {
            let analyzer = Arc::clone(&self.correlation);
            let snapshot = request.snapshot.clone();
            let config = self.config.clone();
            tokio::spawn(async move { analyzer.analyze(&snapshot, &config).await })
        };
        let concentration_handle = {
            let analyzer = Arc::clone(&self.concentration);
            let snapshot = request.snapshot.clone();
            let config = self.config.clone();
            tokio::spawn(async move { analyzer.analyze(&snapshot, &config).await })
        };

        // Fan in: wait on both resolutions together so each call's timeout
        // clock runs from dispatch, not from the other call's completion.
        let ((correlation_outcome, correlation_record), (concentration_outcome, concentration_record)) =
            futures::future::join(
                Self::resolve_call(AnalyzerKind::Correlation, correlation_handle, per_call),
                Self::resolve_call(AnalyzerKind::Concentration, concentration_handle, per_call),
            )
            .await;

        let call_records = vec![correlation_record, concentration_record];
        self.assemble(
            request.correlation_id,
            correlation_outcome,
            concentration_outcome,
            call_records,
            started,
        )
    }

    /// Wait on one spawned analyzer call, normalizing every way it can end
    /// into a call record. On timeout the underlying task is aborted.
    async fn resolve_call<T>(
        kind: AnalyzerKind,
        mut handle: JoinHandle<Result<T>>,
        per_call: Duration,
    ) -> (Option<T>, AnalyzerCallRecord) {
        let started = Instant::now();
        let (outcome, status) = match tokio::time::timeout(per_call, &mut handle).await {
            Ok(Ok(Ok(outcome))) => (Some(outcome), CallStatus::Succeeded),
            Ok(Ok(Err(err))) => {
                error!("{} failed: {:#}", kind.name(), err);
                (
                    None,
                    CallStatus::Failed {
                        cause: format!("{err:#}"),
                    },
                )
            }
            Ok(Err(join_err)) => {
                error!("{} task aborted: {}", kind.name(), join_err);
                (
                    None,
                    CallStatus::Failed {
                        cause: format!("analyzer task aborted: {join_err}"),
                    },
                )
            }
            Err(_) => {
                warn!("{} timed out after {:?}, cancelling", kind.name(), per_call);
                handle.abort();
                (None, CallStatus::TimedOut)
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        if status == CallStatus::Succeeded {
            info!("{} completed in {}ms", kind.name(), duration_ms);
        }
        (
            outcome,
            AnalyzerCallRecord {
                analyzer: kind,
                status,
                duration_ms,
            },
        )
    }

    fn assemble(
        &self,
        correlation_id: String,
        correlation_outcome: Option<CorrelationOutcome>,
        concentration_outcome: Option<ConcentrationOutcome>,
        call_records: Vec<AnalyzerCallRecord>,
        started: Instant,
    ) -> Result<AnalysisReport, AnalysisFailure> {
        let correlation_usable = correlation_outcome
            .as_ref()
            .and_then(CorrelationOutcome::as_complete);
        let concentration_usable = concentration_outcome
            .as_ref()
            .and_then(ConcentrationOutcome::as_complete);

        let (synthesis, overall_risk_level, degraded_note) =
            match (correlation_usable, concentration_usable) {
                (Some(correlation), Some(concentration)) => {
                    let synthesis =
                        SynthesisEngine::synthesize(correlation, concentration, &self.config);
                    let level = synthesis.overall_risk_level;
                    (Some(synthesis), level, None)
                }
                (Some(correlation), None) => {
                    let cause = Self::unusable_cause(
                        &call_records[1],
                        concentration_outcome.as_ref().map(|o| {
                            matches!(o, ConcentrationOutcome::InsufficientData { .. })
                        }),
                    );
                    let note = format!(
                        "ConcentrationAnalyzer produced no usable result ({cause}); the risk judgment is based on correlation analysis alone and may miss concentration risk."
                    );
                    warn!("Request {}: {}", correlation_id, note);
                    let level = SynthesisEngine::risk_level_from_correlation_only(
                        correlation,
                        &self.config,
                    );
                    (None, level, Some(note))
                }
                (None, Some(concentration)) => {
                    let cause = Self::unusable_cause(
                        &call_records[0],
                        correlation_outcome.as_ref().map(|o| {
                            matches!(o, CorrelationOutcome::InsufficientData { .. })
                        }),
                    );
                    let note = format!(
                        "CorrelationAnalyzer produced no usable result ({cause}); the risk judgment is based on concentration analysis alone and may miss co-movement risk."
                    );
                    warn!("Request {}: {}", correlation_id, note);
                    let level =
                        SynthesisEngine::risk_level_from_concentration_only(concentration);
                    (None, level, Some(note))
                }
                (None, None) => {
                    let correlation_cause = Self::unusable_cause(
                        &call_records[0],
                        correlation_outcome.as_ref().map(|o| {
                            matches!(o, CorrelationOutcome::InsufficientData { .. })
                        }),
                    );
                    let concentration_cause = Self::unusable_cause(
                        &call_records[1],
                        concentration_outcome.as_ref().map(|o| {
                            matches!(o, ConcentrationOutcome::InsufficientData { .. })
                        }),
                    );
                    error!(
                        "Request {}: no usable analysis on either side (correlation: {}; concentration: {})",
                        correlation_id, correlation_cause, concentration_cause
                    );
                    return Err(AnalysisFailure::BothAnalyzersFailed {
                        correlation_id,
                        correlation_cause,
                        concentration_cause,
                        call_records,
                    });
                }
            };

        let total_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Request {} assembled in {}ms: risk_level={}, degraded={}",
            correlation_id,
            total_duration_ms,
            overall_risk_level.label(),
            degraded_note.is_some()
        );

        Ok(AnalysisReport {
            correlation_id,
            correlation: correlation_outcome,
            concentration: concentration_outcome,
            synthesis,
            overall_risk_level,
            degraded_note,
            call_records,
            total_duration_ms,
        })
    }

    fn unusable_cause(record: &AnalyzerCallRecord, insufficient: Option<bool>) -> String {
        match &record.status {
            CallStatus::TimedOut => format!("timed out after {}ms", record.duration_ms),
            CallStatus::Failed { cause } => cause.clone(),
            CallStatus::Succeeded => {
                if insufficient == Some(true) {
                    "insufficient data".to_string()
                } else {
                    "no result".to_string()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeBackendKind, builtin_scenarios};
    use crate::market_data::PriceHistory;
    use crate::portfolio::Holding;

    fn tracking_series(days: usize, scale: f64) -> Vec<f64> {
        let mut price = 100.0;
        let mut out = vec![price];
        for i in 0..days {
            let r = 0.01 * ((i % 7) as f64 - 3.0) / 3.0;
            price *= 1.0 + r * scale;
            out.push(price);
        }
        out
    }

    fn demo_market_data(days: usize) -> MarketDataSet {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", tracking_series(days, 1.0)));
        data.insert(PriceHistory::new("UNI", tracking_series(days, 0.9)));
        data.insert(PriceHistory::new("MATIC", tracking_series(days, 0.8)));
        data
    }

    fn demo_coordinator(config: EngineConfig) -> Coordinator {
        let categories = CategoryMap::from_entries([
            ("UNI", "DeFi Governance"),
            ("MATIC", "Layer-2"),
        ]);
        let knowledge = Arc::new(HistoricalKnowledgeStore::new(
            builtin_scenarios(),
            KnowledgeBackendKind::Table,
        ));
        Coordinator::new(
            config,
            Arc::new(demo_market_data(40)),
            "ETH",
            Arc::new(categories),
            knowledge,
        )
        .unwrap()
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            window_days: 30,
            min_history_days: 10,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_full_report_assembly() {
        let coordinator = demo_coordinator(test_config());
        let request = AnalyzeRequest {
            correlation_id: "req-1".to_string(),
            snapshot: PortfolioSnapshot::new(
                "owner-1",
                vec![
                    Holding::new("UNI", 70.0, 10.0).unwrap(),
                    Holding::new("MATIC", 30.0, 10.0).unwrap(),
                ],
            )
            .unwrap(),
        };

        let report = coordinator.analyze(request).await.unwrap();
        assert_eq!(report.correlation_id, "req-1");
        assert!(report.synthesis.is_some());
        assert!(report.degraded_note.is_none());
        assert_eq!(report.call_records.len(), 2);
        assert!(report
            .call_records
            .iter()
            .all(|r| r.status == CallStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_concentration_insufficient_data_degrades() {
        // No symbol maps to a category, so concentration yields
        // insufficient data while correlation still succeeds.
        let categories = CategoryMap::new();
        let knowledge = Arc::new(HistoricalKnowledgeStore::new(
            builtin_scenarios(),
            KnowledgeBackendKind::Table,
        ));
        let coordinator = Coordinator::new(
            test_config(),
            Arc::new(demo_market_data(40)),
            "ETH",
            Arc::new(categories),
            knowledge,
        )
        .unwrap();

        let request = AnalyzeRequest {
            correlation_id: "req-2".to_string(),
            snapshot: PortfolioSnapshot::new(
                "owner-1",
                vec![Holding::new("UNI", 70.0, 10.0).unwrap()],
            )
            .unwrap(),
        };

        let report = coordinator.analyze(request).await.unwrap();
        assert!(report.synthesis.is_none());
        let note = report.degraded_note.expect("degraded note");
        assert!(note.contains("ConcentrationAnalyzer"));
    }
}
