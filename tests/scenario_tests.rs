use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use riskguard::concentration::{CategoryMap, DiversificationLabel};
use riskguard::config::EngineConfig;
use riskguard::coordinator::{
    AnalysisFailure, AnalyzeRequest, AnalyzerKind, CallStatus, Coordinator,
};
use riskguard::knowledge::{
    BracketScenarioContext, CategoryScenarioContext, CoMovementBracket, HistoricalKnowledgeStore,
    KnowledgeBackend, KnowledgeBackendKind, OpportunityCost, builtin_scenarios,
};
use riskguard::market_data::{MarketDataSet, PriceHistory};
use riskguard::portfolio::{Holding, PortfolioSnapshot};
use riskguard::synthesis::RiskLevel;

#[cfg(test)]
mod scenario_tests {
    use super::*;

    /// 28 trailing returns: two full cycles of a 14-day pattern. The cycle
    /// pattern is zero-mean with period 7; the alternating noise pattern is
    /// zero-mean with period 2, which makes the two exactly orthogonal over
    /// the window and keeps blended correlations predictable.
    const WINDOW_DAYS: usize = 28;

    fn cycle_closes(days: usize) -> Vec<f64> {
        let mut price = 100.0;
        let mut closes = vec![price];
        for day in 0..days {
            let r = 0.01 * ((day % 7) as f64 - 3.0) / 3.0;
            price *= 1.0 + r;
            closes.push(price);
        }
        closes
    }

    fn noise_closes(days: usize, amplitude: f64) -> Vec<f64> {
        let mut price = 100.0;
        let mut closes = vec![price];
        for day in 0..days {
            let r = if day % 2 == 0 { amplitude } else { -amplitude };
            price *= 1.0 + r;
            closes.push(price);
        }
        closes
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            window_days: WINDOW_DAYS,
            min_history_days: 14,
            per_call_timeout_ms: 2_000,
            overall_deadline_ms: 10_000,
            ..EngineConfig::default()
        }
    }

    fn categories() -> CategoryMap {
        CategoryMap::from_entries([
            ("UNI", "DeFi Governance"),
            ("AAVE", "DeFi Governance"),
            ("COMP", "DeFi Governance"),
            ("MKR", "DeFi Governance"),
            ("SNX", "DeFi Governance"),
            ("CRV", "DeFi Governance"),
            ("BAL", "DeFi Governance"),
            ("LDO", "DeFi Governance"),
            ("MATIC", "Layer-2"),
            ("OP", "Layer-2"),
            ("YFI", "Yield Protocols"),
            ("USDC", "Stablecoins"),
            ("DAI", "Stablecoins"),
        ])
    }

    fn knowledge() -> Arc<HistoricalKnowledgeStore> {
        Arc::new(HistoricalKnowledgeStore::new(
            builtin_scenarios(),
            KnowledgeBackendKind::Graph,
        ))
    }

    fn coordinator(data: MarketDataSet, config: EngineConfig) -> Coordinator {
        Coordinator::new(
            config,
            Arc::new(data),
            "ETH",
            Arc::new(categories()),
            knowledge(),
        )
        .unwrap()
    }

    fn request(snapshot: PortfolioSnapshot) -> AnalyzeRequest {
        AnalyzeRequest {
            correlation_id: "test-request".to_string(),
            snapshot,
        }
    }

    /// Scenario 1: one category at 68% share with high co-movement.
    #[tokio::test]
    async fn test_concentrated_high_correlation_portfolio() {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", cycle_closes(WINDOW_DAYS)));
        for symbol in ["UNI", "AAVE", "COMP", "MKR", "SNX", "CRV", "BAL", "LDO", "MATIC"] {
            data.insert(PriceHistory::new(symbol, cycle_closes(WINDOW_DAYS)));
        }
        data.insert(PriceHistory::new("USDC", noise_closes(WINDOW_DAYS, 0.01)));

        // Eight DeFi Governance holdings at 8.5% each (68%), one Layer-2 at
        // 12%, stable noise at 20%.
        let mut holdings = vec![];
        for symbol in ["UNI", "AAVE", "COMP", "MKR", "SNX", "CRV", "BAL", "LDO"] {
            holdings.push(Holding::new(symbol, 85.0, 1.0).unwrap());
        }
        holdings.push(Holding::new("MATIC", 120.0, 1.0).unwrap());
        holdings.push(Holding::new("USDC", 200.0, 1.0).unwrap());
        let snapshot = PortfolioSnapshot::new("owner-1", holdings).unwrap();

        let report = coordinator(data, test_config())
            .analyze(request(snapshot))
            .await
            .unwrap();

        let synthesis = report.synthesis.expect("full synthesis");
        let concentration = synthesis.concentration.clone();
        assert_eq!(
            concentration.concentrated_categories,
            vec!["DeFi Governance"]
        );
        assert!((concentration.breakdown["DeFi Governance"].percentage - 68.0).abs() < 1e-9);
        assert!(synthesis.correlation.percentage > 85);
        assert!(synthesis.compounding_detected);
        assert!(matches!(
            report.overall_risk_level,
            RiskLevel::High | RiskLevel::Critical
        ));
        // The top-ranked recommendation addresses concentration first.
        assert!(synthesis.recommendations[0].action.contains("DeFi Governance"));
    }

    /// Scenario 2: moderate co-movement, no category above 25%.
    #[tokio::test]
    async fn test_moderate_correlation_diversified_portfolio() {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("UNI", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("MATIC", cycle_closes(WINDOW_DAYS)));
        // Half-amplitude noise keeps the blend inside the moderate bracket.
        data.insert(PriceHistory::new("USDC", noise_closes(WINDOW_DAYS, 0.005)));
        data.insert(PriceHistory::new("YFI", noise_closes(WINDOW_DAYS, 0.005)));

        let snapshot = PortfolioSnapshot::new(
            "owner-1",
            vec![
                Holding::new("UNI", 25.0, 1.0).unwrap(),
                Holding::new("MATIC", 25.0, 1.0).unwrap(),
                Holding::new("USDC", 25.0, 1.0).unwrap(),
                Holding::new("YFI", 25.0, 1.0).unwrap(),
            ],
        )
        .unwrap();

        let report = coordinator(data, test_config())
            .analyze(request(snapshot))
            .await
            .unwrap();

        let synthesis = report.synthesis.expect("full synthesis");
        assert_eq!(synthesis.correlation.bracket, CoMovementBracket::Moderate);
        assert!(!synthesis.compounding_detected);
        assert_eq!(report.overall_risk_level, RiskLevel::Moderate);
    }

    /// Scenario 3: low co-movement, well-diversified, "maintain" framing.
    #[tokio::test]
    async fn test_low_correlation_diversified_portfolio() {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("UNI", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("MATIC", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("USDC", noise_closes(WINDOW_DAYS, 0.01)));
        data.insert(PriceHistory::new("YFI", noise_closes(WINDOW_DAYS, 0.01)));

        let snapshot = PortfolioSnapshot::new(
            "owner-1",
            vec![
                Holding::new("UNI", 25.0, 1.0).unwrap(),
                Holding::new("MATIC", 25.0, 1.0).unwrap(),
                Holding::new("USDC", 25.0, 1.0).unwrap(),
                Holding::new("YFI", 25.0, 1.0).unwrap(),
            ],
        )
        .unwrap();

        let report = coordinator(data, test_config())
            .analyze(request(snapshot))
            .await
            .unwrap();

        let synthesis = report.synthesis.expect("full synthesis");
        assert_eq!(synthesis.correlation.bracket, CoMovementBracket::Low);
        assert_eq!(
            synthesis.concentration.diversification_label,
            DiversificationLabel::WellDiversified
        );
        assert_eq!(report.overall_risk_level, RiskLevel::Low);
        assert_eq!(synthesis.recommendations.len(), 1);
        assert!(synthesis.recommendations[0].action.contains("Maintain"));
    }

    /// Scenario 4: a symbol absent from the category mapping.
    #[tokio::test]
    async fn test_unknown_symbol_accumulated() {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("UNI", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("MATIC", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("MYSTERY", noise_closes(WINDOW_DAYS, 0.01)));

        let snapshot = PortfolioSnapshot::new(
            "owner-1",
            vec![
                Holding::new("UNI", 40.0, 1.0).unwrap(),
                Holding::new("MATIC", 40.0, 1.0).unwrap(),
                Holding::new("MYSTERY", 20.0, 1.0).unwrap(),
            ],
        )
        .unwrap();

        let report = coordinator(data, test_config())
            .analyze(request(snapshot))
            .await
            .unwrap();

        let synthesis = report.synthesis.expect("full synthesis");
        let concentration = &synthesis.concentration;
        assert!(concentration.unknown_symbols.contains("MYSTERY"));
        let known_sum: f64 = concentration.breakdown.values().map(|c| c.percentage).sum();
        assert!((known_sum + concentration.unknown_value_pct - 100.0).abs() < 1e-9);
        assert!((concentration.breakdown["DeFi Governance"].percentage - 40.0).abs() < 1e-9);
    }

    /// Scenario 5: both analyzers unusable ends in a terminal failure with
    /// both causes populated, never an escaped panic.
    #[tokio::test]
    async fn test_both_analyzers_failing_returns_terminal_failure() {
        // No reference history fails correlation; an empty category map
        // leaves concentration with no mappable holding.
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("UNI", cycle_closes(WINDOW_DAYS)));
        let coordinator = Coordinator::new(
            test_config(),
            Arc::new(data),
            "ETH",
            Arc::new(CategoryMap::new()),
            knowledge(),
        )
        .unwrap();

        let snapshot = PortfolioSnapshot::new(
            "owner-1",
            vec![Holding::new("UNI", 10.0, 1.0).unwrap()],
        )
        .unwrap();

        let failure = coordinator
            .analyze(request(snapshot))
            .await
            .expect_err("terminal failure");
        match failure {
            AnalysisFailure::BothAnalyzersFailed {
                correlation_cause,
                concentration_cause,
                call_records,
                ..
            } => {
                assert!(!correlation_cause.is_empty());
                assert!(!concentration_cause.is_empty());
                assert_eq!(call_records.len(), 2);
            }
            other => panic!("unexpected failure variant: {other}"),
        }
    }

    /// A knowledge backend that never answers bracket lookups. Drives the
    /// correlation call into its per-call timeout without touching the
    /// concentration call.
    struct HangingBackend;

    #[async_trait]
    impl KnowledgeBackend for HangingBackend {
        async fn bracket_performance(
            &self,
            _bracket: CoMovementBracket,
        ) -> Result<Vec<BracketScenarioContext>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }

        async fn category_performance(
            &self,
            _category: &str,
        ) -> Result<Vec<CategoryScenarioContext>> {
            Ok(vec![])
        }

        async fn opportunity_cost(&self, _category: &str) -> Result<Option<OpportunityCost>> {
            Ok(None)
        }
    }

    /// Degraded-path property: one forced timeout still yields a report
    /// with an explicit note and a populated risk level.
    #[tokio::test]
    async fn test_single_timeout_degrades_without_blocking_other_call() {
        let mut data = MarketDataSet::new();
        data.insert(PriceHistory::new("ETH", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("UNI", cycle_closes(WINDOW_DAYS)));
        data.insert(PriceHistory::new("MATIC", cycle_closes(WINDOW_DAYS)));

        let hanging_store = Arc::new(HistoricalKnowledgeStore::with_backends(
            Arc::new(HangingBackend),
            Arc::new(HangingBackend),
        ));
        let config = EngineConfig {
            per_call_timeout_ms: 200,
            overall_deadline_ms: 5_000,
            ..test_config()
        };
        let coordinator = Coordinator::new(
            config,
            Arc::new(data),
            "ETH",
            Arc::new(categories()),
            hanging_store,
        )
        .unwrap();

        // No concentrated category, so the concentration analyzer never
        // queries the hanging backend.
        let snapshot = PortfolioSnapshot::new(
            "owner-1",
            vec![
                Holding::new("UNI", 50.0, 1.0).unwrap(),
                Holding::new("MATIC", 50.0, 1.0).unwrap(),
            ],
        )
        .unwrap();

        let report = coordinator.analyze(request(snapshot)).await.unwrap();

        let correlation_record = report
            .call_records
            .iter()
            .find(|r| r.analyzer == AnalyzerKind::Correlation)
            .unwrap();
        assert_eq!(correlation_record.status, CallStatus::TimedOut);

        let concentration_record = report
            .call_records
            .iter()
            .find(|r| r.analyzer == AnalyzerKind::Concentration)
            .unwrap();
        assert_eq!(concentration_record.status, CallStatus::Succeeded);

        let note = report.degraded_note.expect("degraded note");
        assert!(note.contains("CorrelationAnalyzer"));
        assert!(report.synthesis.is_none());
        // Risk level still populated from the surviving analyzer alone.
        assert_eq!(report.overall_risk_level, RiskLevel::Moderate);
    }
}
