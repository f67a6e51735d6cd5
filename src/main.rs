use anyhow::Result;
use log::info;
use std::sync::Arc;

use riskguard::concentration::CategoryMap;
use riskguard::config::EngineConfig;
use riskguard::coordinator::{AnalyzeRequest, Coordinator};
use riskguard::knowledge::{HistoricalKnowledgeStore, builtin_scenarios};
use riskguard::market_data::{MarketDataSet, PriceHistory};
use riskguard::portfolio::{Holding, PortfolioSnapshot};

/// Deterministic synthetic close series that tracks the reference cycle
/// with the given sensitivity and phase offset. Stands in for pre-loaded
/// historical prices.
fn synthetic_closes(days: usize, sensitivity: f64, phase: usize, drift: f64) -> Vec<f64> {
    let mut price = 100.0;
    let mut closes = vec![price];
    for day in 0..days {
        let cycle = (((day + phase) % 11) as f64 - 5.0) / 5.0;
        let daily_return = drift + 0.015 * cycle * sensitivity;
        price *= 1.0 + daily_return;
        closes.push(price);
    }
    closes
}

fn demo_market_data() -> MarketDataSet {
    let mut data = MarketDataSet::new();
    data.insert(PriceHistory::new("ETH", synthetic_closes(120, 1.0, 0, 0.0005)));
    data.insert(PriceHistory::new("UNI", synthetic_closes(120, 0.92, 1, 0.0002)));
    data.insert(PriceHistory::new("AAVE", synthetic_closes(120, 0.88, 0, 0.0004)));
    data.insert(PriceHistory::new("COMP", synthetic_closes(120, 0.95, 1, 0.0001)));
    data.insert(PriceHistory::new("MATIC", synthetic_closes(120, 0.60, 4, 0.0008)));
    data.insert(PriceHistory::new("USDC", synthetic_closes(120, 0.01, 6, 0.0)));
    data
}

fn demo_categories() -> CategoryMap {
    CategoryMap::from_entries([
        ("UNI", "DeFi Governance"),
        ("AAVE", "DeFi Governance"),
        ("COMP", "DeFi Governance"),
        ("MKR", "DeFi Governance"),
        ("MATIC", "Layer-2"),
        ("OP", "Layer-2"),
        ("ARB", "Layer-2"),
        ("YFI", "Yield Protocols"),
        ("CRV", "Yield Protocols"),
        ("USDC", "Stablecoins"),
        ("DAI", "Stablecoins"),
    ])
}

fn demo_snapshot() -> Result<PortfolioSnapshot> {
    PortfolioSnapshot::new(
        "demo-holder-01",
        vec![
            Holding::new("UNI", 1250.0, 6.42)?,
            Holding::new("AAVE", 85.0, 94.30)?,
            Holding::new("COMP", 120.0, 55.10)?,
            Holding::new("MATIC", 4800.0, 0.92)?,
            Holding::new("USDC", 2500.0, 1.00)?,
        ],
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();
    info!("Starting risk synthesis engine demo");

    let config = EngineConfig::default();
    let knowledge = Arc::new(HistoricalKnowledgeStore::new(
        builtin_scenarios(),
        config.knowledge_backend,
    ));
    let coordinator = Coordinator::new(
        config,
        Arc::new(demo_market_data()),
        "ETH",
        Arc::new(demo_categories()),
        knowledge,
    )?;

    let request = AnalyzeRequest {
        correlation_id: "demo-request-001".to_string(),
        snapshot: demo_snapshot()?,
    };

    match coordinator.analyze(request).await {
        Ok(report) => {
            println!("=== Analysis Report ({}) ===", report.correlation_id);
            println!("Overall risk level: {}", report.overall_risk_level.label());
            if let Some(note) = &report.degraded_note {
                println!("Degraded: {}", note);
            }
            if let Some(correlation) = report.correlation.as_ref().and_then(|o| o.as_complete()) {
                println!("\n--- Correlation ---\n{}", correlation.narrative);
            }
            if let Some(concentration) =
                report.concentration.as_ref().and_then(|o| o.as_complete())
            {
                println!("\n--- Concentration ---\n{}", concentration.narrative);
            }
            if let Some(synthesis) = &report.synthesis {
                println!("\n--- Synthesis ---\n{}", synthesis.narrative);
                println!("\nRecommendations:");
                for rec in &synthesis.recommendations {
                    println!("{}. {}", rec.rank, rec.action);
                    println!("   Why: {}", rec.rationale);
                    println!("   Expected impact: {}", rec.expected_impact);
                }
            }
            println!("\nPer-call outcomes:");
            for record in &report.call_records {
                println!(
                    "- {}: {:?} ({}ms)",
                    record.analyzer.name(),
                    record.status,
                    record.duration_ms
                );
            }
            println!("Total: {}ms", report.total_duration_ms);
        }
        Err(failure) => {
            eprintln!("Analysis failed: {}", failure);
        }
    }

    Ok(())
}
