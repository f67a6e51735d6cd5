//! Portfolio risk synthesis engine
//!
//! Combines two independent analytical perspectives on a holdings snapshot,
//! statistical co-movement with a reference asset and concentration within
//! named categories, and synthesizes them into a single risk judgment with
//! prioritized recommendations. The engine is read-only and stateless per
//! request; transport, conversational parsing, and data file loading live
//! in the consuming layer.

pub mod concentration;
pub mod config;
pub mod coordinator;
pub mod correlation;
pub mod knowledge;
pub mod market_data;
pub mod portfolio;
pub mod stats;
pub mod synthesis;
