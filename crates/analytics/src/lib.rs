// In crates/analytics/src/lib.rs

pub mod engine;
pub mod types;

pub use engine::AnalyticsEngine;
pub use types::{ClosedTrade, PerformanceReport, SideSummary};
