//! Adaptive engine
//!
//! Detects performance trends in the execution ledger, turns them into
//! improvement areas and confidence-scored recommendations, and applies
//! the confident ones through the knowledge pipeline.

pub mod trend;
pub mod areas;
pub mod engine;

pub use trend::{
    AnalysisStatus, SystemTrend, TrendAnalysis, TrendAnalyzer, TrendDirection, TrendStats, WorkerTrend,
};
pub use areas::{generate_recommendations, identify_improvement_areas, ImprovementArea, IssueKind, Severity};
pub use engine::{
    AdaptationCounts, AdaptationEntry, AdaptationReport, AdaptationResult, AdaptiveEngine, CycleReport,
    DRY_RUN_NODE_ID,
};
