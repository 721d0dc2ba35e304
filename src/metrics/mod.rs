//! Execution ledger
//!
//! This module provides:
//! - An append-only record of task outcomes with per-worker metrics
//! - Keyword-level success/failure pattern mining
//! - Learning insights produced from those patterns
//! - System-wide aggregates and improvement suggestions

pub mod execution;
pub mod analysis;
pub mod learning;

pub use execution::{ExecutionLedger, ExecutionRecord, WorkerMetrics};
pub use analysis::{ImprovementSuggestion, SuggestionKind, SuggestionPriority, SystemPerformance};
pub use learning::{
    InsightType, LearningInsight, PatternSample, TaskPatterns, WorkerPatterns, HIGH_IMPACT_THRESHOLD,
    RECENT_INSIGHT_WINDOW,
};
