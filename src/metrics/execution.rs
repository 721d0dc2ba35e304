//! Execution ledger
//!
//! Append-only record of task outcomes with per-worker metrics derived
//! incrementally. Every mutating call writes the full state back to disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use super::learning::{self, InsightType, LearningInsight, PatternSample, TaskPatterns};
use crate::storage::{load_json_or_default, write_json};

const HISTORY_FILE: &str = "execution_history.json";
const METRICS_FILE: &str = "agent_performance.json";
const INSIGHTS_FILE: &str = "learning_insights.json";
const PATTERNS_FILE: &str = "task_patterns.json";

/// A single task execution outcome. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub worker_role: String,
    #[serde(default)]
    pub description: Option<String>,
    pub success: bool,
    /// Seconds
    pub execution_time: f64,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExecutionRecord {
    pub fn new(worker_role: &str, success: bool, execution_time: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: None,
            worker_role: worker_role.to_string(),
            description: None,
            success,
            execution_time,
            output: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Short human label used when suggestions reference this record
    pub fn label(&self) -> String {
        match (&self.task_id, &self.description) {
            (_, Some(d)) => d.chars().take(80).collect(),
            (Some(id), None) => id.clone(),
            (None, None) => format!("{} task at {}", self.worker_role, self.timestamp.format("%Y-%m-%d %H:%M")),
        }
    }
}

/// Aggregated metrics for one worker role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    /// Seconds
    pub total_execution_time: f64,
    /// Seconds
    pub average_execution_time: f64,
}

impl WorkerMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.successful_tasks as f64 / self.total_tasks as f64
        }
    }

    fn observe(&mut self, record: &ExecutionRecord) {
        self.total_tasks += 1;
        if record.success {
            self.successful_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.total_execution_time += record.execution_time;
        self.average_execution_time = self.total_execution_time / self.total_tasks as f64;
    }
}

#[derive(Debug, Default)]
pub(super) struct LedgerState {
    pub(super) history: Vec<ExecutionRecord>,
    pub(super) metrics: BTreeMap<String, WorkerMetrics>,
    pub(super) insights: Vec<LearningInsight>,
    pub(super) patterns: TaskPatterns,
}

/// Persistent execution ledger rooted at one directory
pub struct ExecutionLedger {
    base_dir: PathBuf,
    state: RwLock<LedgerState>,
}

impl ExecutionLedger {
    /// Open (or create) a ledger under `base_dir`. Missing or corrupt files start empty.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create ledger directory {}", base_dir.display()))?;

        let state = LedgerState {
            history: load_json_or_default(&base_dir.join(HISTORY_FILE)),
            metrics: load_json_or_default(&base_dir.join(METRICS_FILE)),
            insights: load_json_or_default(&base_dir.join(INSIGHTS_FILE)),
            patterns: load_json_or_default(&base_dir.join(PATTERNS_FILE)),
        };

        info!(
            "Opened ledger at {:?}: {} executions, {} workers, {} insights",
            base_dir,
            state.history.len(),
            state.metrics.len(),
            state.insights.len()
        );

        Ok(Self {
            base_dir,
            state: RwLock::new(state),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(super) fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an execution. Returns any insights the pattern rules produced.
    pub fn record(&self, record: ExecutionRecord) -> Result<Vec<LearningInsight>> {
        let mut state = self.write();
        let role = record.worker_role.clone();

        state.metrics.entry(role.clone()).or_default().observe(&record);

        let mut new_insights = Vec::new();
        if let (Some(description), Some(output)) = (&record.description, &record.output) {
            let sample = PatternSample {
                keywords: learning::extract_keywords(description),
                execution_time: record.execution_time,
                output_length: output.chars().count(),
                timestamp: record.timestamp,
            };
            state.patterns.observe(&role, record.success, sample, output);

            let metrics = state.metrics.get(&role).cloned().unwrap_or_default();
            let candidates = learning::evaluate_pattern_rules(&role, &metrics, &state.patterns);
            for insight in candidates {
                if learning::is_repeat(&state.insights, &insight) {
                    debug!("Skipping repeated {} insight for {}", insight.insight_type, role);
                    continue;
                }
                info!("New {} insight: {}", insight.insight_type, insight.description);
                state.insights.push(insight.clone());
                new_insights.push(insight);
            }
        }

        state.history.push(record);
        debug!("Recorded execution for {}, total: {}", role, state.history.len());

        self.persist(&state)?;
        Ok(new_insights)
    }

    /// Metrics for one worker role
    pub fn worker_metrics(&self, role: &str) -> Option<WorkerMetrics> {
        self.read().metrics.get(role).cloned()
    }

    pub fn all_worker_metrics(&self) -> BTreeMap<String, WorkerMetrics> {
        self.read().metrics.clone()
    }

    pub fn total_tasks(&self) -> u64 {
        self.read().metrics.values().map(|m| m.total_tasks).sum()
    }

    /// Full execution history, oldest first
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.read().history.clone()
    }

    /// Last `limit` executions across all workers, oldest first
    pub fn recent_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let state = self.read();
        let start = state.history.len().saturating_sub(limit);
        state.history[start..].to_vec()
    }

    /// Last `limit` executions for one worker, oldest first
    pub fn worker_history(&self, role: &str, limit: usize) -> Vec<ExecutionRecord> {
        let state = self.read();
        let mut records: Vec<ExecutionRecord> = state
            .history
            .iter()
            .rev()
            .filter(|r| r.worker_role == role)
            .take(limit)
            .cloned()
            .collect();
        records.reverse();
        records
    }

    /// Most recent `limit` insights, oldest first
    pub fn recent_insights(&self, limit: usize) -> Vec<LearningInsight> {
        let state = self.read();
        let start = state.insights.len().saturating_sub(limit);
        state.insights[start..].to_vec()
    }

    pub fn all_insights(&self) -> Vec<LearningInsight> {
        self.read().insights.clone()
    }

    /// Append an externally produced insight (e.g. from an adaptation cycle)
    pub fn add_insight(&self, insight: LearningInsight) -> Result<()> {
        let mut state = self.write();
        info!("Recorded {} insight from {}", insight.insight_type, insight.source);
        state.insights.push(insight);
        self.persist(&state)
    }

    /// Flip an insight to applied. Returns false if the index is out of range
    /// or it was already applied.
    pub fn mark_insight_applied(&self, index: usize) -> Result<bool> {
        let mut state = self.write();
        let Some(insight) = state.insights.get_mut(index) else {
            return Ok(false);
        };
        if insight.applied {
            return Ok(false);
        }
        insight.applied = true;
        insight.applied_at = Some(Utc::now());
        self.persist(&state)?;
        Ok(true)
    }

    /// Fraction of the last 20 insights that are high impact
    pub fn learning_velocity(&self) -> f64 {
        let state = self.read();
        learning::learning_velocity(&state.insights)
    }

    pub fn patterns(&self) -> TaskPatterns {
        self.read().patterns.clone()
    }

    /// Count of insights of one type
    pub fn insight_count(&self, insight_type: InsightType) -> usize {
        self.read()
            .insights
            .iter()
            .filter(|i| i.insight_type == insight_type)
            .count()
    }

    /// Drop all recorded state
    pub fn reset(&self) -> Result<()> {
        let mut state = self.write();
        *state = LedgerState::default();
        info!("Reset ledger at {:?}", self.base_dir);
        self.persist(&state)
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        write_json(&self.base_dir.join(HISTORY_FILE), &state.history)?;
        write_json(&self.base_dir.join(METRICS_FILE), &state.metrics)?;
        write_json(&self.base_dir.join(INSIGHTS_FILE), &state.insights)?;
        write_json(&self.base_dir.join(PATTERNS_FILE), &state.patterns)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_execution() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ExecutionLedger::open(dir.path()).unwrap();

        ledger.record(ExecutionRecord::new("coder", true, 1.5)).unwrap();

        let metrics = ledger.worker_metrics("coder").unwrap();
        assert_eq!(metrics.total_tasks, 1);
        assert_eq!(ledger.history().len(), 1);
    }

    #[test]
    fn test_metrics_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ExecutionLedger::open(dir.path()).unwrap();

        // 3 successes and 1 failure
        for i in 0..4 {
            ledger
                .record(ExecutionRecord::new("tester", i < 3, (i + 1) as f64))
                .unwrap();
        }

        let m = ledger.worker_metrics("tester").unwrap();
        assert_eq!(m.successful_tasks + m.failed_tasks, m.total_tasks);
        assert_eq!(m.success_rate(), 0.75);
        assert_eq!(m.total_execution_time, 10.0);
        assert_eq!(m.average_execution_time, 2.5);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = ExecutionLedger::open(dir.path()).unwrap();
            ledger
                .record(
                    ExecutionRecord::new("coder", false, 2.0)
                        .with_description("parse config file")
                        .with_output("error"),
                )
                .unwrap();
        }

        let ledger = ExecutionLedger::open(dir.path()).unwrap();
        assert_eq!(ledger.total_tasks(), 1);
        assert_eq!(ledger.history()[0].description.as_deref(), Some("parse config file"));
        assert!(ledger.patterns().workers.contains_key("coder"));
        for f in [HISTORY_FILE, METRICS_FILE, INSIGHTS_FILE, PATTERNS_FILE] {
            assert!(dir.path().join(f).exists(), "{} missing", f);
        }
    }

    #[test]
    fn test_corrupt_history_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILE), "[{broken").unwrap();
        let ledger = ExecutionLedger::open(dir.path()).unwrap();
        assert!(ledger.history().is_empty());
    }

    #[test]
    fn test_worker_history_is_filtered_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ExecutionLedger::open(dir.path()).unwrap();
        for i in 0..6 {
            let role = if i % 2 == 0 { "a" } else { "b" };
            ledger
                .record(ExecutionRecord::new(role, true, 1.0).with_task_id(format!("t{}", i)))
                .unwrap();
        }

        let a = ledger.worker_history("a", 2);
        let ids: Vec<_> = a.iter().filter_map(|r| r.task_id.clone()).collect();
        assert_eq!(ids, vec!["t2", "t4"]);
    }

    #[test]
    fn test_mark_insight_applied_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ExecutionLedger::open(dir.path()).unwrap();
        ledger
            .add_insight(LearningInsight::new(InsightType::Adaptation, "applied 1 change", "test", 0.7))
            .unwrap();

        assert!(ledger.mark_insight_applied(0).unwrap());
        assert!(!ledger.mark_insight_applied(0).unwrap());
        assert!(!ledger.mark_insight_applied(5).unwrap());

        let insight = &ledger.all_insights()[0];
        assert!(insight.applied);
        assert!(insight.applied_at.is_some());
    }

    #[test]
    fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ExecutionLedger::open(dir.path()).unwrap();
        ledger.record(ExecutionRecord::new("x", true, 1.0)).unwrap();
        ledger.reset().unwrap();
        assert_eq!(ledger.total_tasks(), 0);

        let reopened = ExecutionLedger::open(dir.path()).unwrap();
        assert!(reopened.history().is_empty());
    }
}
