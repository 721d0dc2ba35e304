//! Learning insights and task-pattern mining
//!
//! Keyword-level success/failure patterns per worker, and the two rules that
//! turn those patterns into insights.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::execution::WorkerMetrics;

/// Success rate below which failure keywords are mined
const FAILURE_PATTERN_SUCCESS_RATE: f64 = 0.7;
/// Failures a worker needs before keywords are mined
const MIN_RECENT_FAILURES: usize = 3;
/// Failures inspected when counting keywords
const FAILURE_LOOKBACK: usize = 5;
/// A keyword must appear this often in the lookback to count
const MIN_KEYWORD_OCCURRENCES: usize = 2;
/// Seconds
const SLOW_WORKER_SECONDS: f64 = 30.0;
/// Insights at or above this impact count toward learning velocity
pub const HIGH_IMPACT_THRESHOLD: f64 = 0.7;
/// Insights considered for learning velocity / repeat detection
pub const RECENT_INSIGHT_WINDOW: usize = 20;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now", "old", "see",
    "way", "who", "did", "get", "got", "let", "put", "say", "she", "too", "use", "used", "with",
    "this", "that", "from", "they", "them", "then", "than", "there", "their", "these", "those",
    "will", "would", "should", "could", "been", "being", "were", "what", "when", "where",
    "which", "while", "into", "onto", "over", "under", "about", "after", "before", "also",
    "just", "only", "some", "such", "very", "each", "other", "more", "most", "make", "made",
    "task", "please",
];

/// Kind of insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    FailurePattern,
    PerformanceIssue,
    Adaptation,
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsightType::FailurePattern => write!(f, "failure_pattern"),
            InsightType::PerformanceIssue => write!(f, "performance_issue"),
            InsightType::Adaptation => write!(f, "adaptation"),
        }
    }
}

/// Something the ledger (or an adaptation cycle) learned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningInsight {
    pub insight_type: InsightType,
    pub description: String,
    pub source: String,
    /// 0.0-1.0
    pub impact: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub applied: bool,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl LearningInsight {
    pub fn new(insight_type: InsightType, description: &str, source: &str, impact: f64) -> Self {
        Self {
            insight_type,
            description: description.to_string(),
            source: source.to_string(),
            impact: impact.clamp(0.0, 1.0),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            applied: false,
            applied_at: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_high_impact(&self) -> bool {
        self.impact >= HIGH_IMPACT_THRESHOLD
    }
}

/// One bucketed execution inside the pattern store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSample {
    pub keywords: Vec<String>,
    pub execution_time: f64,
    pub output_length: usize,
    pub timestamp: DateTime<Utc>,
}

/// Per-worker success/failure buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerPatterns {
    #[serde(default)]
    pub successful: Vec<PatternSample>,
    #[serde(default)]
    pub failed: Vec<PatternSample>,
    /// First line of successful outputs -> count
    #[serde(default)]
    pub common_outputs: BTreeMap<String, u64>,
}

/// The whole pattern store. Grows monotonically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatterns {
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerPatterns>,
    #[serde(default)]
    pub keyword_frequency: BTreeMap<String, u64>,
}

impl TaskPatterns {
    pub(super) fn observe(&mut self, role: &str, success: bool, sample: PatternSample, output: &str) {
        for kw in &sample.keywords {
            *self.keyword_frequency.entry(kw.clone()).or_default() += 1;
        }

        let worker = self.workers.entry(role.to_string()).or_default();
        if success {
            if let Some(first) = output.lines().map(str::trim).find(|l| !l.is_empty()) {
                let key: String = first.chars().take(100).collect();
                *worker.common_outputs.entry(key).or_default() += 1;
            }
            worker.successful.push(sample);
        } else {
            worker.failed.push(sample);
        }
    }

    /// Most frequent keywords overall, highest first
    pub fn top_keywords(&self, limit: usize) -> Vec<(String, u64)> {
        let mut items: Vec<(String, u64)> = self
            .keyword_frequency
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.truncate(limit);
        items
    }
}

/// Alphabetic tokens of 3+ characters, lowercased, stop words removed.
/// Each keyword appears once, in first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Apply the failure-pattern and performance rules for one worker
pub(super) fn evaluate_pattern_rules(
    role: &str,
    metrics: &WorkerMetrics,
    patterns: &TaskPatterns,
) -> Vec<LearningInsight> {
    let mut insights = Vec::new();
    let Some(worker) = patterns.workers.get(role) else {
        return insights;
    };

    if metrics.success_rate() < FAILURE_PATTERN_SUCCESS_RATE && worker.failed.len() >= MIN_RECENT_FAILURES {
        let start = worker.failed.len().saturating_sub(FAILURE_LOOKBACK);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sample in &worker.failed[start..] {
            for kw in &sample.keywords {
                *counts.entry(kw.as_str()).or_default() += 1;
            }
        }

        let mut common: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(_, c)| *c >= MIN_KEYWORD_OCCURRENCES)
            .collect();
        common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        common.truncate(5);

        if !common.is_empty() {
            let keywords: Vec<&str> = common.iter().map(|(k, _)| *k).collect();
            insights.push(
                LearningInsight::new(
                    InsightType::FailurePattern,
                    &format!(
                        "Worker '{}' frequently fails on tasks involving: {}",
                        role,
                        keywords.join(", ")
                    ),
                    "pattern_analysis",
                    0.8,
                )
                .with_metadata("worker", serde_json::json!(role))
                .with_metadata("keywords", serde_json::json!(keywords))
                .with_metadata("success_rate", serde_json::json!(metrics.success_rate())),
            );
        }
    }

    if metrics.average_execution_time > SLOW_WORKER_SECONDS {
        insights.push(
            LearningInsight::new(
                InsightType::PerformanceIssue,
                &format!(
                    "Worker '{}' averages {:.1}s per task, above the {:.0}s threshold",
                    role, metrics.average_execution_time, SLOW_WORKER_SECONDS
                ),
                "performance_analysis",
                0.6,
            )
            .with_metadata("worker", serde_json::json!(role))
            .with_metadata(
                "average_execution_time",
                serde_json::json!(metrics.average_execution_time),
            ),
        );
    }

    insights
}

/// True if an unapplied insight with the same type and description is already
/// among the recent ones
pub(super) fn is_repeat(existing: &[LearningInsight], candidate: &LearningInsight) -> bool {
    let start = existing.len().saturating_sub(RECENT_INSIGHT_WINDOW);
    existing[start..].iter().any(|i| {
        !i.applied && i.insight_type == candidate.insight_type && i.description == candidate.description
    })
}

/// High-impact share of the last 20 insights (0.0 with no insights)
pub fn learning_velocity(insights: &[LearningInsight]) -> f64 {
    let start = insights.len().saturating_sub(RECENT_INSIGHT_WINDOW);
    let high = insights[start..].iter().filter(|i| i.is_high_impact()).count();
    high as f64 / RECENT_INSIGHT_WINDOW as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(keywords: &[&str]) -> PatternSample {
        PatternSample {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            execution_time: 1.0,
            output_length: 10,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_extract_keywords_filters() {
        let kws = extract_keywords("The request TIMEOUT hit the API; timeout again at db2!");
        assert_eq!(kws, vec!["request", "timeout", "hit", "api", "again"]);
    }

    #[test]
    fn test_failure_pattern_rule() {
        let mut patterns = TaskPatterns::default();
        for _ in 0..3 {
            patterns.observe("w", false, sample(&["timeout", "fetch"]), "");
        }
        let metrics = WorkerMetrics {
            total_tasks: 3,
            successful_tasks: 0,
            failed_tasks: 3,
            total_execution_time: 3.0,
            average_execution_time: 1.0,
        };

        let insights = evaluate_pattern_rules("w", &metrics, &patterns);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, InsightType::FailurePattern);
        assert!(insights[0].description.contains("timeout"));
        assert_eq!(insights[0].impact, 0.8);
    }

    #[test]
    fn test_no_failure_pattern_with_two_failures() {
        let mut patterns = TaskPatterns::default();
        for _ in 0..2 {
            patterns.observe("w", false, sample(&["timeout"]), "");
        }
        let metrics = WorkerMetrics {
            total_tasks: 2,
            failed_tasks: 2,
            ..Default::default()
        };
        assert!(evaluate_pattern_rules("w", &metrics, &patterns).is_empty());
    }

    #[test]
    fn test_performance_rule() {
        let mut patterns = TaskPatterns::default();
        patterns.observe("slow", true, sample(&["render"]), "done\nmore");
        let metrics = WorkerMetrics {
            total_tasks: 1,
            successful_tasks: 1,
            failed_tasks: 0,
            total_execution_time: 45.0,
            average_execution_time: 45.0,
        };
        let insights = evaluate_pattern_rules("slow", &metrics, &patterns);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, InsightType::PerformanceIssue);
        assert_eq!(patterns.workers["slow"].common_outputs["done"], 1);
    }

    #[test]
    fn test_learning_velocity() {
        assert_eq!(learning_velocity(&[]), 0.0);
        let insights: Vec<_> = (0..4)
            .map(|_| LearningInsight::new(InsightType::FailurePattern, "x", "t", 0.8))
            .chain((0..6).map(|_| LearningInsight::new(InsightType::PerformanceIssue, "y", "t", 0.6)))
            .collect();
        assert_eq!(learning_velocity(&insights), 0.2);

        let boundary = vec![LearningInsight::new(InsightType::Adaptation, "z", "t", 0.7)];
        assert!(boundary[0].is_high_impact());
        assert_eq!(learning_velocity(&boundary), 0.05);
    }

    #[test]
    fn test_repeat_detection() {
        let a = LearningInsight::new(InsightType::FailurePattern, "same", "t", 0.8);
        let mut applied = a.clone();
        applied.applied = true;
        assert!(is_repeat(&[a.clone()], &a));
        assert!(!is_repeat(&[applied], &a));
    }

    #[test]
    fn test_top_keywords() {
        let mut patterns = TaskPatterns::default();
        patterns.observe("w", true, sample(&["alpha", "beta"]), "ok");
        patterns.observe("w", false, sample(&["beta"]), "");
        assert_eq!(patterns.top_keywords(1), vec![("beta".to_string(), 2)]);
    }
}
