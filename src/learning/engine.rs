//! Adaptive engine: analysis, recommendations and gated application
//!
//! Recommendations at or above the auto-apply threshold are acted on.
//! Knowledge recommendations become knowledge-graph nodes; everything else
//! goes through the change dispatcher, which blocks non-knowledge targets.
//! Every invocation is appended to the adaptation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::areas::{generate_recommendations, identify_improvement_areas, ImprovementArea};
use super::trend::{TrendAnalysis, TrendAnalyzer};
use crate::config::{AdaptationConfig, AnalysisConfig};
use crate::knowledge::{ChangeDispatcher, ProposedChange};
use crate::memory::KnowledgeGraph;
use crate::metrics::{ExecutionLedger, InsightType, LearningInsight, RECENT_INSIGHT_WINDOW};
use crate::storage;
use crate::types::{ApplyStatus, ChangeAction, Recommendation};

/// Node id reported for knowledge recommendations under dry-run
pub const DRY_RUN_NODE_ID: &str = "dry-run";

/// Keywords summarised by a pattern analysis
const PATTERN_KEYWORDS: usize = 10;

/// What happened to one recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationEntry {
    pub recommendation: Recommendation,
    pub status: ApplyStatus,
    pub detail: String,
    /// Knowledge node created for it, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationCounts {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// Outcome of one `apply_adaptations` call; also the history record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationResult {
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
    pub counts: AdaptationCounts,
    #[serde(default)]
    pub applied: Vec<AdaptationEntry>,
    #[serde(default)]
    pub skipped: Vec<AdaptationEntry>,
    #[serde(default)]
    pub failed: Vec<AdaptationEntry>,
    #[serde(default)]
    pub blocked: Vec<AdaptationEntry>,
    /// Ids of knowledge nodes created (empty under dry-run)
    #[serde(default)]
    pub knowledge_created: Vec<String>,
    /// Config recommendations queued for manual review
    #[serde(default)]
    pub proposals: Vec<ProposedChange>,
}

impl AdaptationResult {
    fn new(dry_run: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            dry_run,
            counts: AdaptationCounts::default(),
            applied: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            knowledge_created: Vec::new(),
            proposals: Vec::new(),
        }
    }

    fn push(&mut self, entry: AdaptationEntry) {
        match entry.status {
            ApplyStatus::Applied => {
                self.counts.applied += 1;
                self.applied.push(entry);
            }
            ApplyStatus::Skipped => {
                self.counts.skipped += 1;
                self.skipped.push(entry);
            }
            ApplyStatus::Failed => {
                self.counts.failed += 1;
                self.failed.push(entry);
            }
            ApplyStatus::Blocked => {
                self.counts.blocked += 1;
                self.blocked.push(entry);
            }
        }
    }
}

/// Everything one full cycle produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub analysis: TrendAnalysis,
    pub areas: Vec<ImprovementArea>,
    pub recommendations: Vec<Recommendation>,
    pub result: AdaptationResult,
}

/// Summary of the adaptation history file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptationReport {
    pub cycles: usize,
    pub dry_runs: usize,
    pub total_applied: usize,
    pub total_skipped: usize,
    pub total_failed: usize,
    pub total_blocked: usize,
    pub knowledge_created: usize,
    pub last_cycle: Option<DateTime<Utc>>,
}

pub struct AdaptiveEngine {
    ledger: Arc<ExecutionLedger>,
    dispatcher: Arc<ChangeDispatcher>,
    knowledge_graph: Arc<KnowledgeGraph>,
    analyzer: TrendAnalyzer,
    config: AdaptationConfig,
    history_path: PathBuf,
}

impl AdaptiveEngine {
    pub fn new(
        ledger: Arc<ExecutionLedger>,
        dispatcher: Arc<ChangeDispatcher>,
        knowledge_graph: Arc<KnowledgeGraph>,
        analysis: AnalysisConfig,
        config: AdaptationConfig,
        history_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            analyzer: TrendAnalyzer::new(ledger.clone(), analysis),
            ledger,
            dispatcher,
            knowledge_graph,
            config,
            history_path: history_path.into(),
        }
    }

    pub fn config(&self) -> &AdaptationConfig {
        &self.config
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn analyze_performance_trends(&self) -> TrendAnalysis {
        self.analyzer.analyze_performance_trends()
    }

    pub fn identify_improvement_areas(&self, analysis: &TrendAnalysis) -> Vec<ImprovementArea> {
        let insights = self.ledger.recent_insights(RECENT_INSIGHT_WINDOW);
        identify_improvement_areas(analysis, &insights)
    }

    pub fn generate_recommendations(&self, areas: &[ImprovementArea]) -> Vec<Recommendation> {
        generate_recommendations(areas)
    }

    /// Apply recommendations that clear the threshold; record the rest as skipped
    pub fn apply_adaptations(&self, recommendations: &[Recommendation], dry_run: bool) -> AdaptationResult {
        let threshold = self.config.auto_apply_threshold;
        let mut result = AdaptationResult::new(dry_run);

        for rec in recommendations {
            if rec.confidence < threshold {
                debug!("Skipping {} on {} ({:.2} < {:.2})", rec.action, rec.target, rec.confidence, threshold);
                result.push(AdaptationEntry {
                    recommendation: rec.clone(),
                    status: ApplyStatus::Skipped,
                    detail: format!("confidence {} below threshold {}", rec.confidence, threshold),
                    node_id: None,
                });
                continue;
            }

            if rec.is_knowledge() {
                let entry = self.create_knowledge(rec, dry_run);
                if let (ApplyStatus::Applied, Some(id)) = (entry.status, &entry.node_id) {
                    if !dry_run {
                        result.knowledge_created.push(id.clone());
                    }
                }
                result.push(entry);
                continue;
            }

            let report = self
                .dispatcher
                .apply_changes(std::slice::from_ref(&rec.to_descriptor()), dry_run);
            result.proposals.extend(report.blocked_config_changes);
            for outcome in report
                .applied
                .into_iter()
                .chain(report.skipped)
                .chain(report.failed)
                .chain(report.blocked)
            {
                result.push(AdaptationEntry {
                    recommendation: rec.clone(),
                    status: outcome.status,
                    detail: outcome.detail,
                    node_id: None,
                });
            }
        }

        if let Err(e) = storage::append_json_array(&self.history_path, &result) {
            warn!("Failed to record adaptation history: {:#}", e);
        }

        if result.counts.applied > 0 && !dry_run {
            self.record_insight(&result);
        }

        info!(
            "Adaptations{}: {} applied, {} skipped, {} failed, {} blocked",
            if dry_run { " (dry run)" } else { "" },
            result.counts.applied,
            result.counts.skipped,
            result.counts.failed,
            result.counts.blocked
        );
        result
    }

    /// analyze -> areas -> recommendations -> apply
    pub fn run_cycle(&self, dry_run: bool) -> CycleReport {
        let analysis = self.analyze_performance_trends();
        let areas = self.identify_improvement_areas(&analysis);
        let recommendations = self.generate_recommendations(&areas);
        let result = self.apply_adaptations(&recommendations, dry_run);
        CycleReport {
            analysis,
            areas,
            recommendations,
            result,
        }
    }

    /// Every recorded invocation, oldest first
    pub fn history(&self) -> Vec<AdaptationResult> {
        storage::load_json_or_default(&self.history_path)
    }

    pub fn adaptation_report(&self) -> AdaptationReport {
        let history = self.history();
        let mut report = AdaptationReport {
            cycles: history.len(),
            last_cycle: history.last().map(|r| r.timestamp),
            ..Default::default()
        };
        for cycle in &history {
            if cycle.dry_run {
                report.dry_runs += 1;
            }
            report.total_applied += cycle.counts.applied;
            report.total_skipped += cycle.counts.skipped;
            report.total_failed += cycle.counts.failed;
            report.total_blocked += cycle.counts.blocked;
            report.knowledge_created += cycle.knowledge_created.len();
        }
        report
    }

    fn create_knowledge(&self, rec: &Recommendation, dry_run: bool) -> AdaptationEntry {
        let entry = |status, detail: String, node_id| AdaptationEntry {
            recommendation: rec.clone(),
            status,
            detail,
            node_id,
        };

        let (node_type, content) = match rec.action {
            ChangeAction::AnalyzePatterns => ("pattern_analysis", self.pattern_summary()),
            _ => match rec.payload.content.as_deref() {
                Some(content) => ("learned_guideline", content.to_string()),
                None => return entry(ApplyStatus::Failed, "knowledge recommendation without content".to_string(), None),
            },
        };

        if dry_run {
            return entry(
                ApplyStatus::Applied,
                format!("dry run: would create {} node", node_type),
                Some(DRY_RUN_NODE_ID.to_string()),
            );
        }

        let id = format!("adaptation_{}", Uuid::new_v4().simple());
        let mut metadata = BTreeMap::new();
        metadata.insert("issue".to_string(), json!(rec.issue));
        metadata.insert("confidence".to_string(), json!(rec.confidence));
        if let Some(worker) = &rec.worker {
            metadata.insert("worker".to_string(), json!(worker));
        }
        if let Some(category) = &rec.payload.category {
            metadata.insert("category".to_string(), json!(category));
        }
        if !rec.payload.tags.is_empty() {
            metadata.insert("tags".to_string(), json!(rec.payload.tags));
        }
        if let Some(reason) = &rec.payload.reason {
            metadata.insert("reason".to_string(), json!(reason));
        }
        let title = rec
            .payload
            .title
            .clone()
            .unwrap_or_else(|| format!("Adaptation for {}", rec.issue));
        metadata.insert("title".to_string(), json!(title));

        match self.knowledge_graph.add_node(&id, node_type, &content, metadata) {
            Ok(()) => {
                info!("Created knowledge node {} for {}", id, rec.issue);
                entry(ApplyStatus::Applied, format!("created {} node", node_type), Some(id))
            }
            Err(e) => {
                warn!("Failed to create knowledge node for {}: {:#}", rec.issue, e);
                entry(ApplyStatus::Failed, format!("{:#}", e), None)
            }
        }
    }

    fn pattern_summary(&self) -> String {
        let patterns = self.ledger.patterns();
        let keywords = patterns.top_keywords(PATTERN_KEYWORDS);
        if keywords.is_empty() {
            return "No task keywords recorded yet.".to_string();
        }
        let listed: Vec<String> = keywords.iter().map(|(k, n)| format!("{} ({})", k, n)).collect();
        format!(
            "Most frequent task keywords across {} workers: {}",
            patterns.workers.len(),
            listed.join(", ")
        )
    }

    fn record_insight(&self, result: &AdaptationResult) {
        let applied = &result.applied;
        let impact = applied.iter().map(|e| e.recommendation.confidence).sum::<f64>() / applied.len() as f64;
        let issues: Vec<&str> = applied.iter().map(|e| e.recommendation.issue.as_str()).collect();
        let insight = LearningInsight::new(
            InsightType::Adaptation,
            &format!("Applied {} adaptations ({})", applied.len(), issues.join(", ")),
            "adaptive_engine",
            impact,
        )
        .with_metadata("knowledge_created", json!(result.knowledge_created));

        if let Err(e) = self.ledger.add_insight(insight) {
            warn!("Failed to record adaptation insight: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeApplier;
    use crate::types::ChangePayload;

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger: Arc<ExecutionLedger>,
        graph: Arc<KnowledgeGraph>,
        engine: AdaptiveEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let ledger = Arc::new(ExecutionLedger::open(root.join("ledger")).unwrap());
        let applier = KnowledgeApplier::new(root, "knowledge", &root.join("backups")).unwrap();
        let dispatcher = Arc::new(ChangeDispatcher::new(Arc::new(applier), root.join("proposals.json")));
        let graph = Arc::new(KnowledgeGraph::open("knowledge", root.join("kg.json")));
        let engine = AdaptiveEngine::new(
            ledger.clone(),
            dispatcher,
            graph.clone(),
            AnalysisConfig::default(),
            AdaptationConfig::default(),
            root.join("history.json"),
        );
        Fixture {
            _dir: dir,
            ledger,
            graph,
            engine,
        }
    }

    fn knowledge_rec(confidence: f64) -> Recommendation {
        Recommendation {
            target: crate::types::KNOWLEDGE_TARGET.to_string(),
            action: ChangeAction::Add,
            payload: ChangePayload::content("Check inputs before starting"),
            confidence,
            issue: "performance_decline".to_string(),
            worker: Some("coder".to_string()),
        }
    }

    #[test]
    fn test_threshold_gate() {
        let f = fixture();
        let result = f.engine.apply_adaptations(&[knowledge_rec(0.9), knowledge_rec(0.5)], false);

        assert_eq!(result.counts.applied, 1);
        assert_eq!(result.counts.skipped, 1);
        assert_eq!(result.knowledge_created.len(), 1);
        assert!(result.skipped[0].detail.contains("0.5"));
        assert!(f.graph.contains(&result.knowledge_created[0]));
        assert_eq!(f.ledger.insight_count(InsightType::Adaptation), 1);
        assert_eq!(f.engine.history().len(), 1);
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        let f = fixture();
        let result = f.engine.apply_adaptations(&[knowledge_rec(0.9)], true);

        assert_eq!(result.applied[0].node_id.as_deref(), Some(DRY_RUN_NODE_ID));
        assert!(result.knowledge_created.is_empty());
        assert_eq!(f.graph.node_count(), 0);
        assert_eq!(f.ledger.insight_count(InsightType::Adaptation), 0);
        // Still recorded
        assert_eq!(f.engine.adaptation_report().dry_runs, 1);
    }

    #[test]
    fn test_config_recommendation_is_blocked() {
        let f = fixture();
        let rec = Recommendation {
            target: "config/agents/coder.yaml".to_string(),
            action: ChangeAction::UpdateField,
            payload: ChangePayload::field("reasoning", json!(true)),
            confidence: 0.8,
            issue: "low_success_rate".to_string(),
            worker: Some("coder".to_string()),
        };
        let result = f.engine.apply_adaptations(&[rec], false);

        assert_eq!(result.counts.blocked, 1);
        assert_eq!(result.counts.applied, 0);
        assert_eq!(result.proposals.len(), 1);
        assert_eq!(f.ledger.insight_count(InsightType::Adaptation), 0);
    }

    #[test]
    fn test_pattern_analysis_node() {
        let f = fixture();
        for _ in 0..3 {
            f.ledger
                .record(
                    crate::metrics::ExecutionRecord::new("coder", false, 1.0)
                        .with_description("parse timeout in crawler")
                        .with_output("timeout"),
                )
                .unwrap();
        }
        let rec = Recommendation {
            target: crate::types::KNOWLEDGE_TARGET.to_string(),
            action: ChangeAction::AnalyzePatterns,
            payload: ChangePayload::default(),
            confidence: 0.8,
            issue: "low_learning_rate".to_string(),
            worker: None,
        };
        let result = f.engine.apply_adaptations(&[rec], false);
        let node = f.graph.peek_node(&result.knowledge_created[0]).unwrap();
        assert_eq!(node.node_type, "pattern_analysis");
        assert!(node.content.contains("timeout"));
    }

    #[test]
    fn test_report_accumulates() {
        let f = fixture();
        f.engine.apply_adaptations(&[knowledge_rec(0.9)], false);
        f.engine.apply_adaptations(&[knowledge_rec(0.1)], false);

        let report = f.engine.adaptation_report();
        assert_eq!(report.cycles, 2);
        assert_eq!(report.total_applied, 1);
        assert_eq!(report.total_skipped, 1);
        assert_eq!(report.knowledge_created, 1);
        assert!(report.last_cycle.is_some());
    }

    #[test]
    fn test_cycle_with_little_data() {
        let f = fixture();
        let cycle = f.engine.run_cycle(false);
        assert!(!cycle.analysis.is_sufficient());
        assert!(cycle.areas.is_empty());
        assert!(cycle.recommendations.is_empty());
        assert_eq!(f.engine.adaptation_report().cycles, 1);
    }
}
