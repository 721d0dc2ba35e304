//! Composition root
//!
//! Builds every component from a `Config` and hands each one its
//! dependencies. Nothing in the crate reaches for a global instance.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::extraction::ChangeExtractor;
use crate::knowledge::{ChangeDispatcher, DispatchReport, KnowledgeApplier};
use crate::learning::AdaptiveEngine;
use crate::memory::{GraphIntegration, KnowledgeGraph, ProcessedTask};
use crate::metrics::{ExecutionLedger, ExecutionRecord, LearningInsight};
use crate::types::ChangeDescriptor;

/// What recording one execution produced
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub insights: Vec<LearningInsight>,
    /// None if the graphs could not be updated
    pub graph: Option<ProcessedTask>,
}

/// Extraction followed by dispatch
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub changes: Vec<ChangeDescriptor>,
    pub report: DispatchReport,
}

pub struct SelfImprovementSystem {
    config: Config,
    ledger: Arc<ExecutionLedger>,
    dispatcher: Arc<ChangeDispatcher>,
    knowledge_graph: Arc<KnowledgeGraph>,
    memory_graph: Arc<KnowledgeGraph>,
    engine: AdaptiveEngine,
    integration: GraphIntegration,
    extractor: ChangeExtractor,
}

impl SelfImprovementSystem {
    pub fn open(config: Config) -> Result<Self> {
        let storage = &config.storage;
        let ledger = Arc::new(ExecutionLedger::open(storage.ledger_dir())?);
        let applier = Arc::new(KnowledgeApplier::from_config(storage)?);
        let dispatcher = Arc::new(ChangeDispatcher::new(applier, storage.proposals_path()));
        let knowledge_graph = Arc::new(KnowledgeGraph::open("knowledge", storage.knowledge_graph_path()));
        let memory_graph = Arc::new(KnowledgeGraph::open("memory", storage.memory_graph_path()));

        let engine = AdaptiveEngine::new(
            ledger.clone(),
            dispatcher.clone(),
            knowledge_graph.clone(),
            config.analysis.clone(),
            config.adaptation.clone(),
            storage.adaptation_history_path(),
        );
        let integration = GraphIntegration::new(
            ledger.clone(),
            knowledge_graph.clone(),
            memory_graph.clone(),
            config.integration.clone(),
        );

        info!("Self-improvement state at {}", storage.state_dir.display());
        Ok(Self {
            config,
            ledger,
            dispatcher,
            knowledge_graph,
            memory_graph,
            engine,
            integration,
            extractor: ChangeExtractor::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Arc<ChangeDispatcher> {
        &self.dispatcher
    }

    pub fn knowledge_graph(&self) -> &Arc<KnowledgeGraph> {
        &self.knowledge_graph
    }

    pub fn memory_graph(&self) -> &Arc<KnowledgeGraph> {
        &self.memory_graph
    }

    pub fn engine(&self) -> &AdaptiveEngine {
        &self.engine
    }

    pub fn integration(&self) -> &GraphIntegration {
        &self.integration
    }

    pub fn extractor(&self) -> &ChangeExtractor {
        &self.extractor
    }

    /// Append to the ledger, then project into the graphs.
    ///
    /// Ledger failures are errors; graph failures only lose the projection.
    pub fn record_execution(&self, record: ExecutionRecord) -> Result<RecordOutcome> {
        let insights = self.ledger.record(record.clone())?;
        let graph = match self.integration.process_task_result(&record) {
            Ok(processed) => Some(processed),
            Err(e) => {
                warn!("Failed to record {} in the graphs: {:#}", record.label(), e);
                None
            }
        };
        Ok(RecordOutcome { insights, graph })
    }

    /// Extract changes from model output and dispatch them
    pub fn apply_text(&self, text: &str, dry_run: bool) -> PipelineOutcome {
        let changes = self.extractor.extract_changes(text);
        let report = self.dispatcher.apply_changes(&changes, dry_run);
        PipelineOutcome { changes, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn system() -> (tempfile::TempDir, SelfImprovementSystem) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: StorageConfig::rooted_at(dir.path()),
            ..Config::default()
        };
        let system = SelfImprovementSystem::open(config).unwrap();
        (dir, system)
    }

    #[test]
    fn test_record_reaches_ledger_and_graphs() {
        let (_dir, system) = system();
        let outcome = system
            .record_execution(ExecutionRecord::new("writer", true, 1.0).with_description("Draft the README"))
            .unwrap();

        assert!(outcome.graph.is_some());
        assert_eq!(system.ledger().total_tasks(), 1);
        assert!(system.memory_graph().contains("agent:writer"));
    }

    #[test]
    fn test_apply_text_partitions() {
        let (dir, system) = system();
        let text = r#"
{"type": "add_knowledge", "file": "knowledge/tips/retries.md", "content": "Retry 503s with backoff"}
{"type": "update_agent_parameter", "agent": "writer", "parameter": "max_iter", "value": 20}
"#;
        let outcome = system.apply_text(text, false);

        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(outcome.report.applied.len(), 1);
        assert_eq!(outcome.report.blocked.len(), 1);
        assert!(dir.path().join("knowledge/tips/retries.md").exists());
        assert_eq!(system.dispatcher().pending_proposals().len(), 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: StorageConfig::rooted_at(dir.path()),
            ..Config::default()
        };
        {
            let system = SelfImprovementSystem::open(config.clone()).unwrap();
            system
                .record_execution(ExecutionRecord::new("writer", false, 1.0).with_task_id("t1"))
                .unwrap();
        }
        let system = SelfImprovementSystem::open(config).unwrap();
        assert_eq!(system.ledger().total_tasks(), 1);
        assert!(system.memory_graph().contains("task:t1"));
    }
}
