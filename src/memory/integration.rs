//! Projection of executions into the graphs, plus combined retrieval
//!
//! Every processed execution becomes an agent -> task -> result chain in the
//! memory graph. Successful executions with substantial output also become a
//! knowledge node linked back to the task.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::graph::{GapReport, KnowledgeGraph, KnowledgeNode, SearchHit};
use crate::config::IntegrationConfig;
use crate::metrics::{ExecutionLedger, ExecutionRecord};
use crate::types::config_stem;

/// Capitalized tokens of two or more characters
static CONCEPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9_]+\b").unwrap());

/// Related memories score this fraction of the hit that pulled them in
const RELATED_SCORE_FACTOR: f64 = 0.5;
/// Success rate under which the context carries a warning
const STRUGGLING_SUCCESS_RATE: f64 = 0.7;
const MAX_CONCEPTS: usize = 10;
/// Characters of output kept on a result node's title
const TITLE_CHARS: usize = 60;

/// Ids created for one execution
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessedTask {
    pub agent_node: String,
    pub task_node: String,
    pub result_node: String,
    pub concepts: Vec<String>,
    /// Knowledge node synthesized from a successful result
    pub knowledge_node: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Memory,
    RelatedMemory,
    Knowledge,
}

#[derive(Debug, Clone, Serialize)]
pub struct CombinedHit {
    pub source: HitSource,
    pub node: KnowledgeNode,
    pub score: f64,
}

/// What an agent should know before starting a task
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub agent: String,
    pub memories: Vec<SearchHit>,
    pub knowledge: Vec<SearchHit>,
    /// None when the agent has no recorded executions
    pub success_rate: Option<f64>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GapAnalysis {
    pub knowledge: GapReport,
    pub memory: GapReport,
}

pub struct GraphIntegration {
    ledger: Arc<ExecutionLedger>,
    knowledge: Arc<KnowledgeGraph>,
    memory: Arc<KnowledgeGraph>,
    config: IntegrationConfig,
}

fn concept_names(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    CONCEPT
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|c| seen.insert(c.to_lowercase()))
        .take(MAX_CONCEPTS)
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &text[..i]),
        None => text.to_string(),
    }
}

impl GraphIntegration {
    pub fn new(
        ledger: Arc<ExecutionLedger>,
        knowledge: Arc<KnowledgeGraph>,
        memory: Arc<KnowledgeGraph>,
        config: IntegrationConfig,
    ) -> Self {
        Self {
            ledger,
            knowledge,
            memory,
            config,
        }
    }

    pub fn knowledge_graph(&self) -> &Arc<KnowledgeGraph> {
        &self.knowledge
    }

    pub fn memory_graph(&self) -> &Arc<KnowledgeGraph> {
        &self.memory
    }

    /// Record an execution in the memory graph and, for substantial
    /// successful results, in the knowledge graph.
    pub fn process_task_result(&self, record: &ExecutionRecord) -> Result<ProcessedTask> {
        let agent_id = format!("agent:{}", config_stem(&record.worker_role));
        let task_id = format!(
            "task:{}",
            record
                .task_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
        );
        let result_id = format!("result:{}", Uuid::new_v4().simple());
        let description = record.description.as_deref().unwrap_or_default();
        let output = record.output.as_deref().unwrap_or_default();

        self.memory.ensure_node(
            KnowledgeNode::new(&agent_id, "agent", &record.worker_role).with_title(record.worker_role.clone()),
        )?;

        let mut task_meta = BTreeMap::new();
        task_meta.insert("success".to_string(), json!(record.success));
        task_meta.insert("execution_time".to_string(), json!(record.execution_time));
        task_meta.insert("timestamp".to_string(), json!(record.timestamp));
        let task_node = KnowledgeNode::new(&task_id, "task", description)
            .with_title(truncate(description, TITLE_CHARS))
            .with_metadata(task_meta);
        self.memory.insert_node(task_node.clone())?;

        let mut result_meta = BTreeMap::new();
        result_meta.insert("success".to_string(), json!(record.success));
        self.memory.insert_node(KnowledgeNode::new(&result_id, "result", output).with_metadata(result_meta))?;

        self.memory.add_relation(&agent_id, &task_id, "executed", None, 1.0)?;
        self.memory.add_relation(&task_id, &result_id, "produced", None, 1.0)?;

        let mut concepts = Vec::new();
        for name in concept_names(&format!("{}\n{}", description, output)) {
            let concept_id = format!("concept:{}", name.to_lowercase());
            self.memory.ensure_node(KnowledgeNode::new(&concept_id, "concept", &name).with_title(name.clone()))?;
            self.memory.add_relation(&task_id, &concept_id, "mentions", None, 1.0)?;
            concepts.push(concept_id);
        }

        let knowledge_node = if record.success && output.chars().count() > self.config.min_result_length {
            Some(self.learn_from(record, task_node, description, output)?)
        } else {
            None
        };

        debug!(
            "Processed {} for {}: {} concepts, knowledge {}",
            task_id,
            record.worker_role,
            concepts.len(),
            knowledge_node.as_deref().unwrap_or("none")
        );

        Ok(ProcessedTask {
            agent_node: agent_id,
            task_node: task_id,
            result_node: result_id,
            concepts,
            knowledge_node,
        })
    }

    fn learn_from(
        &self,
        record: &ExecutionRecord,
        task_node: KnowledgeNode,
        description: &str,
        output: &str,
    ) -> Result<String> {
        let id = format!("learned:{}", Uuid::new_v4().simple());
        let task_label = if description.is_empty() { "a task" } else { description };
        let content = format!(
            "When asked to handle \"{}\", {} succeeded in {:.1}s with the following approach:\n\n{}",
            task_label, record.worker_role, record.execution_time, output
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), json!(format!("Learned: {}", truncate(task_label, TITLE_CHARS))));
        metadata.insert("agent".to_string(), json!(record.worker_role));
        metadata.insert("source_task".to_string(), json!(task_node.id));
        self.knowledge.add_node(&id, "learned_solution", &content, metadata)?;

        // The task lives in the memory graph; mirror it so the edge has both ends
        let task_id = task_node.id.clone();
        self.knowledge.ensure_node(task_node)?;
        self.knowledge.add_relation(&id, &task_id, "learned_from", None, 1.0)?;

        info!("Learned knowledge {} from {}", id, task_id);
        Ok(id)
    }

    /// Search both graphs, expand the best memory hits by one hop and rerank
    pub fn enhanced_search(&self, query: &str, limit: usize) -> Vec<CombinedHit> {
        let boost = self.config.memory_score_boost;
        let memory_hits = self.memory.search(query, None, limit);
        let knowledge_hits = self.knowledge.search(query, None, limit);

        // Keyed by (is_knowledge, id); the higher score wins
        let mut merged: HashMap<(bool, String), CombinedHit> = HashMap::new();
        let mut offer = |key: (bool, String), hit: CombinedHit| {
            let keep = merged.get(&key).map_or(true, |existing| hit.score > existing.score);
            if keep {
                merged.insert(key, hit);
            }
        };

        for (rank, hit) in memory_hits.iter().enumerate() {
            if rank < self.config.expand_top_memories {
                for related in self.memory.neighbors(&hit.node.id) {
                    offer(
                        (false, related.id.clone()),
                        CombinedHit {
                            source: HitSource::RelatedMemory,
                            node: related,
                            score: hit.score * RELATED_SCORE_FACTOR * boost,
                        },
                    );
                }
            }
            offer(
                (false, hit.node.id.clone()),
                CombinedHit {
                    source: HitSource::Memory,
                    node: hit.node.clone(),
                    score: hit.score * boost,
                },
            );
        }
        for hit in knowledge_hits {
            offer(
                (true, hit.node.id.clone()),
                CombinedHit {
                    source: HitSource::Knowledge,
                    score: hit.score,
                    node: hit.node,
                },
            );
        }

        let mut hits: Vec<CombinedHit> = merged.into_values().collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.node.id.cmp(&b.node.id)));
        hits.truncate(limit);
        hits
    }

    pub fn get_context_for_agent(&self, agent: &str, task_description: &str, limit: usize) -> AgentContext {
        let memories = self.memory.search(task_description, None, limit);
        let knowledge = self.knowledge.search(task_description, None, limit);
        let success_rate = self
            .ledger
            .worker_metrics(agent)
            .filter(|m| m.total_tasks > 0)
            .map(|m| m.success_rate());

        let mut suggestions = Vec::new();
        if let Some(rate) = success_rate.filter(|r| *r < STRUGGLING_SUCCESS_RATE) {
            suggestions.push(format!(
                "Success rate is {:.0}%; review similar past failures and break the task into smaller steps.",
                rate * 100.0
            ));
        }
        let gaps = self.knowledge.gap_analysis();
        if !gaps.is_empty() {
            suggestions.push(format!(
                "Knowledge has {} isolated items and {} weakly connected clusters; link what this task teaches to existing knowledge.",
                gaps.isolated.len(),
                gaps.weak_clusters.len()
            ));
        }

        AgentContext {
            agent: agent.to_string(),
            memories,
            knowledge,
            success_rate,
            suggestions,
        }
    }

    pub fn analyze_gaps(&self) -> GapAnalysis {
        GapAnalysis {
            knowledge: self.knowledge.gap_analysis(),
            memory: self.memory.gap_analysis(),
        }
    }

    /// Relate two knowledge nodes. False if either is missing.
    pub fn link_knowledge(&self, source: &str, target: &str, relation: &str) -> Result<bool> {
        self.knowledge.add_relation(source, target, relation, None, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger: Arc<ExecutionLedger>,
        integration: GraphIntegration,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(ExecutionLedger::open(dir.path().join("ledger")).unwrap());
        let knowledge = Arc::new(KnowledgeGraph::open("knowledge", dir.path().join("kg.json")));
        let memory = Arc::new(KnowledgeGraph::open("memory", dir.path().join("mg.json")));
        let integration = GraphIntegration::new(ledger.clone(), knowledge, memory, IntegrationConfig::default());
        Fixture {
            _dir: dir,
            ledger,
            integration,
        }
    }

    #[test]
    fn test_concepts() {
        assert_eq!(
            concept_names("Fetch from Postgres via Redis, then Postgres again. I x"),
            vec!["Fetch", "Postgres", "Redis"]
        );
    }

    #[test]
    fn test_execution_chain() {
        let f = fixture();
        let record = ExecutionRecord::new("Researcher", false, 2.0)
            .with_task_id("t1")
            .with_description("Summarize Kubernetes docs")
            .with_output("timed out");
        let processed = f.integration.process_task_result(&record).unwrap();

        let memory = f.integration.memory_graph();
        assert_eq!(processed.agent_node, "agent:researcher");
        assert_eq!(processed.task_node, "task:t1");
        assert!(processed.knowledge_node.is_none());
        assert_eq!(processed.concepts, vec!["concept:summarize", "concept:kubernetes"]);

        let path = memory.shortest_path("agent:researcher", &processed.result_node).unwrap();
        assert_eq!(path, vec!["agent:researcher", "task:t1", processed.result_node.as_str()]);
        assert_eq!(memory.statistics().relation_types["mentions"], 2);
        assert_eq!(f.integration.knowledge_graph().node_count(), 0);
    }

    #[test]
    fn test_successful_result_becomes_knowledge() {
        let f = fixture();
        let output = "Split the crawl into batches of fifty pages and cache DNS lookups between batches.";
        let record = ExecutionRecord::new("crawler", true, 3.5)
            .with_task_id("t2")
            .with_description("crawl the docs site")
            .with_output(output);
        let processed = f.integration.process_task_result(&record).unwrap();

        let id = processed.knowledge_node.unwrap();
        let knowledge = f.integration.knowledge_graph();
        let node = knowledge.peek_node(&id).unwrap();
        assert_eq!(node.node_type, "learned_solution");
        assert!(node.content.contains("cache DNS lookups"));
        let rels = knowledge.relations_from(&id);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relation_type, "learned_from");
        assert_eq!(rels[0].target, "task:t2");

        // Short output does not qualify
        let short = ExecutionRecord::new("crawler", true, 1.0).with_output("ok");
        assert!(f.integration.process_task_result(&short).unwrap().knowledge_node.is_none());
    }

    #[test]
    fn test_enhanced_search_weights_memory() {
        let f = fixture();
        let knowledge = f.integration.knowledge_graph();
        let memory = f.integration.memory_graph();
        knowledge.insert_node(KnowledgeNode::new("k1", "note", "retry policy")).unwrap();
        memory.insert_node(KnowledgeNode::new("m1", "task", "retry policy")).unwrap();
        memory.insert_node(KnowledgeNode::new("m2", "result", "unrelated text")).unwrap();
        memory.add_relation("m1", "m2", "produced", None, 1.0).unwrap();

        let hits = f.integration.enhanced_search("retry", 10);
        let summary: Vec<_> = hits.iter().map(|h| (h.node.id.as_str(), h.source, h.score)).collect();
        assert_eq!(
            summary,
            vec![
                ("m1", HitSource::Memory, 1.2),
                ("k1", HitSource::Knowledge, 1.0),
                ("m2", HitSource::RelatedMemory, 0.6),
            ]
        );

        assert_eq!(f.integration.enhanced_search("retry", 1).len(), 1);
        assert!(f.integration.enhanced_search("nothing here", 5).is_empty());
    }

    #[test]
    fn test_agent_context() {
        let f = fixture();
        for i in 0..4 {
            f.ledger.record(ExecutionRecord::new("writer", i == 0, 1.0)).unwrap();
        }
        f.integration
            .knowledge_graph()
            .insert_node(KnowledgeNode::new("k1", "note", "write short paragraphs"))
            .unwrap();

        let ctx = f.integration.get_context_for_agent("writer", "paragraphs", 5);
        assert_eq!(ctx.success_rate, Some(0.25));
        assert_eq!(ctx.knowledge.len(), 1);
        // Low success rate and an isolated knowledge node
        assert_eq!(ctx.suggestions.len(), 2);

        let fresh = f.integration.get_context_for_agent("nobody", "paragraphs", 5);
        assert_eq!(fresh.success_rate, None);
        assert_eq!(fresh.suggestions.len(), 1);
    }

    #[test]
    fn test_link_knowledge_and_gaps() {
        let f = fixture();
        let knowledge = f.integration.knowledge_graph();
        knowledge.insert_node(KnowledgeNode::new("a", "note", "")).unwrap();
        knowledge.insert_node(KnowledgeNode::new("b", "note", "")).unwrap();

        assert_eq!(f.integration.analyze_gaps().knowledge.isolated.len(), 2);
        assert!(f.integration.link_knowledge("a", "b", "related").unwrap());
        assert!(!f.integration.link_knowledge("a", "zzz", "related").unwrap());

        let gaps = f.integration.analyze_gaps();
        assert!(gaps.knowledge.isolated.is_empty());
        assert_eq!(gaps.knowledge.weak_clusters.len(), 1);
        assert!(gaps.memory.is_empty());
    }
}
