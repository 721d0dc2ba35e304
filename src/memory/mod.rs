//! Knowledge and memory graphs
//!
//! Provides:
//! - A labeled directed graph with traversal, search and gap detection
//! - Node-link JSON snapshots written after every structural change
//! - The integration layer that projects executions into both graphs

pub mod graph;
pub mod snapshot;
pub mod integration;

pub use graph::{
    GapReport, GraphStatistics, KnowledgeGraph, KnowledgeNode, KnowledgeRelation, SearchHit, TraversalHit,
};
pub use snapshot::NodeLinkSnapshot;
pub use integration::{AgentContext, CombinedHit, GapAnalysis, GraphIntegration, HitSource, ProcessedTask};
