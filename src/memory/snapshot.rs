//! Node-link JSON snapshot of a graph
//!
//! Shape: `{directed, multigraph, graph, nodes: [...], links: [...]}` where each
//! link carries its `source` and `target` ids alongside its attributes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::graph::{KnowledgeNode, KnowledgeRelation};
use crate::storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLinkSnapshot {
    #[serde(default = "default_directed")]
    pub directed: bool,
    #[serde(default)]
    pub multigraph: bool,
    /// Graph-level attributes
    #[serde(default)]
    pub graph: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub nodes: Vec<KnowledgeNode>,
    #[serde(default)]
    pub links: Vec<KnowledgeRelation>,
}

fn default_directed() -> bool {
    true
}

impl NodeLinkSnapshot {
    pub fn new(nodes: Vec<KnowledgeNode>, links: Vec<KnowledgeRelation>) -> Self {
        Self {
            directed: true,
            multigraph: false,
            graph: BTreeMap::new(),
            nodes,
            links,
        }
    }

    /// Read a snapshot; `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::write_json(path, self)
    }
}
