//! Change extraction from unstructured model output
//!
//! Two strategies run over the same text and their results are merged:
//! - Regex/structural extraction of narrative instructions
//! - Balanced-bracket recovery of embedded JSON change objects

pub mod changes;
pub mod json_scan;
pub mod patterns;

pub use changes::{
    extract_actionable_changes, ChangeBuckets, ExtractError, ExtractedChange, FieldScope,
    FieldUpdate, KnowledgeItem, Removal, CREW_CONFIG_FILE, DEFAULT_KNOWLEDGE_FILE,
};

use tracing::{debug, info};

use crate::types::ChangeDescriptor;

/// Stateless extractor; all patterns are compiled once per process
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeExtractor;

impl ChangeExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Recover every change the text describes. Malformed fragments are skipped.
    pub fn extract(&self, text: &str) -> ChangeBuckets {
        let mut buckets = patterns::regex_changes(text);
        buckets.merge(patterns::structural_changes(text));

        let scan = json_scan::scan(text);
        for obj in &scan.objects {
            match ExtractedChange::from_json(obj) {
                Ok(change) => {
                    buckets.push(change);
                }
                Err(e) => debug!("Skipping JSON change object: {}", e),
            }
        }

        info!(
            "Extracted {} changes ({} knowledge, {} agent, {} task, {} config; {} unparseable fragments)",
            buckets.len(),
            buckets.knowledge.len(),
            buckets.agents.len(),
            buckets.tasks.len(),
            buckets.config.len(),
            scan.dropped
        );
        buckets
    }

    /// `extract` followed by `extract_actionable_changes`
    pub fn extract_changes(&self, text: &str) -> Vec<ChangeDescriptor> {
        extract_actionable_changes(&self.extract(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeAction;

    #[test]
    fn test_json_object_in_prose() {
        let text = r#"Here is the plan: {"type":"add_knowledge","file":"knowledge/x.md","content":"hello","reason":"r"} done."#;
        let changes = ChangeExtractor::new().extract_changes(text);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].target, "knowledge/x.md");
        assert_eq!(changes[0].action, ChangeAction::Add);
        assert_eq!(changes[0].payload.content.as_deref(), Some("hello"));
        assert_eq!(changes[0].payload.reason.as_deref(), Some("r"));
    }

    #[test]
    fn test_mixed_sources_merge() {
        let text = r#"
## Knowledge
- Retry idempotent requests

Also enable memory.

"changes": [
  {"type": "update_agent_parameter", "agent": "writer", "parameter": "max_iter", "value": 20},
  {"type": "update_config", "parameter": "memory", "value": true},
  {"type": "bogus"}
]
"#;
        let buckets = ChangeExtractor::new().extract(text);
        assert_eq!(buckets.knowledge.len(), 1);
        assert_eq!(buckets.agents.len(), 1);
        // regex and JSON both describe memory=true; kept once
        assert_eq!(buckets.config.len(), 1);

        let targets: Vec<_> = extract_actionable_changes(&buckets).into_iter().map(|d| d.target).collect();
        assert_eq!(
            targets,
            vec![DEFAULT_KNOWLEDGE_FILE, "config/agents/writer.yaml", CREW_CONFIG_FILE]
        );
    }

    #[test]
    fn test_nothing_to_extract() {
        assert!(ChangeExtractor::new().extract("All good, nothing to change.").is_empty());
    }
}
