//! Typed changes recovered from model output
//!
//! Each JSON `type` discriminator has its own parser. Buckets group changes
//! by what they touch, and `extract_actionable_changes` flattens them into
//! descriptors with deterministic targets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

use crate::types::{
    agent_config_target, task_config_target, ChangeAction, ChangeDescriptor, ChangePayload,
    SectionOperation, KNOWLEDGE_PREFIX,
};

/// Untargeted knowledge lands here
pub const DEFAULT_KNOWLEDGE_FILE: &str = "knowledge/general.md";
/// Crew-wide toggles (memory, cache, planning, process)
pub const CREW_CONFIG_FILE: &str = "config/crews/main_crew.yaml";

#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("unknown change type '{0}'")]
    UnknownType(String),
    #[error("change object has no 'type'")]
    MissingType,
    #[error("{kind} change is missing '{field}'")]
    MissingField { kind: &'static str, field: &'static str },
}

/// Knowledge content to add or merge into a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<SectionOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Which configuration file a field update belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "name", rename_all = "snake_case")]
pub enum FieldScope {
    Agent(String),
    Task(String),
    Crew,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub scope: FieldScope,
    pub field: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Regex removed from the file
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractedChange {
    AddKnowledge(KnowledgeItem),
    UpdateKnowledge(KnowledgeItem),
    UpdateField(FieldUpdate),
    Remove(Removal),
}

/// First non-empty string among `keys`
fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
}

fn required(
    obj: &Map<String, Value>,
    keys: &[&str],
    kind: &'static str,
    field: &'static str,
) -> Result<String, ExtractError> {
    string_field(obj, keys).ok_or(ExtractError::MissingField { kind, field })
}

/// Tags as an array or a comma-separated string
fn tags_field(obj: &Map<String, Value>) -> Vec<String> {
    match obj.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn value_field(
    obj: &Map<String, Value>,
    kind: &'static str,
) -> Result<Value, ExtractError> {
    ["value", "new_value"]
        .iter()
        .find_map(|k| obj.get(*k))
        .cloned()
        .ok_or(ExtractError::MissingField { kind, field: "value" })
}

const FILE_KEYS: &[&str] = &["file", "target", "path", "file_path"];
const FIELD_KEYS: &[&str] = &["parameter", "field", "setting", "key"];

impl ExtractedChange {
    /// Parse one JSON change object by its `type` discriminator
    pub fn from_json(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ExtractError::MissingType)?;

        match kind.trim().to_lowercase().as_str() {
            "add_knowledge" => Self::parse_add_knowledge(obj),
            "update_knowledge" => Self::parse_update_knowledge(obj),
            "remove_knowledge" => Self::parse_remove_knowledge(obj),
            "update_agent_parameter" => Self::parse_agent_parameter(obj),
            "update_task_parameter" => Self::parse_task_parameter(obj),
            "update_config" => Self::parse_config(obj),
            other => Err(ExtractError::UnknownType(other.to_string())),
        }
    }

    fn parse_add_knowledge(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        Ok(ExtractedChange::AddKnowledge(KnowledgeItem {
            file: string_field(obj, FILE_KEYS),
            title: string_field(obj, &["title", "name"]),
            content: required(obj, &["content", "text"], "add_knowledge", "content")?,
            category: string_field(obj, &["category"]),
            tags: tags_field(obj),
            reason: string_field(obj, &["reason", "rationale"]),
            ..Default::default()
        }))
    }

    fn parse_update_knowledge(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        Ok(ExtractedChange::UpdateKnowledge(KnowledgeItem {
            file: string_field(obj, FILE_KEYS),
            content: required(obj, &["content", "text"], "update_knowledge", "content")?,
            section: string_field(obj, &["section", "heading"]),
            operation: string_field(obj, &["operation", "mode"])
                .and_then(|op| SectionOperation::parse(&op)),
            tags: tags_field(obj),
            reason: string_field(obj, &["reason", "rationale"]),
            ..Default::default()
        }))
    }

    fn parse_remove_knowledge(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        // A literal `content` is accepted in place of a pattern
        let pattern = string_field(obj, &["pattern", "regex"])
            .or_else(|| string_field(obj, &["content", "text"]).map(|c| regex::escape(&c)))
            .ok_or(ExtractError::MissingField {
                kind: "remove_knowledge",
                field: "pattern",
            })?;

        Ok(ExtractedChange::Remove(Removal {
            file: string_field(obj, FILE_KEYS),
            pattern,
            reason: string_field(obj, &["reason", "rationale"]),
        }))
    }

    fn parse_agent_parameter(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        const KIND: &str = "update_agent_parameter";
        Ok(ExtractedChange::UpdateField(FieldUpdate {
            scope: FieldScope::Agent(required(obj, &["agent", "agent_name", "role"], KIND, "agent")?),
            field: required(obj, FIELD_KEYS, KIND, "parameter")?,
            value: value_field(obj, KIND)?,
            reason: string_field(obj, &["reason", "rationale"]),
        }))
    }

    fn parse_task_parameter(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        const KIND: &str = "update_task_parameter";
        Ok(ExtractedChange::UpdateField(FieldUpdate {
            scope: FieldScope::Task(required(obj, &["task", "task_name"], KIND, "task")?),
            field: required(obj, FIELD_KEYS, KIND, "parameter")?,
            value: value_field(obj, KIND)?,
            reason: string_field(obj, &["reason", "rationale"]),
        }))
    }

    fn parse_config(obj: &Map<String, Value>) -> Result<Self, ExtractError> {
        const KIND: &str = "update_config";
        Ok(ExtractedChange::UpdateField(FieldUpdate {
            scope: FieldScope::Crew,
            field: required(obj, FIELD_KEYS, KIND, "parameter")?,
            value: value_field(obj, KIND)?,
            reason: string_field(obj, &["reason", "rationale"]),
        }))
    }

    /// Flatten into the applier's vocabulary
    pub fn to_descriptor(&self) -> ChangeDescriptor {
        match self {
            ExtractedChange::AddKnowledge(item) => ChangeDescriptor::new(
                knowledge_target(item.file.as_deref()),
                ChangeAction::Add,
                ChangePayload {
                    title: item.title.clone(),
                    content: Some(item.content.clone()),
                    reason: item.reason.clone(),
                    category: item.category.clone(),
                    tags: item.tags.clone(),
                    ..Default::default()
                },
            ),
            ExtractedChange::UpdateKnowledge(item) => ChangeDescriptor::new(
                knowledge_target(item.file.as_deref()),
                ChangeAction::Update,
                ChangePayload {
                    content: Some(item.content.clone()),
                    reason: item.reason.clone(),
                    section: item.section.clone(),
                    operation: item.operation,
                    tags: item.tags.clone(),
                    ..Default::default()
                },
            ),
            ExtractedChange::Remove(removal) => ChangeDescriptor::new(
                knowledge_target(removal.file.as_deref()),
                ChangeAction::Remove,
                ChangePayload {
                    pattern: Some(removal.pattern.clone()),
                    reason: removal.reason.clone(),
                    ..Default::default()
                },
            ),
            ExtractedChange::UpdateField(update) => {
                let mut payload = ChangePayload::field(update.field.clone(), update.value.clone());
                payload.reason = update.reason.clone();
                ChangeDescriptor::new(update.scope.target(), ChangeAction::UpdateField, payload)
            }
        }
    }
}

impl FieldScope {
    pub fn target(&self) -> String {
        match self {
            FieldScope::Agent(name) => agent_config_target(name),
            FieldScope::Task(name) => task_config_target(name),
            FieldScope::Crew => CREW_CONFIG_FILE.to_string(),
        }
    }
}

/// Bare file names belong to the knowledge tree; anything else keeps its path
fn knowledge_target(file: Option<&str>) -> String {
    match file.map(str::trim).filter(|f| !f.is_empty()) {
        None => DEFAULT_KNOWLEDGE_FILE.to_string(),
        Some(f) if !f.contains('/') && !f.contains('\\') => format!("{}{}", KNOWLEDGE_PREFIX, f),
        Some(f) => f.to_string(),
    }
}

/// Extracted changes grouped by what they touch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBuckets {
    pub knowledge: Vec<ExtractedChange>,
    pub agents: Vec<ExtractedChange>,
    pub tasks: Vec<ExtractedChange>,
    pub config: Vec<ExtractedChange>,
}

impl ChangeBuckets {
    /// Route a change to its bucket, dropping exact duplicates
    pub fn push(&mut self, change: ExtractedChange) -> bool {
        let bucket = match &change {
            ExtractedChange::AddKnowledge(_)
            | ExtractedChange::UpdateKnowledge(_)
            | ExtractedChange::Remove(_) => &mut self.knowledge,
            ExtractedChange::UpdateField(update) => match update.scope {
                FieldScope::Agent(_) => &mut self.agents,
                FieldScope::Task(_) => &mut self.tasks,
                FieldScope::Crew => &mut self.config,
            },
        };
        if bucket.contains(&change) {
            return false;
        }
        bucket.push(change);
        true
    }

    pub fn merge(&mut self, other: ChangeBuckets) {
        for change in other.into_changes() {
            self.push(change);
        }
    }

    pub fn len(&self) -> usize {
        self.knowledge.len() + self.agents.len() + self.tasks.len() + self.config.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractedChange> {
        self.knowledge
            .iter()
            .chain(&self.agents)
            .chain(&self.tasks)
            .chain(&self.config)
    }

    pub fn into_changes(self) -> impl Iterator<Item = ExtractedChange> {
        self.knowledge
            .into_iter()
            .chain(self.agents)
            .chain(self.tasks)
            .chain(self.config)
    }
}

/// Flatten buckets into descriptors, dropping any whose serialized form repeats
pub fn extract_actionable_changes(buckets: &ChangeBuckets) -> Vec<ChangeDescriptor> {
    let mut seen = HashSet::new();
    buckets
        .iter()
        .map(ExtractedChange::to_descriptor)
        .filter(|d| seen.insert(serde_json::to_string(d).unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_each_discriminator() {
        let add = ExtractedChange::from_json(&obj(json!({
            "type": "add_knowledge", "file": "knowledge/x.md", "content": "hello", "tags": "a, b"
        })))
        .unwrap();
        let ExtractedChange::AddKnowledge(item) = &add else { panic!("{:?}", add) };
        assert_eq!(item.tags, vec!["a", "b"]);

        let agent = ExtractedChange::from_json(&obj(json!({
            "type": "update_agent_parameter", "agent": "Senior Researcher", "parameter": "max_iter", "value": 30
        })))
        .unwrap();
        assert_eq!(agent.to_descriptor().target, "config/agents/senior_researcher.yaml");

        let task = ExtractedChange::from_json(&obj(json!({
            "type": "update_task_parameter", "task": "research", "field": "expected_output", "value": "a list"
        })))
        .unwrap();
        assert_eq!(task.to_descriptor().target, "config/tasks/research.yaml");

        let config = ExtractedChange::from_json(&obj(json!({
            "type": "update_config", "setting": "memory", "value": true
        })))
        .unwrap();
        assert_eq!(config.to_descriptor().target, CREW_CONFIG_FILE);

        let remove = ExtractedChange::from_json(&obj(json!({
            "type": "remove_knowledge", "content": "old (tip)"
        })))
        .unwrap();
        let d = remove.to_descriptor();
        assert_eq!(d.target, DEFAULT_KNOWLEDGE_FILE);
        assert_eq!(d.payload.pattern.as_deref(), Some(r"old \(tip\)"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ExtractedChange::from_json(&obj(json!({"content": "x"}))),
            Err(ExtractError::MissingType)
        );
        assert_eq!(
            ExtractedChange::from_json(&obj(json!({"type": "launch_rockets"}))),
            Err(ExtractError::UnknownType("launch_rockets".into()))
        );
        assert_eq!(
            ExtractedChange::from_json(&obj(json!({"type": "add_knowledge", "content": "  "}))),
            Err(ExtractError::MissingField { kind: "add_knowledge", field: "content" })
        );
        assert!(ExtractedChange::from_json(&obj(json!({
            "type": "update_agent_parameter", "agent": "a", "parameter": "p"
        })))
        .is_err());
    }

    #[test]
    fn test_knowledge_targets() {
        assert_eq!(knowledge_target(None), DEFAULT_KNOWLEDGE_FILE);
        assert_eq!(knowledge_target(Some("tips.md")), "knowledge/tips.md");
        assert_eq!(knowledge_target(Some("knowledge/a/b.md")), "knowledge/a/b.md");
        assert_eq!(knowledge_target(Some("config/agents/x.yaml")), "config/agents/x.yaml");
    }

    #[test]
    fn test_buckets_dedupe_and_flatten() {
        let item = ExtractedChange::AddKnowledge(KnowledgeItem {
            content: "same".into(),
            ..Default::default()
        });
        let mut buckets = ChangeBuckets::default();
        assert!(buckets.push(item.clone()));
        assert!(!buckets.push(item));
        buckets.push(ExtractedChange::UpdateField(FieldUpdate {
            scope: FieldScope::Crew,
            field: "planning".into(),
            value: json!(true),
            reason: None,
        }));

        assert_eq!(buckets.knowledge.len(), 1);
        assert_eq!(buckets.config.len(), 1);
        let descriptors = extract_actionable_changes(&buckets);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].action, ChangeAction::Add);
        assert_eq!(descriptors[1].action, ChangeAction::UpdateField);
    }
}
