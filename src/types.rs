//! Shared types used across modules
//!
//! The change vocabulary lives here because both the adaptive engine and the
//! change extractor produce it, and the knowledge applier consumes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Target sentinel for recommendations that create knowledge rather than edit a file
pub const KNOWLEDGE_TARGET: &str = "knowledge";

/// Path prefix for everything the applier is allowed to mutate
pub const KNOWLEDGE_PREFIX: &str = "knowledge/";

/// Path prefix for configuration targets that get queued as proposals
pub const CONFIG_PREFIX: &str = "config/";

/// What a change (or recommendation) wants done to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Update,
    UpdateField,
    Remove,
    AnalyzePatterns,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Add => write!(f, "add"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::UpdateField => write!(f, "update_field"),
            ChangeAction::Remove => write!(f, "remove"),
            ChangeAction::AnalyzePatterns => write!(f, "analyze_patterns"),
        }
    }
}

/// How an `update` is anchored on a heading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOperation {
    /// After the end of the heading's section
    #[default]
    Append,
    /// Everything between the heading and its section end
    Replace,
    /// Immediately after the heading line
    Insert,
}

impl SectionOperation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "append" => Some(SectionOperation::Append),
            "replace" => Some(SectionOperation::Replace),
            "insert" | "prepend" => Some(SectionOperation::Insert),
            _ => None,
        }
    }
}

/// Payload carried by a change; which fields matter depends on the action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Heading an update is anchored on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<SectionOperation>,
    /// Dot-separated field path for `update_field`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Regex for `remove`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ChangePayload {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn field(field: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field: Some(field.into()),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A normalized `(target, action, payload)` unit consumed by the applier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub target: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub payload: ChangePayload,
}

impl ChangeDescriptor {
    pub fn new(target: impl Into<String>, action: ChangeAction, payload: ChangePayload) -> Self {
        Self {
            target: target.into(),
            action,
            payload,
        }
    }

    /// Target with any leading `./` removed and separators normalized
    pub fn normalized_target(&self) -> String {
        normalize_target(&self.target)
    }
}

pub fn normalize_target(target: &str) -> String {
    let t = target.trim().replace('\\', "/");
    t.trim_start_matches("./").to_string()
}

/// "Senior Researcher" -> "senior_researcher"
pub fn config_stem(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn agent_config_target(agent: &str) -> String {
    format!("{}agents/{}.yaml", CONFIG_PREFIX, config_stem(agent))
}

pub fn task_config_target(task: &str) -> String {
    format!("{}tasks/{}.yaml", CONFIG_PREFIX, config_stem(task))
}

/// A confidence-scored change proposal produced by the adaptive engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub target: String,
    pub action: ChangeAction,
    pub payload: ChangePayload,
    /// 0.0-1.0
    pub confidence: f64,
    /// Issue the recommendation addresses (e.g. "low_success_rate")
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl Recommendation {
    pub fn is_knowledge(&self) -> bool {
        self.target == KNOWLEDGE_TARGET
    }

    /// Flatten into the descriptor the applier understands
    pub fn to_descriptor(&self) -> ChangeDescriptor {
        ChangeDescriptor::new(self.target.clone(), self.action, self.payload.clone())
    }
}

/// Outcome of applying one change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Skipped,
    Failed,
    Blocked,
}

impl std::fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyStatus::Applied => write!(f, "applied"),
            ApplyStatus::Skipped => write!(f, "skipped"),
            ApplyStatus::Failed => write!(f, "failed"),
            ApplyStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Structured result for a single applied/skipped/failed change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub target: String,
    pub action: ChangeAction,
    pub status: ApplyStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl ApplyResult {
    pub fn applied(change: &ChangeDescriptor, detail: impl Into<String>, path: PathBuf) -> Self {
        Self {
            target: change.target.clone(),
            action: change.action,
            status: ApplyStatus::Applied,
            detail: detail.into(),
            path: Some(path),
            backup: None,
        }
    }

    pub fn skipped(change: &ChangeDescriptor, detail: impl Into<String>) -> Self {
        Self {
            target: change.target.clone(),
            action: change.action,
            status: ApplyStatus::Skipped,
            detail: detail.into(),
            path: None,
            backup: None,
        }
    }

    pub fn failed(change: &ChangeDescriptor, detail: impl Into<String>) -> Self {
        Self {
            target: change.target.clone(),
            action: change.action,
            status: ApplyStatus::Failed,
            detail: detail.into(),
            path: None,
            backup: None,
        }
    }

    pub fn with_backup(mut self, backup: Option<PathBuf>) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&ChangeAction::UpdateField).unwrap();
        assert_eq!(json, "\"update_field\"");
        assert_eq!(ChangeAction::AnalyzePatterns.to_string(), "analyze_patterns");
    }

    #[test]
    fn test_normalized_target() {
        assert_eq!(normalize_target("./knowledge/x.md"), "knowledge/x.md");
        assert_eq!(normalize_target("knowledge\\a\\b.md"), "knowledge/a/b.md");
    }

    #[test]
    fn test_section_operation_parse() {
        assert_eq!(SectionOperation::parse("Replace"), Some(SectionOperation::Replace));
        assert_eq!(SectionOperation::parse("prepend"), Some(SectionOperation::Insert));
        assert_eq!(SectionOperation::parse("merge"), None);
    }

    #[test]
    fn test_recommendation_flattens() {
        let rec = Recommendation {
            target: KNOWLEDGE_TARGET.to_string(),
            action: ChangeAction::Add,
            payload: ChangePayload::content("hello"),
            confidence: 0.6,
            issue: "performance_decline".to_string(),
            worker: Some("coder".to_string()),
        };
        assert!(rec.is_knowledge());
        let d = rec.to_descriptor();
        assert_eq!(d.target, "knowledge");
        assert_eq!(d.payload.content.as_deref(), Some("hello"));
    }
}
