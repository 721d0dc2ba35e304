//! Knowledge-specialized change applier
//!
//! Executes add/update/update_field/remove against files under the knowledge
//! root. Every existing file is copied to the backups directory before it is
//! modified, and the tag/category index is refreshed after adds and updates.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::document::Document;
use super::index::{KnowledgeIndex, INDEX_FILE};
use crate::config::StorageConfig;
use crate::types::{
    normalize_target, ApplyResult, ApplyStatus, ChangeAction, ChangeDescriptor, ChangePayload,
    SectionOperation,
};

const DEFAULT_CATEGORY: &str = "general";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";
const UPDATED_MARKER: &str = "**Updated:**";

/// Typed failures from a single change
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("target '{0}' is outside the knowledge root")]
    OutsideRoot(String),
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("{} is not YAML: {}", .0.display(), .1)]
    NotYaml(PathBuf, String),
    #[error("invalid pattern '{0}': {1}")]
    BadPattern(String, String),
    #[error("change has no {0}")]
    MissingField(&'static str),
    #[error("cannot set '{0}': '{1}' is not a mapping")]
    FieldPath(String, String),
}

pub struct KnowledgeApplier {
    knowledge_dir: String,
    root: PathBuf,
    backups_dir: PathBuf,
    index: RwLock<KnowledgeIndex>,
}

/// Lowercase and collapse whitespace for containment checks
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// "error-handling" -> "Error Handling"
fn title_from_stem(stem: &str) -> String {
    stem.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn render_document(title: &str, payload: &ChangePayload, content: &str) -> String {
    let now = Utc::now().format(DATE_FORMAT);
    let mut metadata = payload.metadata.clone();
    if let Some(reason) = &payload.reason {
        metadata.insert("reason".into(), serde_json::Value::String(reason.clone()));
    }
    let metadata = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());

    format!(
        "# {title}\n\n\
         **Created:** {now}\n\
         {UPDATED_MARKER} {now}\n\
         **Tags:** {tags}\n\n\
         {content}\n\n\
         ## Related Knowledge\n\n\
         _None linked yet._\n\n\
         ## Usage Examples\n\n\
         _None recorded yet._\n\n\
         ---\n\
         <!-- metadata: {metadata} -->\n",
        tags = payload.tags.join(", "),
        content = content.trim(),
    )
}

/// Replace the `**Updated:**` line of the header block (title, blank lines and
/// `**Field:**` lines at the top); body lines are left alone
fn stamp_header(doc: &mut Document, stamp: &str) {
    let mut in_header = true;
    doc.map_lines(|line| {
        if !in_header {
            return None;
        }
        if line.starts_with(UPDATED_MARKER) {
            in_header = false;
            return Some(stamp.to_string());
        }
        let trimmed = line.trim();
        if !(trimmed.is_empty() || trimmed.starts_with("# ") || trimmed.starts_with("**")) {
            in_header = false;
        }
        None
    });
}

impl KnowledgeApplier {
    /// `project_root/knowledge_dir` is the only tree this applier writes to
    pub fn new(project_root: &Path, knowledge_dir: &str, backups_dir: &Path) -> Result<Self> {
        let root = project_root.join(knowledge_dir);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create knowledge root {}", root.display()))?;

        let index = KnowledgeIndex::load(&root);
        info!("Knowledge applier at {} ({} indexed files)", root.display(), index.len());

        Ok(Self {
            knowledge_dir: knowledge_dir.trim_matches('/').to_string(),
            root,
            backups_dir: backups_dir.to_path_buf(),
            index: RwLock::new(index),
        })
    }

    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        Self::new(&storage.project_root, &storage.knowledge_dir, &storage.backups_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target prefix for in-scope paths, e.g. "knowledge/"
    pub fn knowledge_prefix(&self) -> String {
        format!("{}/", self.knowledge_dir)
    }

    /// True if `target` names a path inside the knowledge root
    pub fn in_scope(&self, target: &str) -> bool {
        self.relative_path(target).is_ok()
    }

    pub fn index(&self) -> KnowledgeIndex {
        self.index.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Apply one change. Never returns an error; failures become a `failed` result.
    pub fn apply(&self, change: &ChangeDescriptor) -> ApplyResult {
        match self.try_apply(change) {
            Ok(result) => {
                debug!("{} {} -> {}", change.action, change.target, result.status);
                result
            }
            Err(e) => {
                warn!("Failed to apply {} to {}: {:#}", change.action, change.target, e);
                ApplyResult::failed(change, format!("{:#}", e))
            }
        }
    }

    fn try_apply(&self, change: &ChangeDescriptor) -> Result<ApplyResult> {
        let rel = self.relative_path(&change.target)?;
        match change.action {
            ChangeAction::Add => self.add(change, &rel),
            ChangeAction::Update => self.update(change, &rel),
            ChangeAction::UpdateField => self.update_field(change, &rel),
            ChangeAction::Remove => self.remove(change, &rel),
            ChangeAction::AnalyzePatterns => Ok(ApplyResult::skipped(
                change,
                "analyze_patterns is handled by the adaptive engine",
            )),
        }
    }

    /// Path below the knowledge root; empty for the bare root
    fn relative_path(&self, target: &str) -> Result<PathBuf, ApplyError> {
        let normalized = normalize_target(target);
        if normalized == self.knowledge_dir {
            return Ok(PathBuf::new());
        }
        let rest = normalized
            .strip_prefix(&self.knowledge_prefix())
            .ok_or_else(|| ApplyError::OutsideRoot(target.to_string()))?;

        let rel = PathBuf::from(rest);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(ApplyError::OutsideRoot(target.to_string()));
        }
        Ok(rel)
    }

    /// Existing file for a relative path, searching category folders for bare names
    fn resolve_existing(&self, rel: &Path) -> Option<PathBuf> {
        if rel.as_os_str().is_empty() {
            return None;
        }
        let direct = self.root.join(rel);
        if direct.is_file() {
            return Some(direct);
        }
        if rel.components().count() != 1 {
            return None;
        }

        let name = rel.file_name()?;
        let mut found: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == name)
            .map(|e| e.into_path())
            .collect();
        found.sort();
        found.into_iter().next()
    }

    /// First existing Markdown file whose normalized text contains both `title` and `content`
    fn find_duplicate(&self, title: &str, content: &str) -> Option<PathBuf> {
        let title = normalize_text(title);
        let needle = normalize_text(content);
        if needle.is_empty() {
            return None;
        }

        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
            .find(|e| {
                std::fs::read_to_string(e.path())
                    .map(|text| {
                        let text = normalize_text(&text);
                        text.contains(&title) && text.contains(&needle)
                    })
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
    }

    fn backup(&self, path: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.backups_dir)
            .with_context(|| format!("Failed to create {}", self.backups_dir.display()))?;

        let flat = relative_key(&self.root, path).replace('/', "__");
        let backup = self
            .backups_dir
            .join(format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"), flat));
        std::fs::copy(path, &backup)
            .with_context(|| format!("Failed to back up {}", path.display()))?;
        debug!("Backed up {} to {}", path.display(), backup.display());
        Ok(backup)
    }

    fn reindex(&self, path: &Path, title: &str, category: &str, tags: &[String]) -> Result<()> {
        let key = relative_key(&self.root, path);
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.record(&key, title, category, tags);
        index.save(&self.root)
    }

    fn add(&self, change: &ChangeDescriptor, rel: &Path) -> Result<ApplyResult> {
        let payload = &change.payload;
        let content = payload
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ApplyError::MissingField("content"))?;

        let parent = rel.parent().filter(|p| !p.as_os_str().is_empty());
        let category = payload
            .category
            .clone()
            .or_else(|| parent.map(|p| p.to_string_lossy().replace('\\', "/")))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let stem = rel.file_stem().map(|s| s.to_string_lossy().to_string());
        let title = payload
            .title
            .clone()
            .or_else(|| stem.as_deref().map(title_from_stem))
            .unwrap_or_else(|| "Untitled".to_string());

        if let Some(existing) = self.find_duplicate(&title, content) {
            let key = relative_key(&self.root, &existing);
            info!("Skipping duplicate knowledge '{}' (matches {})", title, key);
            return Ok(ApplyResult::skipped(change, format!("duplicate of {}", key)).with_path(existing));
        }

        let base = match &stem {
            Some(stem) => stem.clone(),
            None => slugify(&title),
        };
        let dir = match parent {
            Some(p) => self.root.join(p),
            None => self.root.join(&category),
        };
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut path = dir.join(format!("{}.md", base));
        let mut suffix = 2;
        while path.exists() {
            path = dir.join(format!("{}-{}.md", base, suffix));
            suffix += 1;
        }

        std::fs::write(&path, render_document(&title, payload, content))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.reindex(&path, &title, &category, &payload.tags)?;

        info!("Added knowledge '{}' at {}", title, path.display());
        Ok(ApplyResult::applied(change, "created", path))
    }

    fn update(&self, change: &ChangeDescriptor, rel: &Path) -> Result<ApplyResult> {
        let payload = &change.payload;
        let Some(path) = self.resolve_existing(rel) else {
            // Nothing to update: create it, titled after the section being written
            let mut redirected = change.clone();
            redirected.action = ChangeAction::Add;
            redirected.payload.title = payload.section.clone().or_else(|| payload.title.clone());
            info!("Update target {} missing, adding it instead", change.target);
            let mut result = self.add(&redirected, rel)?;
            result.action = change.action;
            if result.status == ApplyStatus::Applied {
                result.detail = "created (update target was missing)".to_string();
            }
            return Ok(result);
        };

        let content = payload
            .content
            .as_deref()
            .ok_or(ApplyError::MissingField("content"))?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let backup = self.backup(&path)?;

        let mut doc = Document::parse(&text);
        match (&payload.section, payload.operation.unwrap_or_default()) {
            (Some(section), SectionOperation::Append) => doc.append_to_section(section, content),
            (Some(section), SectionOperation::Replace) => doc.replace_section(section, content),
            (Some(section), SectionOperation::Insert) => doc.insert_after_heading(section, content),
            (None, _) => doc.append(content),
        }
        let stamp = format!("{} {}", UPDATED_MARKER, Utc::now().format(DATE_FORMAT));
        stamp_header(&mut doc, &stamp);

        std::fs::write(&path, doc.render())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let key = relative_key(&self.root, &path);
        let previous = self.index().entry(&key).cloned();
        let title = doc
            .title()
            .map(str::to_string)
            .or_else(|| previous.as_ref().map(|e| e.title.clone()))
            .unwrap_or_else(|| title_from_stem(&key));
        let category = previous
            .as_ref()
            .map(|e| e.category.clone())
            .or_else(|| payload.category.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let mut tags = previous.map(|e| e.tags).unwrap_or_default();
        for tag in &payload.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        self.reindex(&path, &title, &category, &tags)?;

        info!("Updated {} ({:?})", path.display(), payload.section);
        Ok(ApplyResult::applied(change, "updated", path).with_backup(Some(backup)))
    }

    fn update_field(&self, change: &ChangeDescriptor, rel: &Path) -> Result<ApplyResult> {
        let payload = &change.payload;
        let path = self
            .resolve_existing(rel)
            .ok_or_else(|| ApplyError::MissingFile(self.root.join(rel)))?;
        let is_yaml = path
            .extension()
            .is_some_and(|x| x == "yaml" || x == "yml");
        if !is_yaml {
            return Err(ApplyError::NotYaml(path, "not a .yaml/.yml file".into()).into());
        }

        let field = payload.field.as_deref().ok_or(ApplyError::MissingField("field"))?;
        let value = payload.value.as_ref().ok_or(ApplyError::MissingField("value"))?;
        let value: serde_yaml::Value =
            serde_yaml::to_value(value).context("Failed to convert value to YAML")?;

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut doc: serde_yaml::Value = serde_yaml::from_str(&text)
            .map_err(|e| ApplyError::NotYaml(path.clone(), e.to_string()))?;
        set_nested(&mut doc, field, value)?;

        let backup = self.backup(&path)?;
        let rendered = serde_yaml::to_string(&doc).context("Failed to serialize YAML")?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Set {} in {}", field, path.display());
        Ok(ApplyResult::applied(change, format!("set {}", field), path).with_backup(Some(backup)))
    }

    fn remove(&self, change: &ChangeDescriptor, rel: &Path) -> Result<ApplyResult> {
        let path = self
            .resolve_existing(rel)
            .ok_or_else(|| ApplyError::MissingFile(self.root.join(rel)))?;
        let pattern = change
            .payload
            .pattern
            .as_deref()
            .ok_or(ApplyError::MissingField("pattern"))?;
        let re = Regex::new(&format!("(?m){}", pattern))
            .map_err(|e| ApplyError::BadPattern(pattern.to_string(), e.to_string()))?;

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if !re.is_match(&text) {
            return Ok(ApplyResult::skipped(change, "pattern not found").with_path(path));
        }

        let backup = self.backup(&path)?;
        let updated = re.replace_all(&text, "");
        std::fs::write(&path, updated.as_ref())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Removed /{}/ from {}", pattern, path.display());
        Ok(ApplyResult::applied(change, "removed", path).with_backup(Some(backup)))
    }
}

/// Set a dot-separated path, creating intermediate maps
fn set_nested(doc: &mut serde_yaml::Value, field: &str, value: serde_yaml::Value) -> Result<(), ApplyError> {
    let keys: Vec<&str> = field.split('.').filter(|k| !k.is_empty()).collect();
    let Some((last, parents)) = keys.split_last() else {
        return Err(ApplyError::MissingField("field"));
    };

    let mut current = doc;
    for key in parents {
        if current.is_null() {
            *current = serde_yaml::Value::Mapping(Default::default());
        }
        let map = current
            .as_mapping_mut()
            .ok_or_else(|| ApplyError::FieldPath(field.to_string(), key.to_string()))?;
        current = map
            .entry(serde_yaml::Value::String(key.to_string()))
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    }

    if current.is_null() {
        *current = serde_yaml::Value::Mapping(Default::default());
    }
    let map = current
        .as_mapping_mut()
        .ok_or_else(|| ApplyError::FieldPath(field.to_string(), last.to_string()))?;
    map.insert(serde_yaml::Value::String(last.to_string()), value);
    Ok(())
}

/// Markdown files under the root, relative, excluding the index
pub fn list_documents(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() != INDEX_FILE)
        .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn applier() -> (tempfile::TempDir, KnowledgeApplier) {
        let dir = tempfile::tempdir().unwrap();
        let applier =
            KnowledgeApplier::new(dir.path(), "knowledge", &dir.path().join("state/backups")).unwrap();
        (dir, applier)
    }

    fn add(target: &str, content: &str) -> ChangeDescriptor {
        ChangeDescriptor::new(target, ChangeAction::Add, ChangePayload::content(content))
    }

    #[test]
    fn test_scope() {
        let (_dir, a) = applier();
        assert!(a.in_scope("knowledge/x.md"));
        assert!(a.in_scope("./knowledge/guides/x.md"));
        assert!(a.in_scope("knowledge"));
        assert!(!a.in_scope("config/agents/foo.yaml"));
        assert!(!a.in_scope("knowledge/../config/x.yaml"));
        assert!(!a.in_scope("knowledgebase/x.md"));
    }

    #[test]
    fn test_add_renders_template_and_indexes() {
        let (_dir, a) = applier();
        let mut change = add("knowledge/guides/retry-policy.md", "Retry with backoff.");
        change.payload.tags = vec!["ops".into()];
        change.payload.reason = Some("flaky network".into());

        let result = a.apply(&change);
        assert_eq!(result.status, ApplyStatus::Applied, "{}", result.detail);
        let path = result.path.unwrap();
        assert_eq!(path, a.root().join("guides/retry-policy.md"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Retry Policy\n"));
        assert!(text.contains("**Tags:** ops"));
        assert!(text.contains("## Related Knowledge"));
        assert!(text.contains("flaky network"));

        let index = a.index();
        assert_eq!(index.files_in_category("guides"), ["guides/retry-policy.md"]);
        assert_eq!(index.files_with_tag("ops"), ["guides/retry-policy.md"]);
    }

    #[test]
    fn test_add_bare_file_goes_to_category() {
        let (_dir, a) = applier();
        let result = a.apply(&add("knowledge/x.md", "hello"));
        assert_eq!(result.path.unwrap(), a.root().join("general/x.md"));
    }

    #[test]
    fn test_add_twice_is_duplicate() {
        let (_dir, a) = applier();
        assert_eq!(a.apply(&add("knowledge/x.md", "Hello  World")).status, ApplyStatus::Applied);
        let second = a.apply(&add("knowledge/x.md", "hello world"));
        assert_eq!(second.status, ApplyStatus::Skipped);
        assert!(second.detail.starts_with("duplicate"));
        assert_eq!(list_documents(a.root()).len(), 1);
    }

    #[test]
    fn test_duplicate_detail_is_relative() {
        let (_dir, a) = applier();
        a.apply(&add("knowledge/tips/x.md", "hello world"));
        let second = a.apply(&add("knowledge/tips/x.md", "hello world"));
        assert_eq!(second.detail, "duplicate of tips/x.md");
    }

    #[test]
    fn test_common_phrase_in_other_file_is_not_duplicate() {
        let (_dir, a) = applier();
        let first = a.apply(&add("knowledge/a.md", "Retry idempotent requests with exponential backoff"));
        assert_eq!(first.status, ApplyStatus::Applied);

        let second = a.apply(&add("knowledge/b/other_topic.md", "backoff"));
        assert_eq!(second.status, ApplyStatus::Applied, "{}", second.detail);
        assert_eq!(list_documents(a.root()).len(), 2);
    }

    #[test]
    fn test_update_stamps_header_only() {
        let (_dir, a) = applier();
        a.apply(&add("knowledge/notes/log.md", "**Updated:** by hand in 2020"));
        let result = a.apply(&ChangeDescriptor::new(
            "knowledge/notes/log.md",
            ChangeAction::Update,
            ChangePayload::content("more"),
        ));
        assert_eq!(result.status, ApplyStatus::Applied, "{}", result.detail);

        let text = std::fs::read_to_string(a.root().join("notes/log.md")).unwrap();
        assert!(text.contains("**Updated:** by hand in 2020"));
        assert_eq!(text.matches(UPDATED_MARKER).count(), 2);
    }

    #[test]
    fn test_path_collision_gets_suffix() {
        let (_dir, a) = applier();
        a.apply(&add("knowledge/x.md", "first"));
        let result = a.apply(&add("knowledge/x.md", "second"));
        assert_eq!(result.path.unwrap(), a.root().join("general/x-2.md"));
    }

    #[test]
    fn test_update_section_with_backup() {
        let (dir, a) = applier();
        a.apply(&add("knowledge/guides/g.md", "body text"));

        let mut payload = ChangePayload::content("Use exponential backoff.");
        payload.section = Some("Usage Examples".into());
        payload.operation = Some(SectionOperation::Replace);
        let result = a.apply(&ChangeDescriptor::new("knowledge/guides/g.md", ChangeAction::Update, payload));
        assert_eq!(result.status, ApplyStatus::Applied, "{}", result.detail);

        let text = std::fs::read_to_string(a.root().join("guides/g.md")).unwrap();
        assert!(text.contains("## Usage Examples\n\nUse exponential backoff.\n\n---"));
        assert!(!text.contains("_None recorded yet._"));

        let backup = result.backup.unwrap();
        assert!(backup.starts_with(dir.path().join("state/backups")));
        assert!(std::fs::read_to_string(backup).unwrap().contains("_None recorded yet._"));
    }

    #[test]
    fn test_update_bare_name_finds_category_file() {
        let (_dir, a) = applier();
        a.apply(&add("knowledge/x.md", "hello"));
        let result = a.apply(&ChangeDescriptor::new(
            "knowledge/x.md",
            ChangeAction::Update,
            ChangePayload::content("more"),
        ));
        assert_eq!(result.status, ApplyStatus::Applied);
        assert_eq!(result.path.unwrap(), a.root().join("general/x.md"));
    }

    #[test]
    fn test_update_missing_redirects_to_add() {
        let (_dir, a) = applier();
        let mut payload = ChangePayload::content("fresh notes");
        payload.section = Some("Deployment Notes".into());
        let result = a.apply(&ChangeDescriptor::new("knowledge/ops/deploy.md", ChangeAction::Update, payload));

        assert_eq!(result.status, ApplyStatus::Applied);
        assert_eq!(result.action, ChangeAction::Update);
        let text = std::fs::read_to_string(result.path.unwrap()).unwrap();
        assert!(text.starts_with("# Deployment Notes"));
    }

    #[test]
    fn test_update_field_yaml() {
        let (_dir, a) = applier();
        let path = a.root().join("settings.yaml");
        std::fs::write(&path, "agent:\n  name: w\n").unwrap();

        let change = ChangeDescriptor::new(
            "knowledge/settings.yaml",
            ChangeAction::UpdateField,
            ChangePayload::field("agent.limits.max_iter", json!(30)),
        );
        assert_eq!(a.apply(&change).status, ApplyStatus::Applied);

        let doc: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["agent"]["limits"]["max_iter"], serde_yaml::Value::from(30));
        assert_eq!(doc["agent"]["name"], serde_yaml::Value::from("w"));
    }

    #[test]
    fn test_update_field_failures_are_results() {
        let (_dir, a) = applier();
        let missing = ChangeDescriptor::new(
            "knowledge/nope.yaml",
            ChangeAction::UpdateField,
            ChangePayload::field("x", json!(1)),
        );
        let result = a.apply(&missing);
        assert_eq!(result.status, ApplyStatus::Failed);
        assert!(result.detail.contains("not found"));

        std::fs::write(a.root().join("bad.yaml"), "key: [unclosed").unwrap();
        let bad = ChangeDescriptor::new("knowledge/bad.yaml", ChangeAction::UpdateField, ChangePayload::field("x", json!(1)));
        let result = a.apply(&bad);
        assert_eq!(result.status, ApplyStatus::Failed);
        assert!(result.detail.contains("not YAML"));
    }

    #[test]
    fn test_remove_pattern() {
        let (_dir, a) = applier();
        let path = a.root().join("notes.md");
        std::fs::write(&path, "keep\nTODO: drop me\nkeep too\n").unwrap();

        let mut payload = ChangePayload::default();
        payload.pattern = Some(r"^TODO:.*\n".into());
        let change = ChangeDescriptor::new("knowledge/notes.md", ChangeAction::Remove, payload);
        assert_eq!(a.apply(&change).status, ApplyStatus::Applied);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep\nkeep too\n");

        assert_eq!(a.apply(&change).status, ApplyStatus::Skipped);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Error Handling: Tips!"), "error-handling-tips");
        assert_eq!(slugify("!!!"), "untitled");
        assert_eq!(title_from_stem("error-handling"), "Error Handling");
    }
}
