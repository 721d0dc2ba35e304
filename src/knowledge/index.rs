//! Tag/category index over the knowledge tree, kept at `<root>/index.json`

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::storage;

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeIndex {
    /// Paths relative to the knowledge root
    #[serde(default)]
    pub files: BTreeMap<String, IndexEntry>,
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|f| f == item) {
        list.push(item.to_string());
    }
}

impl KnowledgeIndex {
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(INDEX_FILE)
    }

    pub fn load(root: &Path) -> Self {
        storage::load_json_or_default(&Self::path_for(root))
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        storage::write_json(&Self::path_for(root), self)
    }

    /// Add or refresh a file's entry. Creation time survives updates.
    pub fn record(&mut self, file: &str, title: &str, category: &str, tags: &[String]) {
        let now = Utc::now();
        let created = self.files.get(file).map_or(now, |e| e.created);

        // Drop stale tag links before re-adding the current ones
        if let Some(previous) = self.files.get(file) {
            for tag in previous.tags.iter().filter(|t| !tags.contains(t)) {
                if let Some(files) = self.tags.get_mut(tag) {
                    files.retain(|f| f != file);
                }
            }
            self.tags.retain(|_, files| !files.is_empty());
        }

        self.files.insert(
            file.to_string(),
            IndexEntry {
                title: title.to_string(),
                category: category.to_string(),
                tags: tags.to_vec(),
                created,
                updated: now,
            },
        );
        for tag in tags {
            push_unique(self.tags.entry(tag.clone()).or_default(), file);
        }
        push_unique(self.categories.entry(category.to_string()).or_default(), file);
    }

    pub fn entry(&self, file: &str) -> Option<&IndexEntry> {
        self.files.get(file)
    }

    pub fn files_with_tag(&self, tag: &str) -> &[String] {
        self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn files_in_category(&self, category: &str) -> &[String] {
        self.categories.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
