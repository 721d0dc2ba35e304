//! JSON file persistence shared by every store
//!
//! Reads degrade to the type's default when a file is missing or corrupt;
//! writes go through a sibling temp file and a rename so a crash mid-write
//! leaves the previous version in place.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// Load a JSON document, falling back to `T::default()` on any problem
pub fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read {}: {}; starting empty", path.display(), e);
            return T::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!("Corrupt JSON in {}: {}; starting empty", path.display(), e);
            T::default()
        }
    }
}

/// Write a value as pretty JSON, replacing the file atomically
pub fn write_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Append one item to a JSON array file (created if missing)
///
/// Existing content that is not an array is kept under a `.corrupt` sibling
/// rather than silently dropped.
pub fn append_json_array<T>(path: &Path, item: &T) -> Result<usize>
where
    T: Serialize,
{
    let mut items: Vec<serde_json::Value> = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(items) => items,
            Err(e) => {
                let aside = path.with_extension("json.corrupt");
                warn!(
                    "{} is not a JSON array ({}); moving it to {}",
                    path.display(),
                    e,
                    aside.display()
                );
                std::fs::rename(path, &aside)
                    .with_context(|| format!("Failed to move aside {}", path.display()))?;
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    items.push(serde_json::to_value(item).context("Failed to serialize array item")?);
    write_json(path, &items)?;
    Ok(items.len())
}
