//! Generic change dispatcher
//!
//! Only targets under the knowledge root are forwarded to the applier.
//! Everything else is blocked; config targets are also queued as proposals
//! for a human to replay.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::applier::KnowledgeApplier;
use crate::storage;
use crate::types::{ApplyResult, ApplyStatus, ChangeDescriptor, CONFIG_PREFIX};

/// A blocked config change awaiting manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub id: String,
    pub change: ChangeDescriptor,
    pub reason: String,
    pub proposed_at: DateTime<Utc>,
}

/// Outcome of a batch, split by status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub applied: Vec<ApplyResult>,
    pub skipped: Vec<ApplyResult>,
    pub failed: Vec<ApplyResult>,
    pub blocked: Vec<ApplyResult>,
    /// Config-path subset of `blocked`, as queued
    pub blocked_config_changes: Vec<ProposedChange>,
    #[serde(default)]
    pub dry_run: bool,
}

impl DispatchReport {
    pub fn push(&mut self, result: ApplyResult) {
        match result.status {
            ApplyStatus::Applied => self.applied.push(result),
            ApplyStatus::Skipped => self.skipped.push(result),
            ApplyStatus::Failed => self.failed.push(result),
            ApplyStatus::Blocked => self.blocked.push(result),
        }
    }

    pub fn total(&self) -> usize {
        self.applied.len() + self.skipped.len() + self.failed.len() + self.blocked.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} skipped, {} failed, {} blocked ({} queued for review)",
            self.applied.len(),
            self.skipped.len(),
            self.failed.len(),
            self.blocked.len(),
            self.blocked_config_changes.len()
        )
    }
}

pub struct ChangeDispatcher {
    applier: Arc<KnowledgeApplier>,
    proposals_path: PathBuf,
}

impl ChangeDispatcher {
    pub fn new(applier: Arc<KnowledgeApplier>, proposals_path: impl Into<PathBuf>) -> Self {
        Self {
            applier,
            proposals_path: proposals_path.into(),
        }
    }

    pub fn applier(&self) -> &Arc<KnowledgeApplier> {
        &self.applier
    }

    pub fn proposals_path(&self) -> &Path {
        &self.proposals_path
    }

    /// Apply a batch. Per-item problems land in the report, never in `Err`.
    pub fn apply_changes(&self, changes: &[ChangeDescriptor], dry_run: bool) -> DispatchReport {
        let mut report = DispatchReport {
            dry_run,
            ..Default::default()
        };

        for change in changes {
            if self.applier.in_scope(&change.target) {
                if dry_run {
                    report.push(ApplyResult::skipped(change, "dry run: would apply"));
                } else {
                    report.push(self.applier.apply(change));
                }
                continue;
            }

            let (result, proposal) = self.block(change, dry_run);
            report.push(result);
            if let Some(proposal) = proposal {
                report.blocked_config_changes.push(proposal);
            }
        }

        info!("Dispatched {} changes: {}", report.total(), report.summary());
        report
    }

    /// Apply one change through the same scope gate
    pub fn apply_one(&self, change: &ChangeDescriptor) -> ApplyResult {
        let report = self.apply_changes(std::slice::from_ref(change), false);
        [report.applied, report.skipped, report.failed, report.blocked]
            .iter_mut()
            .find_map(|bucket| bucket.pop())
            .unwrap_or_else(|| ApplyResult::failed(change, "no result produced"))
    }

    fn block(&self, change: &ChangeDescriptor, dry_run: bool) -> (ApplyResult, Option<ProposedChange>) {
        let target = change.normalized_target();
        let is_config = target.starts_with(CONFIG_PREFIX) && !target.split('/').any(|s| s == "..");

        let reason = if is_config {
            "config changes require manual review".to_string()
        } else {
            format!(
                "only paths under {} may be modified",
                self.applier.knowledge_prefix()
            )
        };
        warn!("Blocked {} on {}: {}", change.action, change.target, reason);

        let mut result = ApplyResult::skipped(change, reason.clone());
        result.status = ApplyStatus::Blocked;

        if !is_config {
            return (result, None);
        }

        let proposal = ProposedChange {
            id: Uuid::new_v4().to_string(),
            change: change.clone(),
            reason,
            proposed_at: Utc::now(),
        };
        if !dry_run {
            match storage::append_json_array(&self.proposals_path, &proposal) {
                Ok(n) => info!("Queued proposal {} ({} pending)", proposal.id, n),
                Err(e) => {
                    warn!("Failed to queue proposal for {}: {:#}", change.target, e);
                    result.detail = format!("{}; queueing failed: {:#}", result.detail, e);
                }
            }
        }
        (result, Some(proposal))
    }

    /// Everything in the proposal queue, oldest first
    pub fn pending_proposals(&self) -> Vec<ProposedChange> {
        storage::load_json_or_default(&self.proposals_path)
    }

    /// Empty the proposal queue
    pub fn clear_proposals(&self) -> Result<()> {
        storage::write_json(&self.proposals_path, &Vec::<ProposedChange>::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeAction, ChangePayload};
    use serde_json::json;

    fn dispatcher() -> (tempfile::TempDir, ChangeDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let applier = KnowledgeApplier::new(dir.path(), "knowledge", &dir.path().join("backups")).unwrap();
        let d = ChangeDispatcher::new(Arc::new(applier), dir.path().join("proposed_changes.json"));
        (dir, d)
    }

    #[test]
    fn test_partition() {
        let (dir, d) = dispatcher();
        let changes = vec![
            ChangeDescriptor::new("knowledge/a.md", ChangeAction::Add, ChangePayload::content("alpha")),
            ChangeDescriptor::new(
                "config/agents/foo.yaml",
                ChangeAction::UpdateField,
                ChangePayload::field("max_iter", json!(30)),
            ),
            ChangeDescriptor::new("src/main.rs", ChangeAction::Remove, ChangePayload::default()),
        ];

        let report = d.apply_changes(&changes, false);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.blocked.len(), 2);
        assert_eq!(report.blocked_config_changes.len(), 1);
        assert_eq!(report.blocked_config_changes[0].change.target, "config/agents/foo.yaml");
        assert!(!dir.path().join("config").exists());

        let pending = d.pending_proposals();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].change.action, ChangeAction::UpdateField);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (dir, d) = dispatcher();
        let changes = vec![
            ChangeDescriptor::new("knowledge/a.md", ChangeAction::Add, ChangePayload::content("alpha")),
            ChangeDescriptor::new("config/crews/main_crew.yaml", ChangeAction::UpdateField, ChangePayload::field("planning", json!(true))),
        ];
        let report = d.apply_changes(&changes, true);
        assert!(report.dry_run);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.blocked_config_changes.len(), 1);
        assert!(d.pending_proposals().is_empty());
        assert!(!dir.path().join("knowledge/general/a.md").exists());
    }

    #[test]
    fn test_traversal_is_not_a_proposal() {
        let (_dir, d) = dispatcher();
        let change = ChangeDescriptor::new("config/../../etc/passwd", ChangeAction::Remove, ChangePayload::default());
        let result = d.apply_one(&change);
        assert_eq!(result.status, ApplyStatus::Blocked);
        assert!(d.pending_proposals().is_empty());
    }

    #[test]
    fn test_clear_proposals() {
        let (_dir, d) = dispatcher();
        let change = ChangeDescriptor::new("config/tasks/t.yaml", ChangeAction::Update, ChangePayload::content("x"));
        d.apply_one(&change);
        d.apply_one(&change);
        assert_eq!(d.pending_proposals().len(), 2);
        d.clear_proposals().unwrap();
        assert!(d.pending_proposals().is_empty());
    }
}
