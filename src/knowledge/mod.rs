//! Knowledge store mutation
//!
//! Provides:
//! - Section-tree model for heading-anchored Markdown edits
//! - Tag/category index over the knowledge tree
//! - Knowledge applier (add, update, update_field, remove) with backups and dedup
//! - Scope-enforcing dispatcher with a proposal queue for config changes

pub mod applier;
pub mod dispatcher;
pub mod document;
pub mod index;

pub use applier::{list_documents, ApplyError, KnowledgeApplier};
pub use dispatcher::{ChangeDispatcher, DispatchReport, ProposedChange};
pub use document::{Document, Heading, Section};
pub use index::{IndexEntry, KnowledgeIndex};
