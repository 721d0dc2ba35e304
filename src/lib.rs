//! Self-improvement core for multi-agent task execution
//!
//! - Execution ledger with per-worker metrics, pattern mining and insights
//! - Trend analysis and confidence-gated adaptations
//! - Change extraction from free text and embedded JSON
//! - A knowledge applier that only ever writes under the knowledge root
//! - Knowledge and memory graphs with traversal, search and gap detection
//!
//! # Example
//!
//! ```ignore
//! use self_improve::{Config, SelfImprovementSystem};
//! use self_improve::metrics::ExecutionRecord;
//!
//! fn main() -> anyhow::Result<()> {
//!     let system = SelfImprovementSystem::open(Config::load()?)?;
//!     system.record_execution(ExecutionRecord::new("researcher", true, 2.5))?;
//!     let cycle = system.engine().run_cycle(true);
//!     println!("{} recommendations", cycle.recommendations.len());
//!     Ok(())
//! }
//! ```

// Shared vocabulary first; everything else builds on it
pub mod types;
pub mod config;
pub mod storage;
pub mod metrics;
pub mod extraction;
pub mod knowledge;
pub mod memory;
pub mod learning;
pub mod system;
pub mod cli;

pub use config::Config;
pub use extraction::ChangeExtractor;
pub use knowledge::{ChangeDispatcher, DispatchReport, KnowledgeApplier};
pub use learning::{AdaptationResult, AdaptiveEngine};
pub use memory::{GraphIntegration, KnowledgeGraph, KnowledgeNode};
pub use metrics::{ExecutionLedger, ExecutionRecord};
pub use system::SelfImprovementSystem;
pub use types::{ApplyResult, ApplyStatus, ChangeAction, ChangeDescriptor, ChangePayload, Recommendation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
