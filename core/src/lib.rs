//! Redirect history reconciliation.
//!
//! A pass reads every redirect candidate of the current snapshot, compares it
//! with the open version of the same page, and records the difference as
//! SCD Type 2 history: CREATE for new redirects, RENEW for unchanged ones,
//! REPLACE for retargeted ones, and a final sweep that expires everything the
//! snapshot no longer lists.

mod engine;
mod error;
pub mod memory;
mod pass;
mod resolver;
mod store;
mod util;

pub use engine::Action;
pub use engine::DropReason;
pub use engine::Outcome;
pub use engine::ReconciliationEngine;
pub use error::ReconcileError;
pub use error::Result;
pub use pass::DEFAULT_LEASE;
pub use pass::PassController;
pub use pass::PassOptions;
pub use pass::PassSummary;
pub use resolver::DEFAULT_CACHE_CAPACITY;
pub use resolver::ResolverStats;
pub use resolver::TargetResolver;
pub use store::PageDirectory;
pub use store::SnapshotSource;
pub use store::TemporalStore;
pub use util::RetryPolicy;
pub use util::backoff;
