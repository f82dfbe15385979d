//! SQLite-backed storage for redirect history.
//!
//! [`HistoryRuntime`] owns the history database: the `redirect_versions`
//! table of non-overlapping validity intervals per page and the `passes`
//! ledger. [`SnapshotDb`] reads the MediaWiki-shaped snapshot a pass
//! reconciles against. The two never share a connection pool.

mod error;
mod migrations;
mod model;
mod runtime;
mod snapshot;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::StoreError;
pub use error::StoreResult;
pub use model::BatchMarker;
pub use model::HistoryViolation;
pub use model::InclusionFilter;
pub use model::Page;
pub use model::PassCounts;
pub use model::PassRecord;
pub use model::PassStatus;
pub use model::RedirectCandidate;
pub use model::RedirectTarget;
pub use model::RedirectVersion;
pub use model::ReplacePolicy;
pub use model::find_history_violations;
pub use runtime::HISTORY_DB_FILENAME;
pub use runtime::HistoryOptions;
pub use runtime::HistoryRuntime;
pub use runtime::history_db_path;
pub use snapshot::SnapshotDb;
