//! Seams between the engine and its collaborators.
//!
//! The SQLite implementations live in `wikihist-state`; [`crate::memory`]
//! provides in-memory doubles.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use wikihist_state::BatchMarker;
use wikihist_state::HistoryRuntime;
use wikihist_state::InclusionFilter;
use wikihist_state::Page;
use wikihist_state::PassCounts;
use wikihist_state::RedirectCandidate;
use wikihist_state::RedirectTarget;
use wikihist_state::RedirectVersion;
use wikihist_state::SnapshotDb;
use wikihist_state::StoreResult;

/// Persistent redirect history plus the pass ledger guarding it.
#[async_trait]
pub trait TemporalStore: Send + Sync {
    /// Create or migrate the schema. Idempotent.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Claim the single-writer lease for `batch_marker`.
    async fn begin_pass(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()>;

    /// Heartbeat the lease taken by [`TemporalStore::begin_pass`]. Fails
    /// with `LeaseLost` once the pass can no longer count on holding it.
    async fn renew_lease(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()>;

    async fn complete_pass(&self, batch_marker: BatchMarker, counts: &PassCounts)
    -> StoreResult<()>;

    async fn abort_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
        reason: &str,
    ) -> StoreResult<()>;

    /// The version of `page_id` whose interval contains `as_of`, with an
    /// exclusive start bound.
    async fn lookup_open_version(
        &self,
        page_id: i64,
        as_of: BatchMarker,
    ) -> StoreResult<Option<RedirectVersion>>;

    async fn open_version(
        &self,
        page_id: i64,
        page_title: &str,
        target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion>;

    async fn renew(&self, page_id: i64, batch_marker: BatchMarker) -> StoreResult<()>;

    /// Close the open version and open its successor atomically.
    async fn close_and_replace(
        &self,
        page_id: i64,
        new_title: &str,
        new_target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion>;

    /// Close every open version not confirmed by `batch_marker`; returns how
    /// many were closed.
    async fn sweep(&self, batch_marker: BatchMarker) -> StoreResult<u64>;
}

/// Produces the candidates of one pass.
///
/// Each call starts a fresh, forward-only scan. Sources may push `filter`
/// down; the engine re-checks it either way.
pub trait SnapshotSource: Send + Sync {
    fn candidates(&self, filter: &InclusionFilter)
    -> BoxStream<'static, StoreResult<RedirectCandidate>>;
}

/// Point lookups of snapshot pages.
#[async_trait]
pub trait PageDirectory: Send + Sync {
    async fn page_by_title(&self, namespace: i64, title: &str) -> StoreResult<Option<Page>>;

    async fn page_by_id(&self, page_id: i64) -> StoreResult<Option<Page>>;
}

#[async_trait]
impl TemporalStore for HistoryRuntime {
    async fn ensure_schema(&self) -> StoreResult<()> {
        HistoryRuntime::ensure_schema(self).await
    }

    async fn begin_pass(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()> {
        HistoryRuntime::begin_pass(self, batch_marker, lease).await
    }

    async fn renew_lease(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()> {
        HistoryRuntime::renew_lease(self, batch_marker, lease).await
    }

    async fn complete_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
    ) -> StoreResult<()> {
        HistoryRuntime::complete_pass(self, batch_marker, counts).await
    }

    async fn abort_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
        reason: &str,
    ) -> StoreResult<()> {
        HistoryRuntime::abort_pass(self, batch_marker, counts, reason).await
    }

    async fn lookup_open_version(
        &self,
        page_id: i64,
        as_of: BatchMarker,
    ) -> StoreResult<Option<RedirectVersion>> {
        HistoryRuntime::lookup_open_version(self, page_id, as_of).await
    }

    async fn open_version(
        &self,
        page_id: i64,
        page_title: &str,
        target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion> {
        HistoryRuntime::open_version(self, page_id, page_title, target, batch_marker).await
    }

    async fn renew(&self, page_id: i64, batch_marker: BatchMarker) -> StoreResult<()> {
        HistoryRuntime::renew(self, page_id, batch_marker).await
    }

    async fn close_and_replace(
        &self,
        page_id: i64,
        new_title: &str,
        new_target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion> {
        HistoryRuntime::close_and_replace(self, page_id, new_title, new_target, batch_marker).await
    }

    async fn sweep(&self, batch_marker: BatchMarker) -> StoreResult<u64> {
        HistoryRuntime::sweep(self, batch_marker).await
    }
}

impl SnapshotSource for SnapshotDb {
    fn candidates(
        &self,
        filter: &InclusionFilter,
    ) -> BoxStream<'static, StoreResult<RedirectCandidate>> {
        SnapshotDb::candidates(self, filter)
    }
}

#[async_trait]
impl PageDirectory for SnapshotDb {
    async fn page_by_title(&self, namespace: i64, title: &str) -> StoreResult<Option<Page>> {
        SnapshotDb::page_by_title(self, namespace, title).await
    }

    async fn page_by_id(&self, page_id: i64) -> StoreResult<Option<Page>> {
        SnapshotDb::page_by_id(self, page_id).await
    }
}
