//! In-memory collaborators for tests and dry runs.
//!
//! [`InMemoryTemporalStore`] follows the same rules as the SQLite store:
//! strict-start lookups, a single open version per page, atomic replace,
//! and a sweep that only touches open versions. Both doubles can be told to
//! fail specific operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use futures::stream::BoxStream;
use wikihist_state::BatchMarker;
use wikihist_state::InclusionFilter;
use wikihist_state::Page;
use wikihist_state::PassCounts;
use wikihist_state::PassStatus;
use wikihist_state::RedirectCandidate;
use wikihist_state::RedirectTarget;
use wikihist_state::RedirectVersion;
use wikihist_state::StoreError;
use wikihist_state::StoreResult;

use crate::store::PageDirectory;
use crate::store::SnapshotSource;
use crate::store::TemporalStore;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    EnsureSchema,
    BeginPass,
    RenewLease,
    CompletePass,
    AbortPass,
    Lookup,
    OpenVersion,
    Renew,
    CloseAndReplace,
    Sweep,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Busy { remaining: u32 },
    Permanent,
}

/// One ledger row of the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassEntry {
    pub batch_marker: BatchMarker,
    pub status: PassStatus,
    pub counts: PassCounts,
    pub abort_reason: Option<String>,
    heartbeat: Instant,
}

#[derive(Default)]
struct StoreState {
    versions: Vec<RedirectVersion>,
    passes: Vec<PassEntry>,
    failures: HashMap<StoreOperation, Failure>,
}

#[derive(Default)]
pub struct InMemoryTemporalStore {
    state: Mutex<StoreState>,
}

impl InMemoryTemporalStore {
    /// Fail the next `times` calls of `operation` with a transient busy error.
    pub fn inject_busy(&self, operation: StoreOperation, times: u32) {
        self.lock()
            .failures
            .insert(operation, Failure::Busy { remaining: times });
    }

    /// Fail every call of `operation` with a non-transient error.
    pub fn fail_always(&self, operation: StoreOperation) {
        self.lock().failures.insert(operation, Failure::Permanent);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every version in creation order.
    pub fn all_versions(&self) -> Vec<RedirectVersion> {
        self.lock().versions.clone()
    }

    pub fn history_for_page(&self, page_id: i64) -> Vec<RedirectVersion> {
        self.lock()
            .versions
            .iter()
            .filter(|version| version.page_id == page_id)
            .cloned()
            .collect()
    }

    pub fn open_versions(&self) -> Vec<RedirectVersion> {
        self.lock()
            .versions
            .iter()
            .filter(|version| version.is_open())
            .cloned()
            .collect()
    }

    pub fn passes(&self) -> Vec<PassEntry> {
        self.lock().passes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state, failing first if a failure is armed for `operation`.
    fn enter(&self, operation: StoreOperation) -> StoreResult<MutexGuard<'_, StoreState>> {
        let mut state = self.lock();
        match state.failures.get_mut(&operation) {
            Some(Failure::Permanent) => {
                return Err(StoreError::Corrupt(format!(
                    "injected failure for {operation:?}"
                )));
            }
            Some(Failure::Busy { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                return Err(StoreError::busy());
            }
            _ => {}
        }
        Ok(state)
    }

    fn finish_pass(
        &self,
        operation: StoreOperation,
        batch_marker: BatchMarker,
        status: PassStatus,
        counts: &PassCounts,
        abort_reason: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.enter(operation)?;
        let entry = state
            .passes
            .iter_mut()
            .find(|entry| {
                entry.batch_marker == batch_marker && entry.status == PassStatus::Running
            })
            .ok_or(StoreError::UnknownPass {
                marker: batch_marker,
            })?;
        entry.status = status;
        entry.counts = *counts;
        entry.abort_reason = abort_reason.map(str::to_string);
        Ok(())
    }
}

impl StoreState {
    fn open_index(&self, page_id: i64) -> Option<usize> {
        self.versions
            .iter()
            .position(|version| version.page_id == page_id && version.is_open())
    }

    fn push_open(
        &mut self,
        page_id: i64,
        page_title: &str,
        target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> RedirectVersion {
        let version = RedirectVersion {
            page_id,
            page_title: page_title.to_string(),
            target_title: target.title.clone(),
            target_namespace: target.namespace,
            target_page_id: target.page_id,
            effective_from: batch_marker,
            effective_to: None,
            batch_marker,
        };
        self.versions.push(version.clone());
        version
    }
}

#[async_trait]
impl TemporalStore for InMemoryTemporalStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        self.enter(StoreOperation::EnsureSchema)?;
        Ok(())
    }

    async fn begin_pass(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()> {
        let mut state = self.enter(StoreOperation::BeginPass)?;
        let latest = state
            .passes
            .iter()
            .map(|entry| entry.batch_marker)
            .chain(state.versions.iter().map(|version| version.batch_marker))
            .chain(state.versions.iter().filter_map(|version| version.effective_to))
            .max();
        if let Some(latest) = latest
            && batch_marker <= latest
        {
            return Err(StoreError::NonMonotonicBatchMarker {
                marker: batch_marker,
                latest,
            });
        }
        for entry in state
            .passes
            .iter_mut()
            .filter(|entry| entry.status == PassStatus::Running)
        {
            if entry.heartbeat.elapsed() < lease {
                return Err(StoreError::PassInProgress {
                    running: entry.batch_marker,
                });
            }
            entry.status = PassStatus::Aborted;
            entry.abort_reason = Some("lease expired".to_string());
        }
        state.passes.push(PassEntry {
            batch_marker,
            status: PassStatus::Running,
            counts: PassCounts::default(),
            abort_reason: None,
            heartbeat: Instant::now(),
        });
        Ok(())
    }

    async fn renew_lease(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()> {
        let mut state = self.enter(StoreOperation::RenewLease)?;
        let entry = state
            .passes
            .iter_mut()
            .find(|entry| {
                entry.batch_marker == batch_marker
                    && entry.status == PassStatus::Running
                    && entry.heartbeat.elapsed() < lease
            })
            .ok_or(StoreError::LeaseLost {
                marker: batch_marker,
            })?;
        entry.heartbeat = Instant::now();
        Ok(())
    }

    async fn complete_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
    ) -> StoreResult<()> {
        self.finish_pass(
            StoreOperation::CompletePass,
            batch_marker,
            PassStatus::Completed,
            counts,
            None,
        )
    }

    async fn abort_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
        reason: &str,
    ) -> StoreResult<()> {
        self.finish_pass(
            StoreOperation::AbortPass,
            batch_marker,
            PassStatus::Aborted,
            counts,
            Some(reason),
        )
    }

    async fn lookup_open_version(
        &self,
        page_id: i64,
        as_of: BatchMarker,
    ) -> StoreResult<Option<RedirectVersion>> {
        let state = self.enter(StoreOperation::Lookup)?;
        let mut matching = state.versions.iter().filter(|version| {
            version.page_id == page_id
                && version.effective_from < as_of
                && version.effective_to.is_none_or(|to| to > as_of)
        });
        let found = matching.next().cloned();
        if matching.next().is_some() {
            return Err(StoreError::OverlappingVersions { page_id, as_of });
        }
        Ok(found)
    }

    async fn open_version(
        &self,
        page_id: i64,
        page_title: &str,
        target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion> {
        let mut state = self.enter(StoreOperation::OpenVersion)?;
        if state.open_index(page_id).is_some() {
            return Err(StoreError::DuplicateOpenVersion { page_id });
        }
        Ok(state.push_open(page_id, page_title, target, batch_marker))
    }

    async fn renew(&self, page_id: i64, batch_marker: BatchMarker) -> StoreResult<()> {
        let mut state = self.enter(StoreOperation::Renew)?;
        let index = state
            .open_index(page_id)
            .ok_or(StoreError::NoOpenVersion { page_id })?;
        state.versions[index].batch_marker = batch_marker;
        Ok(())
    }

    async fn close_and_replace(
        &self,
        page_id: i64,
        new_title: &str,
        new_target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion> {
        let mut state = self.enter(StoreOperation::CloseAndReplace)?;
        let index = state
            .open_index(page_id)
            .filter(|index| state.versions[*index].effective_from <= batch_marker)
            .ok_or(StoreError::NoOpenVersion { page_id })?;
        state.versions[index].effective_to = Some(batch_marker);
        Ok(state.push_open(page_id, new_title, new_target, batch_marker))
    }

    async fn sweep(&self, batch_marker: BatchMarker) -> StoreResult<u64> {
        let mut state = self.enter(StoreOperation::Sweep)?;
        let mut closed = 0;
        for version in state
            .versions
            .iter_mut()
            .filter(|version| version.is_open() && version.batch_marker < batch_marker)
        {
            version.effective_to = Some(batch_marker);
            closed += 1;
        }
        Ok(closed)
    }
}

#[derive(Default)]
struct SnapshotState {
    pages: HashMap<i64, Page>,
    redirects: Vec<RedirectCandidate>,
    fail_after: Option<usize>,
    pace: Option<Duration>,
}

/// A snapshot held in memory. It does no filter pushdown: every listed
/// redirect reaches the engine.
#[derive(Default)]
pub struct InMemorySnapshot {
    state: Mutex<SnapshotState>,
    lookups: AtomicU64,
}

impl InMemorySnapshot {
    pub fn add_page(&self, page_id: i64, namespace: i64, title: &str, is_redirect: bool) {
        self.lock().pages.insert(
            page_id,
            Page {
                id: page_id,
                namespace,
                title: title.to_string(),
                is_redirect,
            },
        );
    }

    /// Point `from_id` at `(namespace, title)`, replacing any earlier
    /// redirect out of the same page.
    pub fn set_redirect(&self, from_id: i64, namespace: i64, title: &str) {
        let mut state = self.lock();
        let candidate = RedirectCandidate::new(from_id, namespace, title);
        match state
            .redirects
            .iter_mut()
            .find(|existing| existing.from_id == from_id)
        {
            Some(existing) => *existing = candidate,
            None => state.redirects.push(candidate),
        }
    }

    /// Append a raw candidate, duplicates included.
    pub fn push_candidate(&self, candidate: RedirectCandidate) {
        self.lock().redirects.push(candidate);
    }

    pub fn remove_redirect(&self, from_id: i64) {
        self.lock()
            .redirects
            .retain(|candidate| candidate.from_id != from_id);
    }

    pub fn clear_redirects(&self) {
        self.lock().redirects.clear();
    }

    /// Make scans fail after yielding `count` candidates.
    pub fn fail_after(&self, count: usize) {
        self.lock().fail_after = Some(count);
    }

    /// Sleep for `delay` before yielding each item of a scan.
    pub fn pace(&self, delay: Duration) {
        self.lock().pace = Some(delay);
    }

    /// Number of page lookups served so far.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, SnapshotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotSource for InMemorySnapshot {
    fn candidates(
        &self,
        _filter: &InclusionFilter,
    ) -> BoxStream<'static, StoreResult<RedirectCandidate>> {
        let state = self.lock();
        let mut items: Vec<StoreResult<RedirectCandidate>> =
            state.redirects.iter().cloned().map(Ok).collect();
        if let Some(count) = state.fail_after {
            items.truncate(count);
            items.push(Err(StoreError::Corrupt(
                "injected snapshot read failure".to_string(),
            )));
        }
        match state.pace {
            Some(delay) => Box::pin(stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })),
            None => Box::pin(stream::iter(items)),
        }
    }
}

#[async_trait]
impl PageDirectory for InMemorySnapshot {
    async fn page_by_title(&self, namespace: i64, title: &str) -> StoreResult<Option<Page>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .lock()
            .pages
            .values()
            .find(|page| page.namespace == namespace && page.title == title)
            .cloned())
    }

    async fn page_by_id(&self, page_id: i64) -> StoreResult<Option<Page>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.lock().pages.get(&page_id).cloned())
    }
}
