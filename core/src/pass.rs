use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::instrument;
use tracing::warn;
use wikihist_state::BatchMarker;
use wikihist_state::InclusionFilter;
use wikihist_state::PassCounts;
use wikihist_state::ReplacePolicy;
use wikihist_state::StoreError;

use crate::engine::ReconciliationEngine;
use crate::error::ReconcileError;
use crate::error::Result;
use crate::resolver::DEFAULT_CACHE_CAPACITY;
use crate::resolver::ResolverStats;
use crate::resolver::TargetResolver;
use crate::store::PageDirectory;
use crate::store::SnapshotSource;
use crate::store::TemporalStore;
use crate::util::RetryPolicy;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(3600);

/// Knobs for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOptions {
    pub filter: InclusionFilter,
    pub replace_policy: ReplacePolicy,
    pub cache_capacity: NonZeroUsize,
    pub retry: RetryPolicy,
    /// How long a running pass blocks others after its last heartbeat.
    /// Heartbeats are sent every third of this while candidates stream in.
    pub lease: Duration,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            filter: InclusionFilter::default(),
            replace_policy: ReplacePolicy::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            retry: RetryPolicy::default(),
            lease: DEFAULT_LEASE,
        }
    }
}

/// Result of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub batch_marker: BatchMarker,
    pub counts: PassCounts,
    pub resolver: ResolverStats,
    pub elapsed: Duration,
}

/// Drives one pass end to end: claim the marker, stream every candidate
/// through a fresh [`ReconciliationEngine`], sweep, and record the outcome.
///
/// A pass that fails or is cancelled before the sweep is recorded as
/// aborted and leaves unconfirmed versions open. So is a pass that finds its
/// lease taken over; it never sweeps.
pub struct PassController {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn TemporalStore>,
    directory: Arc<dyn PageDirectory>,
    options: PassOptions,
}

impl PassController {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn TemporalStore>,
        directory: Arc<dyn PageDirectory>,
        options: PassOptions,
    ) -> Self {
        Self {
            source,
            store,
            directory,
            options,
        }
    }

    pub fn options(&self) -> &PassOptions {
        &self.options
    }

    /// Run one pass. Without an explicit marker the current time in epoch
    /// milliseconds is used.
    pub async fn run(&self, batch_marker: Option<BatchMarker>) -> Result<PassSummary> {
        self.run_with_cancel(batch_marker, &CancellationToken::new())
            .await
    }

    #[instrument(level = "info", skip_all, fields(batch_marker = tracing::field::Empty))]
    pub async fn run_with_cancel(
        &self,
        batch_marker: Option<BatchMarker>,
        cancel: &CancellationToken,
    ) -> Result<PassSummary> {
        let batch_marker = batch_marker.unwrap_or_else(BatchMarker::now);
        tracing::Span::current().record("batch_marker", batch_marker.get());
        let started = Instant::now();
        let store = self.store.as_ref();
        let retry = self.options.retry;

        retry.run("ensure_schema", || store.ensure_schema()).await?;
        retry
            .run("begin_pass", || store.begin_pass(batch_marker, self.options.lease))
            .await
            .map_err(|err| match err {
                ReconcileError::Store {
                    source:
                        source @ (StoreError::NonMonotonicBatchMarker { .. }
                        | StoreError::PassInProgress { .. }),
                    ..
                } => ReconcileError::PassRejected {
                    marker: batch_marker,
                    source,
                },
                other => other,
            })?;
        info!(
            replace_policy = self.options.replace_policy.as_str(),
            "pass started"
        );

        let resolver = TargetResolver::new(
            Arc::clone(&self.directory),
            self.options.cache_capacity,
            retry,
        );
        let mut engine = ReconciliationEngine::new(
            Arc::clone(&self.store),
            resolver,
            batch_marker,
            self.options.filter.clone(),
            self.options.replace_policy,
            retry,
        );

        let outcome = match self.drain(&mut engine, cancel).await {
            Ok(()) => match self.heartbeat(batch_marker).await {
                Ok(()) => engine.sweep().await,
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };
        let counts = engine.counts();
        if let Err(err) = outcome {
            warn!(error = %err, candidates = counts.candidates, "aborting pass");
            let reason = err.to_string();
            if let Err(abort_err) = retry
                .run("abort_pass", || store.abort_pass(batch_marker, &counts, &reason))
                .await
            {
                warn!(error = %abort_err, "failed to record aborted pass");
            }
            return Err(err);
        }

        self.heartbeat(batch_marker).await?;
        retry
            .run("complete_pass", || store.complete_pass(batch_marker, &counts))
            .await?;
        let summary = PassSummary {
            batch_marker,
            counts,
            resolver: engine.resolver_stats(),
            elapsed: started.elapsed(),
        };
        info!(
            candidates = counts.candidates,
            created = counts.created,
            renewed = counts.renewed,
            replaced = counts.replaced,
            expired = counts.expired,
            dropped = counts.dropped(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pass completed"
        );
        Ok(summary)
    }

    async fn drain(
        &self,
        engine: &mut ReconciliationEngine,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let heartbeat_every = self.options.lease / 3;
        let mut last_heartbeat = Instant::now();
        let mut candidates = self.source.candidates(&self.options.filter);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReconcileError::Cancelled {
                        marker: engine.batch_marker(),
                    });
                }
                next = candidates.next() => next,
            };
            let Some(candidate) = next else {
                return Ok(());
            };
            let candidate = candidate.map_err(ReconcileError::Snapshot)?;
            if last_heartbeat.elapsed() >= heartbeat_every {
                self.heartbeat(engine.batch_marker()).await?;
                last_heartbeat = Instant::now();
            }
            engine.process(candidate).await?;
        }
    }

    async fn heartbeat(&self, batch_marker: BatchMarker) -> Result<()> {
        let store = self.store.as_ref();
        self.options
            .retry
            .run("renew_lease", || store.renew_lease(batch_marker, self.options.lease))
            .await
            .map_err(|err| match err {
                ReconcileError::Store {
                    source: StoreError::LeaseLost { marker },
                    ..
                } => ReconcileError::LeaseLost { marker },
                other => other,
            })
    }
}
