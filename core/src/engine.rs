use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use tracing::warn;
use wikihist_state::BatchMarker;
use wikihist_state::InclusionFilter;
use wikihist_state::PassCounts;
use wikihist_state::RedirectCandidate;
use wikihist_state::RedirectTarget;
use wikihist_state::RedirectVersion;
use wikihist_state::ReplacePolicy;

use crate::error::ReconcileError;
use crate::error::Result;
use crate::resolver::ResolverStats;
use crate::resolver::TargetResolver;
use crate::store::TemporalStore;
use crate::util::RetryPolicy;

/// Mutation applied for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Renew,
    Replace,
}

/// Why a candidate produced no mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Invalid,
    Filtered,
    /// The page was already reconciled earlier in this pass.
    Duplicate,
    TargetMissing,
    TargetIsRedirect,
    IdentityMissing,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::Invalid => "invalid",
            DropReason::Filtered => "filtered",
            DropReason::Duplicate => "duplicate",
            DropReason::TargetMissing => "target_missing",
            DropReason::TargetIsRedirect => "target_is_redirect",
            DropReason::IdentityMissing => "identity_missing",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied(Action),
    Dropped(DropReason),
}

/// Per-pass reconciliation of snapshot candidates against the history.
///
/// One engine serves exactly one pass: it owns the pass's batch marker,
/// the pass-scoped resolver cache, and the pass counters.
pub struct ReconciliationEngine {
    store: Arc<dyn TemporalStore>,
    resolver: TargetResolver,
    batch_marker: BatchMarker,
    filter: InclusionFilter,
    replace_policy: ReplacePolicy,
    retry: RetryPolicy,
    reconciled: HashSet<i64>,
    counts: PassCounts,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn TemporalStore>,
        resolver: TargetResolver,
        batch_marker: BatchMarker,
        filter: InclusionFilter,
        replace_policy: ReplacePolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            batch_marker,
            filter,
            replace_policy,
            retry,
            reconciled: HashSet::new(),
            counts: PassCounts::default(),
        }
    }

    pub fn batch_marker(&self) -> BatchMarker {
        self.batch_marker
    }

    pub fn counts(&self) -> PassCounts {
        self.counts
    }

    pub fn resolver_stats(&self) -> ResolverStats {
        self.resolver.stats()
    }

    /// Reconcile one candidate: CREATE, RENEW, REPLACE, or drop it.
    pub async fn process(&mut self, candidate: RedirectCandidate) -> Result<Outcome> {
        self.counts.candidates += 1;
        let outcome = self.reconcile(&candidate).await?;
        match outcome {
            Outcome::Applied(Action::Create) => self.counts.created += 1,
            Outcome::Applied(Action::Renew) => self.counts.renewed += 1,
            Outcome::Applied(Action::Replace) => self.counts.replaced += 1,
            Outcome::Dropped(reason) => {
                self.count_drop(reason);
                debug!(
                    page_id = candidate.from_id,
                    target = %candidate.target_title,
                    %reason,
                    "dropped redirect candidate"
                );
            }
        }
        if let Outcome::Applied(action) = outcome {
            self.reconciled.insert(candidate.from_id);
            debug!(page_id = candidate.from_id, ?action, "reconciled redirect");
        }
        Ok(outcome)
    }

    /// Close every open version this pass did not confirm. Call once, after
    /// the last candidate.
    pub async fn sweep(&mut self) -> Result<u64> {
        let store = self.store.as_ref();
        let batch_marker = self.batch_marker;
        let expired = self
            .retry
            .run("sweep", || store.sweep(batch_marker))
            .await?;
        self.counts.expired = expired;
        Ok(expired)
    }

    async fn reconcile(&mut self, candidate: &RedirectCandidate) -> Result<Outcome> {
        if candidate.from_id <= 0 || candidate.target_title.is_empty() {
            return Ok(Outcome::Dropped(DropReason::Invalid));
        }
        if !self.filter.allows(candidate) {
            return Ok(Outcome::Dropped(DropReason::Filtered));
        }
        if self.reconciled.contains(&candidate.from_id) {
            warn!(
                page_id = candidate.from_id,
                "page listed more than once in snapshot; keeping first observation"
            );
            return Ok(Outcome::Dropped(DropReason::Duplicate));
        }

        let Some(target_page) = self
            .resolver
            .resolve(candidate.target_namespace, &candidate.target_title)
            .await?
        else {
            return Ok(Outcome::Dropped(DropReason::TargetMissing));
        };
        if target_page.is_redirect {
            return Ok(Outcome::Dropped(DropReason::TargetIsRedirect));
        }
        let target = RedirectTarget::from(&target_page);

        let page_title = match &candidate.from_title {
            Some(title) if !title.is_empty() => title.clone(),
            _ => match self.resolver.resolve_by_id(candidate.from_id).await? {
                Some(page) => page.title,
                None => return Ok(Outcome::Dropped(DropReason::IdentityMissing)),
            },
        };

        let store = self.store.as_ref();
        let page_id = candidate.from_id;
        let batch_marker = self.batch_marker;
        let current = self
            .retry
            .run("lookup_open_version", || {
                store.lookup_open_version(page_id, batch_marker)
            })
            .await?;

        let action = match current {
            None => {
                self.retry
                    .run("open_version", || {
                        store.open_version(page_id, &page_title, &target, batch_marker)
                    })
                    .await?;
                Action::Create
            }
            Some(RedirectVersion {
                effective_to: Some(closed_at),
                ..
            }) => {
                return Err(ReconcileError::InvariantViolation {
                    operation: "lookup_open_version",
                    detail: format!(
                        "page {page_id}: lookup at {batch_marker} returned a version closed at {closed_at}"
                    ),
                });
            }
            Some(version) if version.matches(&page_title, &target, self.replace_policy) => {
                self.retry
                    .run("renew", || store.renew(page_id, batch_marker))
                    .await?;
                Action::Renew
            }
            Some(_) => {
                self.retry
                    .run("close_and_replace", || {
                        store.close_and_replace(page_id, &page_title, &target, batch_marker)
                    })
                    .await?;
                Action::Replace
            }
        };
        Ok(Outcome::Applied(action))
    }

    fn count_drop(&mut self, reason: DropReason) {
        let counter = match reason {
            DropReason::Invalid => &mut self.counts.invalid,
            DropReason::Filtered => &mut self.counts.filtered,
            DropReason::Duplicate => &mut self.counts.duplicates,
            DropReason::TargetMissing => &mut self.counts.target_missing,
            DropReason::TargetIsRedirect => &mut self.counts.target_is_redirect,
            DropReason::IdentityMissing => &mut self.counts.identity_missing,
        };
        *counter += 1;
    }
}
