use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::BatchMarker;
use super::RedirectVersion;

/// A broken history invariant for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryViolation {
    /// More than one version without `effective_to`.
    MultipleOpen { page_id: i64, open: usize },
    /// A version that precedes another in creation order is still open, or its
    /// interval reaches past the start of the next one.
    Overlap {
        page_id: i64,
        earlier_from: BatchMarker,
        earlier_to: Option<BatchMarker>,
        later_from: BatchMarker,
    },
    /// `effective_from` went backwards in creation order.
    OutOfOrder {
        page_id: i64,
        earlier_from: BatchMarker,
        later_from: BatchMarker,
    },
    /// `effective_to` precedes `effective_from`.
    InvertedInterval {
        page_id: i64,
        effective_from: BatchMarker,
        effective_to: BatchMarker,
    },
}

impl fmt::Display for HistoryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryViolation::MultipleOpen { page_id, open } => {
                write!(f, "page {page_id} has {open} open versions")
            }
            HistoryViolation::Overlap {
                page_id,
                earlier_from,
                earlier_to,
                later_from,
            } => match earlier_to {
                Some(to) => write!(
                    f,
                    "page {page_id}: [{earlier_from}, {to}) overlaps version starting at {later_from}"
                ),
                None => write!(
                    f,
                    "page {page_id}: open version from {earlier_from} precedes version starting at {later_from}"
                ),
            },
            HistoryViolation::OutOfOrder {
                page_id,
                earlier_from,
                later_from,
            } => write!(
                f,
                "page {page_id}: version starting at {later_from} was created after one starting at {earlier_from}"
            ),
            HistoryViolation::InvertedInterval {
                page_id,
                effective_from,
                effective_to,
            } => write!(
                f,
                "page {page_id}: interval [{effective_from}, {effective_to}) is inverted"
            ),
        }
    }
}

/// Check the per-page history invariants.
///
/// `versions` must be in creation order; pages may be interleaved.
pub fn find_history_violations(versions: &[RedirectVersion]) -> Vec<HistoryViolation> {
    let mut by_page: BTreeMap<i64, Vec<&RedirectVersion>> = BTreeMap::new();
    for version in versions {
        by_page.entry(version.page_id).or_default().push(version);
    }

    let mut violations = Vec::new();
    for (page_id, history) in by_page {
        let open = history.iter().filter(|version| version.is_open()).count();
        if open > 1 {
            violations.push(HistoryViolation::MultipleOpen { page_id, open });
        }
        for version in &history {
            if let Some(effective_to) = version.effective_to
                && effective_to < version.effective_from
            {
                violations.push(HistoryViolation::InvertedInterval {
                    page_id,
                    effective_from: version.effective_from,
                    effective_to,
                });
            }
        }
        for pair in history.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            if later.effective_from < earlier.effective_from {
                violations.push(HistoryViolation::OutOfOrder {
                    page_id,
                    earlier_from: earlier.effective_from,
                    later_from: later.effective_from,
                });
            }
            if earlier
                .effective_to
                .is_none_or(|to| to > later.effective_from)
            {
                violations.push(HistoryViolation::Overlap {
                    page_id,
                    earlier_from: earlier.effective_from,
                    earlier_to: earlier.effective_to,
                    later_from: later.effective_from,
                });
            }
        }
    }
    violations
}
