use std::fmt;

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Identifier shared by every operation of one pass.
///
/// Markers are totally ordered; a later pass always carries a larger marker.
/// The default allocation is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchMarker(i64);

impl BatchMarker {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Interpret the marker as epoch milliseconds, when it was allocated that way.
    pub fn as_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for BatchMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A page row from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub id: i64,
    pub namespace: i64,
    pub title: String,
    pub is_redirect: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PageRow {
    pub(crate) page_id: i64,
    pub(crate) page_namespace: i64,
    pub(crate) page_title: String,
    pub(crate) page_is_redirect: i64,
}

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Self {
            id: row.page_id,
            namespace: row.page_namespace,
            title: row.page_title,
            is_redirect: row.page_is_redirect != 0,
        }
    }
}

/// One redirect observation from the current snapshot.
///
/// `from_title` is `None` when the snapshot listing does not carry the
/// source page title; the engine resolves it by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectCandidate {
    pub from_id: i64,
    pub from_title: Option<String>,
    pub target_namespace: i64,
    pub target_title: String,
}

impl RedirectCandidate {
    pub fn new(from_id: i64, target_namespace: i64, target_title: impl Into<String>) -> Self {
        Self {
            from_id,
            from_title: None,
            target_namespace,
            target_title: target_title.into(),
        }
    }

    pub fn with_from_title(mut self, from_title: impl Into<String>) -> Self {
        self.from_title = Some(from_title.into());
        self
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RedirectRow {
    pub(crate) rd_from: i64,
    pub(crate) rd_namespace: i64,
    pub(crate) rd_title: String,
    pub(crate) from_title: Option<String>,
}

impl From<RedirectRow> for RedirectCandidate {
    fn from(row: RedirectRow) -> Self {
        Self {
            from_id: row.rd_from,
            from_title: row.from_title,
            target_namespace: row.rd_namespace,
            target_title: row.rd_title,
        }
    }
}

/// The resolved page a redirect points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectTarget {
    pub page_id: i64,
    pub namespace: i64,
    pub title: String,
}

impl From<&Page> for RedirectTarget {
    fn from(page: &Page) -> Self {
        Self {
            page_id: page.id,
            namespace: page.namespace,
            title: page.title.clone(),
        }
    }
}

/// Which fields decide whether an incoming observation differs from the
/// current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// Compare target title and target namespace only. A renamed source page
    /// that still points at the same target is renewed.
    #[default]
    Target,
    /// Also treat a change of the source page title as a new version.
    TargetAndTitle,
}

impl ReplacePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReplacePolicy::Target => "target",
            ReplacePolicy::TargetAndTitle => "target_and_title",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "target" => Ok(Self::Target),
            "target_and_title" => Ok(Self::TargetAndTitle),
            _ => Err(anyhow::anyhow!("invalid replace policy: {value}")),
        }
    }
}

/// One persisted interval of a page's redirect history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectVersion {
    pub page_id: i64,
    pub page_title: String,
    pub target_title: String,
    pub target_namespace: i64,
    pub target_page_id: i64,
    pub effective_from: BatchMarker,
    pub effective_to: Option<BatchMarker>,
    /// Latest pass that confirmed this mapping in the snapshot.
    pub batch_marker: BatchMarker,
}

impl RedirectVersion {
    pub fn is_open(&self) -> bool {
        self.effective_to.is_none()
    }

    /// Whether the interval `[effective_from, effective_to)` contains `at`.
    pub fn contains(&self, at: BatchMarker) -> bool {
        self.effective_from <= at && self.effective_to.is_none_or(|to| to > at)
    }

    /// Field-by-field comparison against an incoming observation.
    pub fn matches(
        &self,
        page_title: &str,
        target: &RedirectTarget,
        policy: ReplacePolicy,
    ) -> bool {
        let same_target =
            self.target_title == target.title && self.target_namespace == target.namespace;
        match policy {
            ReplacePolicy::Target => same_target,
            ReplacePolicy::TargetAndTitle => same_target && self.page_title == page_title,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RedirectVersionRow {
    pub(crate) page_id: i64,
    pub(crate) page_title: String,
    pub(crate) target_title: String,
    pub(crate) target_namespace: i64,
    pub(crate) target_page_id: i64,
    pub(crate) effective_from: i64,
    pub(crate) effective_to: Option<i64>,
    pub(crate) batch_marker: i64,
}

impl From<RedirectVersionRow> for RedirectVersion {
    fn from(row: RedirectVersionRow) -> Self {
        Self {
            page_id: row.page_id,
            page_title: row.page_title,
            target_title: row.target_title,
            target_namespace: row.target_namespace,
            target_page_id: row.target_page_id,
            effective_from: BatchMarker::new(row.effective_from),
            effective_to: row.effective_to.map(BatchMarker::new),
            batch_marker: BatchMarker::new(row.batch_marker),
        }
    }
}
