use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use super::BatchMarker;

/// Lifecycle status of a recorded pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Running,
    Completed,
    Aborted,
}

impl PassStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PassStatus::Running => "running",
            PassStatus::Completed => "completed",
            PassStatus::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(anyhow::anyhow!("invalid pass status: {value}")),
        }
    }
}

/// Per-pass action and drop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PassCounts {
    /// Candidates read from the snapshot.
    pub candidates: u64,
    pub created: u64,
    pub renewed: u64,
    pub replaced: u64,
    /// Open versions closed by the sweep.
    pub expired: u64,
    /// Rejected by the inclusion filter.
    pub filtered: u64,
    /// Malformed candidates (non-positive id, empty target title).
    pub invalid: u64,
    pub target_missing: u64,
    pub target_is_redirect: u64,
    pub identity_missing: u64,
    /// Later observations of a page that was already reconciled this pass.
    pub duplicates: u64,
}

impl PassCounts {
    pub fn dropped(&self) -> u64 {
        self.filtered
            + self.invalid
            + self.target_missing
            + self.target_is_redirect
            + self.identity_missing
            + self.duplicates
    }

    pub fn applied(&self) -> u64 {
        self.created + self.renewed + self.replaced
    }
}

/// One row of the pass ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassRecord {
    pub batch_marker: BatchMarker,
    pub status: PassStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: PassCounts,
    pub abort_reason: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PassRow {
    pub(crate) batch_marker: i64,
    pub(crate) status: String,
    pub(crate) started_at: i64,
    pub(crate) finished_at: Option<i64>,
    pub(crate) candidates: i64,
    pub(crate) created: i64,
    pub(crate) renewed: i64,
    pub(crate) replaced: i64,
    pub(crate) expired: i64,
    pub(crate) filtered: i64,
    pub(crate) invalid: i64,
    pub(crate) target_missing: i64,
    pub(crate) target_is_redirect: i64,
    pub(crate) identity_missing: i64,
    pub(crate) duplicates: i64,
    pub(crate) abort_reason: Option<String>,
}

impl TryFrom<PassRow> for PassRecord {
    type Error = anyhow::Error;

    fn try_from(row: PassRow) -> Result<Self, Self::Error> {
        Ok(Self {
            batch_marker: BatchMarker::new(row.batch_marker),
            status: PassStatus::parse(row.status.as_str())?,
            started_at: epoch_seconds_to_datetime(row.started_at)?,
            finished_at: row
                .finished_at
                .map(epoch_seconds_to_datetime)
                .transpose()?,
            counts: PassCounts {
                candidates: count(row.candidates)?,
                created: count(row.created)?,
                renewed: count(row.renewed)?,
                replaced: count(row.replaced)?,
                expired: count(row.expired)?,
                filtered: count(row.filtered)?,
                invalid: count(row.invalid)?,
                target_missing: count(row.target_missing)?,
                target_is_redirect: count(row.target_is_redirect)?,
                identity_missing: count(row.identity_missing)?,
                duplicates: count(row.duplicates)?,
            },
            abort_reason: row.abort_reason,
        })
    }
}

pub(crate) fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("negative counter in pass ledger: {value}"))
}

fn epoch_seconds_to_datetime(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid unix timestamp: {secs}"))
}
