use thiserror::Error;

use crate::BatchMarker;

/// SQLite primary result codes that clear up on their own.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures of temporal store, pass ledger, and snapshot operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("page {page_id} already has an open redirect version")]
    DuplicateOpenVersion { page_id: i64 },
    #[error("page {page_id} has no open redirect version")]
    NoOpenVersion { page_id: i64 },
    #[error("page {page_id} has overlapping versions at {as_of}")]
    OverlappingVersions { page_id: i64, as_of: BatchMarker },
    #[error("batch marker {marker} is not newer than recorded pass {latest}")]
    NonMonotonicBatchMarker {
        marker: BatchMarker,
        latest: BatchMarker,
    },
    #[error("pass {running} is still running")]
    PassInProgress { running: BatchMarker },
    #[error("no running pass with batch marker {marker}")]
    UnknownPass { marker: BatchMarker },
    #[error("pass {marker} no longer holds the writer lease")]
    LeaseLost { marker: BatchMarker },
    #[error("database busy: {0}")]
    Busy(#[source] sqlx::Error),
    #[error(transparent)]
    Database(sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// The error a pool reports when no connection frees up within its
    /// acquire timeout.
    pub fn busy() -> Self {
        StoreError::Busy(sqlx::Error::PoolTimedOut)
    }

    /// Whether retrying the same operation may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }

    /// Whether the error means the persisted history breaks its invariants
    /// (or the caller's view of it is stale).
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateOpenVersion { .. }
                | StoreError::NoOpenVersion { .. }
                | StoreError::OverlappingVersions { .. }
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            StoreError::Busy(err)
        } else {
            StoreError::Database(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Extended result codes keep the primary code in the low byte.
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}
