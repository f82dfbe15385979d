use thiserror::Error;
use wikihist_state::BatchMarker;
use wikihist_state::StoreError;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Reasons a pass stops before completing.
///
/// Candidates that cannot be resolved are not errors; they are dropped and
/// counted in the pass summary.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("history invariant violated during {operation}: {detail}")]
    InvariantViolation {
        operation: &'static str,
        detail: String,
    },
    #[error("{operation} still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u64,
        #[source]
        source: StoreError,
    },
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("snapshot read failed: {0}")]
    Snapshot(#[source] StoreError),
    #[error("pass {marker} refused to start: {source}")]
    PassRejected {
        marker: BatchMarker,
        #[source]
        source: StoreError,
    },
    #[error("pass {marker} was cancelled")]
    Cancelled { marker: BatchMarker },
    #[error("pass {marker} lost its writer lease to a newer pass")]
    LeaseLost { marker: BatchMarker },
}

impl ReconcileError {
    /// Classify a non-transient store failure of `operation`.
    pub(crate) fn from_store(operation: &'static str, source: StoreError) -> Self {
        if source.is_invariant_violation() {
            ReconcileError::InvariantViolation {
                operation,
                detail: source.to_string(),
            }
        } else {
            ReconcileError::Store { operation, source }
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ReconcileError::InvariantViolation { .. })
    }
}
