use super::*;
use crate::PassCounts;
use crate::PassRecord;
use crate::PassStatus;
use crate::model::PassRow;
use crate::model::to_sql_count;
use chrono::Utc;
use tracing::warn;

const PASS_COLUMNS: &str = r#"
    batch_marker,
    status,
    started_at,
    finished_at,
    candidates,
    created,
    renewed,
    replaced,
    expired,
    filtered,
    invalid,
    target_missing,
    target_is_redirect,
    identity_missing,
    duplicates,
    abort_reason
"#;

fn lease_cutoff_ms(now_ms: i64, lease: Duration) -> i64 {
    now_ms.saturating_sub(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX))
}

impl HistoryRuntime {
    /// Register a new running pass.
    ///
    /// Refuses markers that are not strictly newer than every marker already
    /// recorded (in the ledger or in the history itself), and refuses to start
    /// while another pass holds a fresh lease. A lease is fresh while its last
    /// heartbeat is younger than `lease`. Running passes whose lease has
    /// expired are marked aborted.
    pub async fn begin_pass(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let lease_cutoff = lease_cutoff_ms(now_ms, lease);

        let mut tx = self.pool.begin().await?;
        let latest: Option<i64> = sqlx::query_scalar(
            r#"
SELECT MAX(marker) FROM (
    SELECT MAX(batch_marker) AS marker FROM passes
    UNION ALL
    SELECT MAX(batch_marker) AS marker FROM redirect_versions
    UNION ALL
    SELECT MAX(effective_to) AS marker FROM redirect_versions
)
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;
        if let Some(latest) = latest
            && batch_marker.get() <= latest
        {
            return Err(StoreError::NonMonotonicBatchMarker {
                marker: batch_marker,
                latest: BatchMarker::new(latest),
            });
        }

        let running: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT batch_marker, heartbeat_at FROM passes WHERE status = ? ORDER BY batch_marker",
        )
        .bind(PassStatus::Running.as_str())
        .fetch_all(&mut *tx)
        .await?;
        for (running_marker, heartbeat_at) in running {
            if heartbeat_at > lease_cutoff {
                return Err(StoreError::PassInProgress {
                    running: BatchMarker::new(running_marker),
                });
            }
            warn!(
                running_marker,
                heartbeat_at, "abandoning running pass whose lease expired"
            );
            sqlx::query(
                r#"
UPDATE passes
SET status = ?, finished_at = ?, abort_reason = ?
WHERE batch_marker = ?
                "#,
            )
            .bind(PassStatus::Aborted.as_str())
            .bind(now.timestamp())
            .bind("lease expired")
            .bind(running_marker)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO passes (batch_marker, status, started_at, heartbeat_at) VALUES (?, ?, ?, ?)",
        )
        .bind(batch_marker.get())
        .bind(PassStatus::Running.as_str())
        .bind(now.timestamp())
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Extend the lease of a running pass.
    ///
    /// Fails with [`StoreError::LeaseLost`] when the pass is no longer running
    /// (another pass took it over) or when its last heartbeat is already older
    /// than `lease`, in which case a competing pass is entitled to take over at
    /// any moment.
    pub async fn renew_lease(&self, batch_marker: BatchMarker, lease: Duration) -> StoreResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
UPDATE passes
SET heartbeat_at = ?
WHERE batch_marker = ? AND status = ? AND heartbeat_at > ?
            "#,
        )
        .bind(now_ms)
        .bind(batch_marker.get())
        .bind(PassStatus::Running.as_str())
        .bind(lease_cutoff_ms(now_ms, lease))
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseLost {
                marker: batch_marker,
            });
        }
        Ok(())
    }

    /// Mark a running pass as completed and persist its counters.
    pub async fn complete_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
    ) -> StoreResult<()> {
        self.finish_pass(batch_marker, PassStatus::Completed, counts, None)
            .await
    }

    /// Mark a running pass as aborted. Its partial counters are kept for
    /// diagnosis; the sweep never ran for it.
    pub async fn abort_pass(
        &self,
        batch_marker: BatchMarker,
        counts: &PassCounts,
        reason: &str,
    ) -> StoreResult<()> {
        self.finish_pass(batch_marker, PassStatus::Aborted, counts, Some(reason))
            .await
    }

    pub async fn get_pass(&self, batch_marker: BatchMarker) -> anyhow::Result<Option<PassRecord>> {
        let sql = format!("SELECT {PASS_COLUMNS} FROM passes WHERE batch_marker = ?");
        let row = sqlx::query_as::<_, PassRow>(sql.as_str())
            .bind(batch_marker.get())
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(PassRecord::try_from).transpose()
    }

    pub async fn latest_completed_pass(&self) -> anyhow::Result<Option<PassRecord>> {
        let sql = format!(
            "SELECT {PASS_COLUMNS} FROM passes WHERE status = ? ORDER BY batch_marker DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PassRow>(sql.as_str())
            .bind(PassStatus::Completed.as_str())
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(PassRecord::try_from).transpose()
    }

    /// Most recent passes first.
    pub async fn list_passes(&self, limit: usize) -> anyhow::Result<Vec<PassRecord>> {
        let sql = format!("SELECT {PASS_COLUMNS} FROM passes ORDER BY batch_marker DESC LIMIT ?");
        let rows = sqlx::query_as::<_, PassRow>(sql.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.into_iter().map(PassRecord::try_from).collect()
    }

    async fn finish_pass(
        &self,
        batch_marker: BatchMarker,
        status: PassStatus,
        counts: &PassCounts,
        abort_reason: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
UPDATE passes
SET
    status = ?,
    finished_at = ?,
    candidates = ?,
    created = ?,
    renewed = ?,
    replaced = ?,
    expired = ?,
    filtered = ?,
    invalid = ?,
    target_missing = ?,
    target_is_redirect = ?,
    identity_missing = ?,
    duplicates = ?,
    abort_reason = ?
WHERE batch_marker = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(to_sql_count(counts.candidates))
        .bind(to_sql_count(counts.created))
        .bind(to_sql_count(counts.renewed))
        .bind(to_sql_count(counts.replaced))
        .bind(to_sql_count(counts.expired))
        .bind(to_sql_count(counts.filtered))
        .bind(to_sql_count(counts.invalid))
        .bind(to_sql_count(counts.target_missing))
        .bind(to_sql_count(counts.target_is_redirect))
        .bind(to_sql_count(counts.identity_missing))
        .bind(to_sql_count(counts.duplicates))
        .bind(abort_reason)
        .bind(batch_marker.get())
        .bind(PassStatus::Running.as_str())
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownPass {
                marker: batch_marker,
            });
        }
        Ok(())
    }
}
