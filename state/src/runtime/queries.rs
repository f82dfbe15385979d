use super::*;
use crate::HistoryViolation;
use crate::PassStatus;
use crate::find_history_violations;
use anyhow::Context;

impl HistoryRuntime {
    /// All versions of `page_id`, oldest first.
    pub async fn history_for_page(&self, page_id: i64) -> anyhow::Result<Vec<RedirectVersion>> {
        let sql = format!(
            r#"
SELECT {VERSION_COLUMNS}
FROM redirect_versions
WHERE page_id = ?
ORDER BY effective_from ASC, id ASC
            "#
        );
        let rows = sqlx::query_as::<_, RedirectVersionRow>(sql.as_str())
            .bind(page_id)
            .fetch_all(self.pool.as_ref())
            .await
            .with_context(|| format!("failed to load history for page {page_id}"))?;
        Ok(rows.into_iter().map(RedirectVersion::from).collect())
    }

    /// Point-in-time reconstruction: every version whose `[effective_from,
    /// effective_to)` interval contains `as_of`, ordered by page id.
    pub async fn versions_as_of(&self, as_of: BatchMarker) -> anyhow::Result<Vec<RedirectVersion>> {
        let sql = format!(
            r#"
SELECT {VERSION_COLUMNS}
FROM redirect_versions
WHERE effective_from <= ?
  AND (effective_to IS NULL OR effective_to > ?)
ORDER BY page_id ASC, effective_from ASC
            "#
        );
        let rows = sqlx::query_as::<_, RedirectVersionRow>(sql.as_str())
            .bind(as_of.get())
            .bind(as_of.get())
            .fetch_all(self.pool.as_ref())
            .await
            .with_context(|| format!("failed to reconstruct redirects as of {as_of}"))?;
        Ok(rows.into_iter().map(RedirectVersion::from).collect())
    }

    /// Every persisted version in creation order.
    pub async fn all_versions(&self) -> anyhow::Result<Vec<RedirectVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM redirect_versions ORDER BY id ASC");
        let rows = sqlx::query_as::<_, RedirectVersionRow>(sql.as_str())
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.into_iter().map(RedirectVersion::from).collect())
    }

    pub async fn count_open_versions(&self) -> anyhow::Result<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM redirect_versions WHERE effective_to IS NULL")
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count)
    }

    /// Open versions confirmed by the latest completed pass, together with
    /// that pass's marker. `None` before any pass has completed.
    pub async fn count_confirmed_in_latest_pass(
        &self,
    ) -> anyhow::Result<Option<(BatchMarker, i64)>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(batch_marker) FROM passes WHERE status = ?")
                .bind(PassStatus::Completed.as_str())
                .fetch_one(self.pool.as_ref())
                .await?;
        let Some(latest) = latest else {
            return Ok(None);
        };
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*)
FROM redirect_versions
WHERE effective_to IS NULL AND batch_marker = ?
            "#,
        )
        .bind(latest)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(Some((BatchMarker::new(latest), count)))
    }

    /// Scan the whole history for broken per-page invariants.
    pub async fn verify_history(&self) -> anyhow::Result<Vec<HistoryViolation>> {
        let versions = self.all_versions().await?;
        Ok(find_history_violations(&versions))
    }
}
