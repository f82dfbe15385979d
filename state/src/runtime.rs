use crate::BatchMarker;
use crate::RedirectTarget;
use crate::RedirectVersion;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::error::is_unique_violation;
use crate::migrations::MIGRATOR;
use crate::model::RedirectVersionRow;
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

mod passes;
mod queries;
#[cfg(test)]
mod test_support;

pub const HISTORY_DB_FILENAME: &str = "history.sqlite";

const VERSION_COLUMNS: &str = r#"
    page_id,
    page_title,
    target_title,
    target_namespace,
    target_page_id,
    effective_from,
    effective_to,
    batch_marker
"#;

/// Connection settings for the history database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryOptions {
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 4,
        }
    }
}

/// SQLite-backed temporal store for redirect history.
///
/// This is the write session of a pass: every mutation goes through this
/// pool, never through the snapshot reader's connections.
#[derive(Clone)]
pub struct HistoryRuntime {
    db_path: PathBuf,
    pool: Arc<SqlitePool>,
}

impl HistoryRuntime {
    /// Open (creating and migrating as needed) the history database at `db_path`.
    pub async fn init(db_path: PathBuf, options: HistoryOptions) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = open_sqlite(&db_path, options).await?;
        Ok(Arc::new(Self {
            db_path,
            pool: Arc::new(pool),
        }))
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Apply any pending schema migrations. Safe to call repeatedly.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        MIGRATOR.run(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Return the version of `page_id` whose interval contains `as_of`.
    ///
    /// The start bound is exclusive: a version opened at `as_of` is not
    /// returned, so lookups at the current pass's marker only see history
    /// written by earlier passes.
    pub async fn lookup_open_version(
        &self,
        page_id: i64,
        as_of: BatchMarker,
    ) -> StoreResult<Option<RedirectVersion>> {
        let sql = format!(
            r#"
SELECT {VERSION_COLUMNS}
FROM redirect_versions
WHERE page_id = ?
  AND effective_from < ?
  AND (effective_to IS NULL OR effective_to > ?)
ORDER BY effective_from DESC
LIMIT 2
            "#
        );
        let mut rows = sqlx::query_as::<_, RedirectVersionRow>(sql.as_str())
            .bind(page_id)
            .bind(as_of.get())
            .bind(as_of.get())
            .fetch_all(self.pool.as_ref())
            .await?;
        if rows.len() > 1 {
            return Err(StoreError::OverlappingVersions { page_id, as_of });
        }
        Ok(rows.pop().map(RedirectVersion::from))
    }

    /// Insert a new open version starting at `batch_marker`.
    pub async fn open_version(
        &self,
        page_id: i64,
        page_title: &str,
        target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM redirect_versions WHERE page_id = ? AND effective_to IS NULL",
        )
        .bind(page_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(StoreError::DuplicateOpenVersion { page_id });
        }
        insert_open_version(&mut tx, page_id, page_title, target, batch_marker).await?;
        tx.commit().await?;
        debug!(page_id, %batch_marker, target = %target.title, "opened redirect version");
        Ok(open_version_value(page_id, page_title, target, batch_marker))
    }

    /// Record that the open version of `page_id` was confirmed by `batch_marker`.
    pub async fn renew(&self, page_id: i64, batch_marker: BatchMarker) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
UPDATE redirect_versions
SET batch_marker = ?
WHERE page_id = ? AND effective_to IS NULL
            "#,
        )
        .bind(batch_marker.get())
        .bind(page_id)
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NoOpenVersion { page_id });
        }
        Ok(())
    }

    /// Close the open version of `page_id` at `batch_marker` and open its
    /// replacement in the same transaction.
    pub async fn close_and_replace(
        &self,
        page_id: i64,
        new_title: &str,
        new_target: &RedirectTarget,
        batch_marker: BatchMarker,
    ) -> StoreResult<RedirectVersion> {
        let mut tx = self.pool.begin().await?;
        let closed = sqlx::query(
            r#"
UPDATE redirect_versions
SET effective_to = ?
WHERE page_id = ?
  AND effective_to IS NULL
  AND effective_from <= ?
            "#,
        )
        .bind(batch_marker.get())
        .bind(page_id)
        .bind(batch_marker.get())
        .execute(&mut *tx)
        .await?;
        if closed.rows_affected() != 1 {
            // Dropping `tx` rolls back.
            return Err(StoreError::NoOpenVersion { page_id });
        }
        insert_open_version(&mut tx, page_id, new_title, new_target, batch_marker).await?;
        tx.commit().await?;
        debug!(page_id, %batch_marker, target = %new_target.title, "replaced redirect version");
        Ok(open_version_value(
            page_id,
            new_title,
            new_target,
            batch_marker,
        ))
    }

    /// Close every open version not confirmed by `batch_marker`.
    ///
    /// Returns the number of versions closed.
    pub async fn sweep(&self, batch_marker: BatchMarker) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
UPDATE redirect_versions
SET effective_to = ?
WHERE effective_to IS NULL
  AND batch_marker < ?
            "#,
        )
        .bind(batch_marker.get())
        .bind(batch_marker.get())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_open_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    page_id: i64,
    page_title: &str,
    target: &RedirectTarget,
    batch_marker: BatchMarker,
) -> StoreResult<()> {
    sqlx::query(
        r#"
INSERT INTO redirect_versions (
    page_id,
    page_title,
    target_title,
    target_namespace,
    target_page_id,
    effective_from,
    effective_to,
    batch_marker
) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(page_id)
    .bind(page_title)
    .bind(target.title.as_str())
    .bind(target.namespace)
    .bind(target.page_id)
    .bind(batch_marker.get())
    .bind(batch_marker.get())
    .execute(&mut **tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            StoreError::DuplicateOpenVersion { page_id }
        } else {
            StoreError::from(err)
        }
    })?;
    Ok(())
}

fn open_version_value(
    page_id: i64,
    page_title: &str,
    target: &RedirectTarget,
    batch_marker: BatchMarker,
) -> RedirectVersion {
    RedirectVersion {
        page_id,
        page_title: page_title.to_string(),
        target_title: target.title.clone(),
        target_namespace: target.namespace,
        target_page_id: target.page_id,
        effective_from: batch_marker,
        effective_to: None,
        batch_marker,
    }
}

async fn open_sqlite(path: &Path, options: HistoryOptions) -> anyhow::Result<SqlitePool> {
    let connect = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(options.busy_timeout)
        .log_statements(LevelFilter::Off);
    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections.max(1))
        .acquire_timeout(options.busy_timeout)
        .connect_with(connect)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub fn history_db_path(home: &Path) -> PathBuf {
    home.join(HISTORY_DB_FILENAME)
}
