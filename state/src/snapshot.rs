//! Read-only access to a MediaWiki-shaped snapshot database.
//!
//! The snapshot carries the `page` and `redirect` tables of one extraction.
//! Candidates stream from a dedicated cursor pool so the long-running scan
//! never shares a connection with point lookups or history writes.

use crate::InclusionFilter;
use crate::Page;
use crate::RedirectCandidate;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::model::PageRow;
use crate::model::RedirectRow;
use anyhow::Context;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::QueryBuilder;
use sqlx::Sqlite;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Handle on a snapshot database.
#[derive(Clone)]
pub struct SnapshotDb {
    db_path: PathBuf,
    cursor_pool: SqlitePool,
    lookup_pool: SqlitePool,
}

impl SnapshotDb {
    /// Open an existing snapshot database read-only.
    pub async fn open(db_path: PathBuf, busy_timeout: Duration) -> anyhow::Result<Self> {
        let cursor_pool = open_read_only_pool(&db_path, busy_timeout, 1).await?;
        let lookup_pool = open_read_only_pool(&db_path, busy_timeout, 2).await?;
        Ok(Self {
            db_path,
            cursor_pool,
            lookup_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Stream the redirects that pass `filter`, ordered by source page id.
    ///
    /// The filter is pushed down into SQL. Source titles are joined in when
    /// the source page row exists.
    pub fn candidates(
        &self,
        filter: &InclusionFilter,
    ) -> BoxStream<'static, StoreResult<RedirectCandidate>> {
        let pool = self.cursor_pool.clone();
        let filter = filter.clone();
        Box::pin(async_stream::try_stream! {
            let mut builder = candidates_query(&filter);
            let mut rows = builder.build_query_as::<RedirectRow>().fetch(&pool);
            let mut streamed: u64 = 0;
            while let Some(row) = rows.try_next().await? {
                streamed += 1;
                yield RedirectCandidate::from(row);
            }
            debug!(streamed, "snapshot scan finished");
        })
    }

    pub async fn page_by_title(&self, namespace: i64, title: &str) -> StoreResult<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
SELECT page_id, page_namespace, page_title, page_is_redirect
FROM page
WHERE page_namespace = ? AND page_title = ?
            "#,
        )
        .bind(namespace)
        .bind(title)
        .fetch_optional(&self.lookup_pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.map(Page::from))
    }

    pub async fn page_by_id(&self, page_id: i64) -> StoreResult<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
SELECT page_id, page_namespace, page_title, page_is_redirect
FROM page
WHERE page_id = ?
            "#,
        )
        .bind(page_id)
        .fetch_optional(&self.lookup_pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.map(Page::from))
    }
}

fn candidates_query(filter: &InclusionFilter) -> QueryBuilder<'static, Sqlite> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        r#"
SELECT
    r.rd_from AS rd_from,
    r.rd_namespace AS rd_namespace,
    r.rd_title AS rd_title,
    p.page_title AS from_title
FROM redirect r
LEFT JOIN page p ON p.page_id = r.rd_from
WHERE 1 = 1
        "#,
    );
    if !filter.namespaces.is_empty() {
        builder.push(" AND r.rd_namespace IN (");
        let mut separated = builder.separated(", ");
        for namespace in &filter.namespaces {
            separated.push_bind(*namespace);
        }
        separated.push_unseparated(")");
    }
    if filter.min_title_len > 0 {
        builder
            .push(" AND LENGTH(r.rd_title) >= ")
            .push_bind(i64::try_from(filter.min_title_len).unwrap_or(i64::MAX));
    }
    if let Some(max_title_len) = filter.max_title_len {
        builder
            .push(" AND LENGTH(r.rd_title) <= ")
            .push_bind(i64::try_from(max_title_len).unwrap_or(i64::MAX));
    }
    builder.push(" ORDER BY r.rd_from ASC");
    builder
}

async fn open_read_only_pool(
    path: &Path,
    busy_timeout: Duration,
    max_connections: u32,
) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .read_only(true)
        .busy_timeout(busy_timeout)
        .log_statements(LevelFilter::Off);

    let display = path.display();
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(busy_timeout)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open snapshot db at {display}"))
}
