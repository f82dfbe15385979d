//! Helpers for building snapshot databases in tests.

use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS page (
    page_id INTEGER PRIMARY KEY,
    page_namespace INTEGER NOT NULL,
    page_title TEXT NOT NULL,
    page_is_redirect INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS page_name_title ON page(page_namespace, page_title);
CREATE TABLE IF NOT EXISTS redirect (
    rd_from INTEGER PRIMARY KEY,
    rd_namespace INTEGER NOT NULL,
    rd_title TEXT NOT NULL
);
"#;

/// A fresh directory under the system temp dir; not created.
pub fn unique_temp_dir() -> PathBuf {
    static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let seq = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "wikihist-test-{}-{nanos}-{seq}",
        std::process::id()
    ))
}

/// A writable MediaWiki-shaped snapshot (`page` and `redirect` tables).
pub struct SnapshotFixture {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl SnapshotFixture {
    pub async fn create(db_path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SNAPSHOT_SCHEMA).execute(&pool).await?;
        Ok(Self { db_path, pool })
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn add_page(
        &self,
        page_id: i64,
        namespace: i64,
        title: &str,
        is_redirect: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO page (page_id, page_namespace, page_title, page_is_redirect)
VALUES (?, ?, ?, ?)
ON CONFLICT(page_id) DO UPDATE SET
    page_namespace = excluded.page_namespace,
    page_title = excluded.page_title,
    page_is_redirect = excluded.page_is_redirect
            "#,
        )
        .bind(page_id)
        .bind(namespace)
        .bind(title)
        .bind(i64::from(is_redirect))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or repoint the redirect out of `from_id`.
    pub async fn add_redirect(
        &self,
        from_id: i64,
        namespace: i64,
        title: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO redirect (rd_from, rd_namespace, rd_title)
VALUES (?, ?, ?)
ON CONFLICT(rd_from) DO UPDATE SET
    rd_namespace = excluded.rd_namespace,
    rd_title = excluded.rd_title
            "#,
        )
        .bind(from_id)
        .bind(namespace)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_redirect(&self, from_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM redirect WHERE rd_from = ?")
            .bind(from_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_redirects(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM redirect").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool and delete the fixture's directory.
    pub async fn remove(self) {
        self.pool.close().await;
        if let Some(parent) = self.db_path.parent() {
            let _ = tokio::fs::remove_dir_all(parent).await;
        }
    }
}
