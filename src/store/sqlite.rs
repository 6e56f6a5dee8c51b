use futures_util::{future::BoxFuture, FutureExt as _};
use sqlx::{
    sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use super::ResultStore;
use crate::{error::Error, record::Document};

/// Result store backed by a SQLite database.
///
/// Documents are kept as JSON text in a single `results` table keyed by
/// `msg_id`.
#[derive(Clone, Debug)]
pub struct SqliteResultStore {
    db: SqlitePool,
}

impl SqliteResultStore {
    /// Opens (or creates) the database at `path` and runs migrations. `None`
    /// opens a private in-memory database.
    pub async fn connect(path: Option<&str>) -> Result<Self, Error> {
        let opts = if let Some(path) = path {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        } else {
            SqliteConnectOptions::new().in_memory(true)
        }
        .optimize_on_close(true, None)
        .auto_vacuum(SqliteAutoVacuum::Full);

        let mut pool = SqlitePoolOptions::new();
        if path.is_none() {
            // Every connection to `:memory:` is a separate database.
            pool = pool.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { db: pool })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn count(&self) -> Result<u64, Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results")
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }
}

impl ResultStore for SqliteResultStore {
    fn upsert<'a>(&'a self, msg_id: &'a str, document: Document) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            let body = serde_json::to_string(&document)
                .map_err(|e| Error::serialize("result document", e))?;

            sqlx::query(
                "
                INSERT INTO results (msg_id, document, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (msg_id) DO UPDATE
                SET document = excluded.document, updated_at = excluded.updated_at
                ",
            )
            .bind(msg_id)
            .bind(body)
            .bind(chrono::Utc::now())
            .execute(&self.db)
            .await?;

            tracing::debug!(msg_id, "stored result");

            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, msg_id: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        async move {
            let result = sqlx::query("DELETE FROM results WHERE msg_id = $1")
                .bind(msg_id)
                .execute(&self.db)
                .await?;

            tracing::debug!(msg_id, existed = result.rows_affected() > 0, "deleted result");

            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }

    fn get<'a>(&'a self, msg_id: &'a str) -> BoxFuture<'a, Result<Option<Document>, Error>> {
        async move {
            let body: Option<String> =
                sqlx::query_scalar("SELECT document FROM results WHERE msg_id = $1")
                    .bind(msg_id)
                    .fetch_optional(&self.db)
                    .await?;

            body.map(|body| {
                serde_json::from_str(&body).map_err(|source| Error::CorruptDocument {
                    msg_id: msg_id.to_owned(),
                    source,
                })
            })
                .transpose()
        }
        .boxed()
    }
}
