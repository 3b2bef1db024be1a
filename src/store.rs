use crate::{
    error::InfraError,
    lifecycle::Resource,
    models::{Link, LinkFilter, NewLink},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Sqlite, SqlitePool,
};

/// Outcome of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// The row was written and got this id.
    Created(i64),
    /// Another row already owns the code; nothing was written.
    CodeTaken,
}

/// Persistent home of every link.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Insert a link. A code uniqueness violation is reported as
    /// [`Inserted::CodeTaken`], never as an error.
    async fn create(&self, link: &NewLink) -> Result<Inserted, InfraError>;

    /// Return the newest link matching every field of `filter`.
    async fn get(&self, filter: &LinkFilter) -> Result<Option<Link>, InfraError>;
}

// ── SQLite ─────────────────────────────────────────────────────────────────

const LINK_COLUMNS: &str = "id, owner_id, code, salt, long_url, deadline, retention_expiry, \
                            created_at, updated_at";

/// SQLite-backed store. The pool connects lazily; [`Resource::startup`]
/// verifies the database and applies migrations.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    #[cfg(test)]
    fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete rows whose retention window has run out. Returns the number of
    /// rows removed.
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> Result<u64, InfraError> {
        let affected = sqlx::query(
            "DELETE FROM links WHERE retention_expiry IS NOT NULL AND retention_expiry < ?1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    /// Periodically purge stale rows until the process exits.
    pub fn spawn_retention_sweep(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.purge_stale(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Retention sweep removed {} stale link(s)", n),
                    Err(e) => tracing::error!("Retention sweep failed: {:?}", e),
                }
            }
        })
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn create(&self, link: &NewLink) -> Result<Inserted, InfraError> {
        let result = sqlx::query(
            "INSERT INTO links
                 (owner_id, code, salt, long_url, deadline, retention_expiry, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&link.owner_id)
        .bind(&link.code)
        .bind(&link.salt)
        .bind(&link.long_url)
        .bind(link.deadline)
        .bind(link.retention_expiry)
        .bind(link.created_at)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(Inserted::Created(done.last_insert_rowid())),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(Inserted::CodeTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, filter: &LinkFilter) -> Result<Option<Link>, InfraError> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {LINK_COLUMNS} FROM links"));

        let constraints = [
            ("owner_id", &filter.owner_id),
            ("code", &filter.code),
            ("long_url", &filter.long_url),
        ];
        let mut first = true;
        for (column, value) in constraints {
            if let Some(value) = value {
                query.push(if first { " WHERE " } else { " AND " });
                query.push(column).push(" = ").push_bind(value.clone());
                first = false;
            }
        }
        query.push(" ORDER BY id DESC LIMIT 1");

        let link = query
            .build_query_as::<Link>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(link)
    }
}

#[async_trait]
impl Resource for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn startup(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database reachable, migrations applied");
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        tracing::info!("Database pool closed");
        Ok(())
    }
}
