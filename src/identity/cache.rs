/// DID cache - database layer for caching resolved identity documents
use crate::{
    error::{VaultError, VaultResult},
    identity::CachedDidDoc,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;

const CACHE_DB_FILE: &str = "did-cache.db";

/// DID document cache backed by sqlite
#[derive(Clone)]
pub struct DidCache {
    db: SqlitePool,
    /// TTL for cached documents (default: 1 hour)
    doc_ttl: Duration,
}

impl DidCache {
    /// Create a cache over an existing pool, creating the schema if needed
    pub async fn new(db: SqlitePool) -> VaultResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS did_doc (
                did TEXT PRIMARY KEY NOT NULL,
                doc TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self {
            db,
            doc_ttl: Duration::hours(1),
        })
    }

    /// Open (or create) the cache database under the given directory
    pub async fn open(directory: &Path) -> VaultResult<Self> {
        tokio::fs::create_dir_all(directory).await?;

        let db = SqlitePool::connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(directory.join(CACHE_DB_FILE))
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .create_if_missing(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await?;

        Self::new(db).await
    }

    /// Set a custom document TTL
    pub fn with_ttl(mut self, doc_ttl: Duration) -> Self {
        self.doc_ttl = doc_ttl;
        self
    }

    /// Get a cached document, dropping it if the TTL has lapsed
    pub async fn get(&self, did: &str) -> VaultResult<Option<CachedDidDoc>> {
        let result = sqlx::query(
            r#"
            SELECT did, doc, cached_at
            FROM did_doc
            WHERE did = ?1
            "#,
        )
        .bind(did)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = result {
            let cached = CachedDidDoc {
                did: row.try_get("did")?,
                doc: row.try_get("doc")?,
                cached_at: parse_timestamp(&row.try_get::<String, _>("cached_at")?)?,
            };

            if Utc::now() - cached.cached_at < self.doc_ttl {
                return Ok(Some(cached));
            }

            // Cache expired, delete it
            self.delete(did).await?;
            return Ok(None);
        }

        Ok(None)
    }

    /// Cache a document
    pub async fn put(&self, did: &str, doc: &str) -> VaultResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO did_doc (did, doc, cached_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(did) DO UPDATE SET
                doc = excluded.doc,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(did)
        .bind(doc)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Delete a document from the cache
    pub async fn delete(&self, did: &str) -> VaultResult<()> {
        sqlx::query("DELETE FROM did_doc WHERE did = ?1")
            .bind(did)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Clean up expired cache entries
    pub async fn cleanup_expired(&self) -> VaultResult<()> {
        let cutoff = (Utc::now() - self.doc_ttl).to_rfc3339();

        sqlx::query("DELETE FROM did_doc WHERE cached_at < ?1")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

/// Parse RFC3339 timestamp
fn parse_timestamp(s: &str) -> VaultResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VaultError::Config(format!("Invalid cache timestamp: {}", e)))
}
