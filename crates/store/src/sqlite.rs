//! SQLite-backed secure store using sqlx.
//!
//! Schema: `secrets(service, key, value, updated_at)` with composite primary
//! key `(service, key)`. One database can hold several services; each
//! [`SqliteSecureStore`] only ever sees rows of its own service.

use async_trait::async_trait;
use bcconnect_types::{SecureStore, traits::Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

/// A persistent [`SecureStore`] backed by `SQLite`.
pub struct SqliteSecureStore {
    pool: SqlitePool,
    service: String,
}

impl SqliteSecureStore {
    /// Connects to a `SQLite` database (e.g. `"sqlite:./secrets.db"`).
    ///
    /// Creates the database file if it does not exist and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] if the connection or table creation fails.
    pub async fn new(
        database_url: &str,
        service: impl Into<String>,
    ) -> std::result::Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self {
            pool,
            service: service.into(),
        })
    }

    /// The service identifier every key is scoped to.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    async fn migrate(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS secrets (
                service     TEXT    NOT NULL,
                key         TEXT    NOT NULL,
                value       TEXT    NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT (unixepoch()),
                PRIMARY KEY (service, key)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for SqliteSecureStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM secrets WHERE service = ? AND key = ?")
                .bind(&self.service)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO secrets (service, key, value)
             VALUES (?, ?, ?)
             ON CONFLICT(service, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = unixepoch()",
        )
        .bind(&self.service)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        tracing::trace!(service = %self.service, key, "secret stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM secrets WHERE service = ? AND key = ?")
            .bind(&self.service)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
