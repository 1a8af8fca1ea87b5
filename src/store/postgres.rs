use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::{passwords_match, CredentialStore};
use crate::error::StoreError;

/// Accounts persisted in a postgres `accounts` table.
pub struct PgCredentialStore {
    pool: Arc<PgPool>,
}

impl PgCredentialStore {
    /// Connects eagerly so an unreachable database fails startup rather than
    /// the first login.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        let store = Self { pool: Arc::new(pool) };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                username TEXT PRIMARY KEY,
                password TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        info!("accounts table ready");
        Ok(())
    }

    /// Creates the account or replaces its password.
    pub async fn upsert_account(&self, username: &str, password: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (username, password)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET password = EXCLUDED.password
            "#,
        )
        .bind(username)
        .bind(password)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn stored_password(&self, username: &str) -> Result<Option<String>, StoreError> {
        let password = sqlx::query_scalar::<_, String>(
            "SELECT password FROM accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(password)
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        if username.is_empty() || password.is_empty() {
            return Ok(false);
        }
        Ok(self
            .stored_password(username)
            .await?
            .is_some_and(|stored| passwords_match(&stored, password)))
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        if username.is_empty() {
            return Ok(false);
        }
        Ok(self
            .stored_password(username)
            .await?
            .is_some_and(|stored| !stored.is_empty()))
    }
}
