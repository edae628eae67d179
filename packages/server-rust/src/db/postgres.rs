//! `PostgreSQL` backend over a shared `sqlx` pool.
//!
//! The tenant is applied with `set_config(name, value, true)`; the third
//! argument makes the setting transaction-local, so it is released at
//! commit or rollback and never survives on a pooled connection.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;
use tenantgate_core::{TenantId, UserId};
use tracing::info;

use super::{Database, DbError, Transaction};
use crate::config::DatabaseConfig;

const BIND_TENANT_SQL: &str = "SELECT set_config($1, $2, true)";

/// Role lookup. Row-level security on `memberships` restricts it to the bound tenant.
const MEMBERSHIP_SQL: &str = "SELECT role FROM memberships WHERE user_id = $1 LIMIT 1";

/// Connection pool shared by all tenants.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    tenant_setting: Arc<str>,
}

impl PgDatabase {
    /// Builds the pool described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection cannot be established.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            tenant_setting = %config.tenant_setting,
            "database pool ready"
        );
        Ok(Self::from_pool(pool, &config.tenant_setting))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, tenant_setting: &str) -> Self {
        Self {
            pool,
            tenant_setting: Arc::from(tenant_setting),
        }
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Database for PgDatabase {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, DbError> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction {
            tx,
            tenant_setting: Arc::clone(&self.tenant_setting),
        })
    }
}

/// Transaction on a pooled connection. `sqlx` rolls it back if dropped
/// before commit.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    tenant_setting: Arc<str>,
}

#[async_trait]
impl Transaction for PgTransaction {
    type Executor = PgConnection;

    async fn bind_tenant(&mut self, tenant_id: &TenantId) -> Result<(), DbError> {
        sqlx::query(BIND_TENANT_SQL)
            .bind(&*self.tenant_setting)
            .bind(tenant_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn membership_role(&mut self, user_id: &UserId) -> Result<Option<String>, DbError> {
        let role = sqlx::query_scalar::<_, String>(MEMBERSHIP_SQL)
            .bind(user_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(role)
    }

    fn executor(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
