//! Tenant-bound database access.
//!
//! A request never touches tenant-partitioned tables through a bare
//! connection. It receives a [`BoundTransaction`], which can only be built by
//! opening a transaction and applying the transaction-local tenant setting
//! as its first statement. Row-level-security policies read that setting,
//! so queries issued through the bound handle see exactly one tenant.
//!
//! Backends:
//! - [`postgres`] (feature `postgres`): `sqlx` pool, `set_config(.., true)`
//! - [`memory`]: in-process emulation of row-level security

pub mod binding;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use tenantgate_core::{TenantId, UserId};

pub use binding::BoundTransaction;
pub use memory::{MemoryDatabase, MemoryScope, MemoryTransaction, Statement, Transcript, TxOutcome};
#[cfg(feature = "postgres")]
pub use postgres::{PgDatabase, PgTransaction};

/// Errors raised by a database backend.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("transaction is already bound to tenant {bound}")]
    AlreadyBound { bound: TenantId },
    #[error("{0}")]
    Backend(String),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Source of transactions. Shared by every tenant; holds no tenant state.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    type Tx: Transaction;

    /// Opens a new transaction on a pooled connection.
    async fn begin(&self) -> Result<Self::Tx, DbError>;
}

/// One open database transaction.
///
/// `bind_tenant` is only ever called by [`BoundTransaction::open`]; request
/// code reaches the transaction through [`BoundTransaction::executor`].
#[async_trait]
pub trait Transaction: Send + 'static {
    /// Query interface handed to request handlers.
    type Executor: ?Sized + Send;

    /// Sets the tenant as a transaction-local setting, released at commit
    /// or rollback so a pooled connection never carries it to another request.
    async fn bind_tenant(&mut self, tenant_id: &TenantId) -> Result<(), DbError>;

    /// Reads the caller's role from the membership table. The table is itself
    /// protected by row-level security and only readable after binding.
    async fn membership_role(&mut self, user_id: &UserId) -> Result<Option<String>, DbError>;

    fn executor(&mut self) -> &mut Self::Executor;

    async fn commit(self) -> Result<(), DbError>;

    async fn rollback(self) -> Result<(), DbError>;
}
