//! The tenant-bound transaction handle.

use tenantgate_core::{TenantId, UserId};
use tracing::{debug, error, warn};

use super::{Database, DbError, Transaction};
use crate::error::GuardError;

/// A transaction whose first statement bound it to exactly one tenant.
///
/// There is no way to obtain one without that binding having succeeded, and
/// no way to re-bind it. Dropping it without calling [`commit`](Self::commit)
/// rolls the transaction back (backends roll back unfinished transactions on
/// drop), which covers cancelled and timed-out requests.
pub struct BoundTransaction<T: Transaction> {
    tx: T,
    tenant_id: TenantId,
}

impl<T: Transaction> BoundTransaction<T> {
    /// Begins a transaction on `db` and binds `tenant_id` to it.
    ///
    /// # Errors
    ///
    /// `GuardError::Database` if no transaction could be opened, and
    /// `GuardError::TenantBindingFailure` if the binding statement failed.
    /// In the latter case the transaction is rolled back before returning.
    pub(crate) async fn open<D>(db: &D, tenant_id: TenantId) -> Result<Self, GuardError>
    where
        D: Database<Tx = T>,
    {
        let mut tx = db.begin().await?;

        if let Err(err) = tx.bind_tenant(&tenant_id).await {
            error!(tenant_id = %tenant_id, error = %err, "tenant binding failed, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed binding also failed");
            }
            return Err(GuardError::TenantBindingFailure(err));
        }

        debug!(tenant_id = %tenant_id, "transaction bound to tenant");
        Ok(Self { tx, tenant_id })
    }

    /// Tenant this transaction is bound to.
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Query interface for tenant-scoped reads and writes.
    pub fn executor(&mut self) -> &mut T::Executor {
        self.tx.executor()
    }

    pub(crate) async fn membership_role(&mut self, user_id: &UserId) -> Result<Option<String>, DbError> {
        self.tx.membership_role(user_id).await
    }

    /// Commits all writes made through this handle.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the commit fails; the writes are then lost.
    pub async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await
    }

    /// Discards all writes made through this handle.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the rollback statement fails.
    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await
    }

    /// Rolls back, logging rather than returning a failure. Used on paths
    /// that are already reporting a more relevant error.
    pub(crate) async fn abandon(self) {
        let tenant_id = self.tenant_id.clone();
        if let Err(err) = self.rollback().await {
            warn!(tenant_id = %tenant_id, error = %err, "rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::{MemoryDatabase, Statement, TxOutcome};

    #[tokio::test]
    async fn binding_is_the_first_statement() {
        let db = MemoryDatabase::new();
        let tenant = TenantId::new("t-1");

        let mut bound = BoundTransaction::open(&db, tenant.clone()).await.unwrap();
        bound.executor().select("contacts").unwrap();
        bound.commit().await.unwrap();

        let transcripts = db.transcripts();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].statements[0], Statement::BindTenant(tenant));
        assert_eq!(
            transcripts[0].statements[1],
            Statement::Select {
                table: "contacts".to_string()
            }
        );
        assert_eq!(transcripts[0].outcome, TxOutcome::Committed);
    }

    #[tokio::test]
    async fn failed_binding_rolls_back_and_reports_binding_failure() {
        let db = MemoryDatabase::new();
        db.fail_bindings(true);

        let result = BoundTransaction::open(&db, TenantId::new("t-1")).await;
        assert!(matches!(result, Err(GuardError::TenantBindingFailure(_))));

        let transcripts = db.transcripts();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].outcome, TxOutcome::RolledBack);
    }

    #[tokio::test]
    async fn dropping_an_unfinished_transaction_rolls_back() {
        let db = MemoryDatabase::new();
        {
            let mut bound = BoundTransaction::open(&db, TenantId::new("t-1")).await.unwrap();
            bound.executor().insert("contacts", json!({"name": "Ada"})).unwrap();
        }

        assert_eq!(db.transcripts()[0].outcome, TxOutcome::RolledBack);
        assert!(db.rows("contacts").is_empty());
    }

    #[tokio::test]
    async fn exposes_the_bound_tenant() {
        let db = MemoryDatabase::new();
        let bound = BoundTransaction::open(&db, TenantId::new("t-9")).await.unwrap();
        assert_eq!(bound.tenant_id().as_str(), "t-9");
        bound.abandon().await;
        assert_eq!(db.transcripts()[0].outcome, TxOutcome::RolledBack);
    }
}
