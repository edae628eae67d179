//! Resolves the active tenant and binds it to the request's transaction.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::context::{Authenticated, TenantScoped};
use super::Guard;
use crate::db::{BoundTransaction, Database};
use crate::error::GuardError;

/// Opens the single transaction that serves a tenant-scoped request.
pub struct TenantGuard<D: Database> {
    db: Arc<D>,
}

impl<D: Database> TenantGuard<D> {
    #[must_use]
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<D: Database> Guard<Authenticated> for TenantGuard<D> {
    type Output = TenantScoped<D::Tx>;

    async fn attempt(&self, input: Authenticated) -> Result<TenantScoped<D::Tx>, GuardError> {
        let Some(tenant_id) = input.session.active_tenant_id.clone() else {
            debug!(user_id = %input.principal.user_id, "no active tenant in session");
            return Err(GuardError::NoActiveTenant);
        };

        let db = BoundTransaction::open(self.db.as_ref(), tenant_id).await?;
        Ok(TenantScoped { auth: input, db })
    }
}

#[cfg(test)]
mod tests {
    use tenantgate_core::{Principal, Session, TenantId, UserId};

    use super::*;
    use crate::db::{MemoryDatabase, Statement, TxOutcome};

    fn authenticated(tenant: Option<&str>) -> Authenticated {
        Authenticated {
            session: Session {
                user_id: UserId::new("u1"),
                active_tenant_id: tenant.map(TenantId::new),
            },
            principal: Principal {
                user_id: UserId::new("u1"),
                email: "u1@example.com".to_string(),
                name: "User One".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn no_active_tenant_opens_no_transaction() {
        let db = Arc::new(MemoryDatabase::new());
        let guard = TenantGuard::new(Arc::clone(&db));

        let err = guard.attempt(authenticated(None)).await.err().unwrap();
        assert!(matches!(err, GuardError::NoActiveTenant));
        assert!(db.transcripts().is_empty());
    }

    #[tokio::test]
    async fn binds_the_session_tenant() {
        let db = Arc::new(MemoryDatabase::new());
        let guard = TenantGuard::new(Arc::clone(&db));

        let scoped = guard.attempt(authenticated(Some("t7"))).await.unwrap();
        assert_eq!(scoped.tenant_id().as_str(), "t7");
        assert_eq!(scoped.auth.principal.user_id.as_str(), "u1");

        let transcripts = db.transcripts();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].statements, vec![Statement::BindTenant(TenantId::new("t7"))]);
        assert_eq!(transcripts[0].outcome, TxOutcome::Open);
    }

    #[tokio::test]
    async fn binding_failure_is_reported_and_rolled_back() {
        let db = Arc::new(MemoryDatabase::new());
        db.fail_bindings(true);
        let guard = TenantGuard::new(Arc::clone(&db));

        let err = guard.attempt(authenticated(Some("t7"))).await.err().unwrap();
        assert!(matches!(err, GuardError::TenantBindingFailure(_)));
        assert_eq!(db.open_transactions(), 0);
    }
}
