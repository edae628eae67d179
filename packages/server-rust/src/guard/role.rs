//! Restricts operations to elevated roles within the active tenant.

use async_trait::async_trait;
use tenantgate_core::Role;
use tracing::debug;

use super::context::{RoleScoped, TenantScoped};
use super::Guard;
use crate::db::Transaction;
use crate::error::GuardError;

/// Looks up the caller's membership inside the already-bound transaction.
///
/// Must run after [`TenantGuard`](super::TenantGuard): the membership table
/// is protected by row-level security and unreadable before binding.
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Vec<Role>,
}

impl Default for RoleGuard {
    /// Allows every elevated role.
    fn default() -> Self {
        Self {
            allowed: Role::ALL.into_iter().filter(|role| role.is_elevated()).collect(),
        }
    }
}

impl RoleGuard {
    /// Allows exactly the given roles.
    #[must_use]
    pub fn allowing(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed: roles.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn permits(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }
}

#[async_trait]
impl<T: Transaction> Guard<TenantScoped<T>> for RoleGuard {
    type Output = RoleScoped<T>;

    async fn attempt(&self, input: TenantScoped<T>) -> Result<RoleScoped<T>, GuardError> {
        let TenantScoped { auth, mut db } = input;

        let stored = match db.membership_role(&auth.principal.user_id).await {
            Ok(stored) => stored,
            Err(err) => {
                db.abandon().await;
                return Err(GuardError::Database(err));
            }
        };

        match stored.as_deref().and_then(Role::parse) {
            Some(role) if self.permits(role) => Ok(RoleScoped {
                scope: TenantScoped { auth, db },
                role,
            }),
            _ => {
                debug!(
                    user_id = %auth.principal.user_id,
                    tenant_id = %db.tenant_id(),
                    role = ?stored,
                    "role check failed"
                );
                db.abandon().await;
                Err(GuardError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tenantgate_core::{Principal, Session, TenantId, UserId};

    use super::*;
    use crate::db::{MemoryDatabase, MemoryTransaction, Statement, TxOutcome};
    use crate::guard::context::Authenticated;
    use crate::guard::TenantGuard;

    async fn scoped(db: &Arc<MemoryDatabase>, user: &str, tenant: &str) -> TenantScoped<MemoryTransaction> {
        let auth = Authenticated {
            session: Session {
                user_id: UserId::new(user),
                active_tenant_id: Some(TenantId::new(tenant)),
            },
            principal: Principal {
                user_id: UserId::new(user),
                email: format!("{user}@example.com"),
                name: user.to_string(),
            },
        };
        TenantGuard::new(Arc::clone(db)).attempt(auth).await.unwrap()
    }

    #[test]
    fn default_allows_exactly_the_elevated_roles() {
        let guard = RoleGuard::default();
        for role in Role::ALL {
            assert_eq!(guard.permits(role), role.is_elevated(), "{role}");
        }
    }

    #[tokio::test]
    async fn elevated_role_proceeds_with_role_in_context() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_membership(&TenantId::new("t1"), &UserId::new("u1"), "Owner");

        let out = RoleGuard::default().attempt(scoped(&db, "u1", "t1").await).await.unwrap();
        assert_eq!(out.role, Role::Owner);
        assert_eq!(out.scope.tenant_id().as_str(), "t1");

        let statements = &db.transcripts()[0].statements;
        assert_eq!(statements[0], Statement::BindTenant(TenantId::new("t1")));
        assert_eq!(statements[1], Statement::MembershipLookup(UserId::new("u1")));
    }

    #[tokio::test]
    async fn non_elevated_role_is_forbidden_and_rolled_back() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_membership(&TenantId::new("t1"), &UserId::new("u1"), "member");

        let err = RoleGuard::default()
            .attempt(scoped(&db, "u1", "t1").await)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GuardError::Forbidden));
        assert_eq!(db.transcripts()[0].outcome, TxOutcome::RolledBack);
    }

    #[tokio::test]
    async fn missing_membership_is_forbidden() {
        let db = Arc::new(MemoryDatabase::new());
        // Admin elsewhere does not count.
        db.add_membership(&TenantId::new("t2"), &UserId::new("u1"), "admin");

        let err = RoleGuard::default()
            .attempt(scoped(&db, "u1", "t1").await)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GuardError::Forbidden));
    }

    #[tokio::test]
    async fn unknown_role_name_is_forbidden() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_membership(&TenantId::new("t1"), &UserId::new("u1"), "superuser");

        let err = RoleGuard::default()
            .attempt(scoped(&db, "u1", "t1").await)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GuardError::Forbidden));
    }

    #[tokio::test]
    async fn custom_allow_list() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_membership(&TenantId::new("t1"), &UserId::new("u1"), "member");

        let guard = RoleGuard::allowing([Role::Member]);
        let out = guard.attempt(scoped(&db, "u1", "t1").await).await.unwrap();
        assert_eq!(out.role, Role::Member);
        assert!(!guard.permits(Role::Admin));
    }
}
