//! Per-stage request contexts.
//!
//! Each stage owns the previous one, so a later context is always a strict
//! extension of an earlier one. Nothing here outlives the request.

use tenantgate_core::{Principal, Role, Session, TenantId};

use crate::db::{BoundTransaction, Transaction};

/// Identity as resolved by the identity resolver, before any checks.
#[derive(Debug, Clone, Default)]
pub struct Incoming {
    pub session: Option<Session>,
    pub principal: Option<Principal>,
}

impl Incoming {
    #[must_use]
    pub fn new(session: Session, principal: Principal) -> Self {
        Self {
            session: Some(session),
            principal: Some(principal),
        }
    }

    /// A request without credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Output of [`AuthGuard`](super::AuthGuard).
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: Session,
    pub principal: Principal,
}

/// Output of [`TenantGuard`](super::TenantGuard): the authenticated caller
/// plus a transaction bound to their active tenant.
pub struct TenantScoped<T: Transaction> {
    pub auth: Authenticated,
    pub db: BoundTransaction<T>,
}

impl<T: Transaction> TenantScoped<T> {
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        self.db.tenant_id()
    }
}

/// Output of [`RoleGuard`](super::RoleGuard).
pub struct RoleScoped<T: Transaction> {
    pub scope: TenantScoped<T>,
    pub role: Role,
}

/// What a request handler sees: principal, tenant, optional role, and the
/// tenant-bound transaction as `db`.
pub struct RequestContext<T: Transaction> {
    session: Session,
    principal: Principal,
    role: Option<Role>,
    db: BoundTransaction<T>,
}

impl<T: Transaction> RequestContext<T> {
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        self.db.tenant_id()
    }

    /// Role resolved by [`RoleGuard`](super::RoleGuard); `None` when the
    /// route did not require one.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The only database handle a handler may use.
    pub fn db(&mut self) -> &mut T::Executor {
        self.db.executor()
    }

    pub(crate) fn into_transaction(self) -> BoundTransaction<T> {
        self.db
    }
}

impl<T: Transaction> From<TenantScoped<T>> for RequestContext<T> {
    fn from(scoped: TenantScoped<T>) -> Self {
        Self {
            session: scoped.auth.session,
            principal: scoped.auth.principal,
            role: None,
            db: scoped.db,
        }
    }
}

impl<T: Transaction> From<RoleScoped<T>> for RequestContext<T> {
    fn from(scoped: RoleScoped<T>) -> Self {
        let mut ctx = Self::from(scoped.scope);
        ctx.role = Some(scoped.role);
        ctx
    }
}
