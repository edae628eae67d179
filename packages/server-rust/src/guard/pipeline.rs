//! Fixed driver for the authorization chain and the guarded handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tenantgate_core::ErrorCode;
use tracing::{debug, field, info_span, warn, Instrument};

use super::context::{Authenticated, Incoming, RequestContext};
use super::{AuthGuard, Guard, RoleGuard, TenantGuard};
use crate::db::{Database, Transaction};
use crate::error::GuardError;

/// How much of the chain a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Authenticated caller with an active tenant.
    Tenant,
    /// Additionally an elevated role inside that tenant.
    Elevated,
}

/// Business logic executed inside the tenant-bound transaction.
///
/// Implementations must use `ctx.db()` for every query and never acquire a
/// connection of their own.
#[async_trait]
pub trait TenantHandler<T: Transaction>: Send + Sync {
    type Output: Send;

    async fn handle(&self, ctx: &mut RequestContext<T>) -> anyhow::Result<Self::Output>;
}

/// Runs `AuthGuard → TenantGuard → [RoleGuard] → handler` for one request.
///
/// Exactly one transaction is opened per tenant-scoped request. It commits
/// when the handler succeeds and rolls back when any later step fails, the
/// handler errors, the deadline passes, or the request future is dropped.
pub struct GuardPipeline<D: Database> {
    auth: AuthGuard,
    tenant: TenantGuard<D>,
    role: RoleGuard,
    handler_timeout: Option<Duration>,
}

impl<D: Database> GuardPipeline<D> {
    #[must_use]
    pub fn new(db: Arc<D>) -> Self {
        Self {
            auth: AuthGuard,
            tenant: TenantGuard::new(db),
            role: RoleGuard::default(),
            handler_timeout: None,
        }
    }

    #[must_use]
    pub fn with_role_guard(mut self, role: RoleGuard) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Runs only the authentication step, for routes that need an identity
    /// but no tenant data.
    ///
    /// # Errors
    ///
    /// `GuardError::Unauthenticated` if the identity is incomplete.
    pub async fn authenticate(&self, incoming: Incoming) -> Result<Authenticated, GuardError> {
        self.auth.attempt(incoming).await.inspect_err(record_rejection)
    }

    /// Runs the chain for `access`, then `handler` inside the bound transaction.
    ///
    /// # Errors
    ///
    /// The first guard rejection, a commit failure, a handler error
    /// (`GuardError::Internal`), or `GuardError::Timeout`.
    pub async fn run<H>(
        &self,
        incoming: Incoming,
        access: Access,
        handler: &H,
    ) -> Result<H::Output, GuardError>
    where
        H: TenantHandler<D::Tx>,
    {
        let span = info_span!(
            "guarded_request",
            access = ?access,
            user_id = field::Empty,
            tenant_id = field::Empty,
        );

        self.run_chain(incoming, access, handler)
            .instrument(span)
            .await
            .inspect_err(record_rejection)
    }

    async fn run_chain<H>(
        &self,
        incoming: Incoming,
        access: Access,
        handler: &H,
    ) -> Result<H::Output, GuardError>
    where
        H: TenantHandler<D::Tx>,
    {
        let auth = self.auth.attempt(incoming).await?;
        tracing::Span::current().record("user_id", field::display(&auth.principal.user_id));

        let scoped = self.tenant.attempt(auth).await?;
        tracing::Span::current().record("tenant_id", field::display(scoped.tenant_id()));

        let ctx = match access {
            Access::Tenant => RequestContext::from(scoped),
            Access::Elevated => RequestContext::from(self.role.attempt(scoped).await?),
        };

        self.execute(ctx, handler).await
    }

    async fn execute<H>(
        &self,
        mut ctx: RequestContext<D::Tx>,
        handler: &H,
    ) -> Result<H::Output, GuardError>
    where
        H: TenantHandler<D::Tx>,
    {
        let outcome = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.handle(&mut ctx)).await {
                Ok(result) => result.map_err(GuardError::Internal),
                Err(_elapsed) => Err(GuardError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => handler.handle(&mut ctx).await.map_err(GuardError::Internal),
        };

        let db = ctx.into_transaction();
        match outcome {
            Ok(output) => {
                db.commit().await?;
                debug!("tenant transaction committed");
                Ok(output)
            }
            Err(err) => {
                db.abandon().await;
                debug!(error = %err, "tenant transaction rolled back");
                Err(err)
            }
        }
    }
}

fn record_rejection(err: &GuardError) {
    let code = err.code();
    metrics::counter!("tenantgate_guard_rejections_total", "code" => code.as_str()).increment(1);
    match code {
        ErrorCode::Internal => warn!(code = %code, error = %err, "request rejected"),
        _ => debug!(code = %code, "request rejected"),
    }
}
