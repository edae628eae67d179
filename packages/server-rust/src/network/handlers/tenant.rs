//! Authenticated `/v1` routes.
//!
//! Each handler resolves the caller's identity, then hands the request to
//! the [`GuardPipeline`](crate::guard::GuardPipeline). Handlers never see a
//! database handle that is not bound to the caller's active tenant.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use tenantgate_core::{Role, TenantId, UserId};

use super::AppState;
use crate::db::{Database, Transaction};
use crate::error::GuardError;
use crate::guard::{Access, Authenticated, Incoming, RequestContext, TenantHandler};

/// Body of `GET /v1/session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub active_tenant_id: Option<TenantId>,
}

impl From<Authenticated> for SessionView {
    fn from(auth: Authenticated) -> Self {
        Self {
            user_id: auth.principal.user_id,
            email: auth.principal.email,
            name: auth.principal.name,
            active_tenant_id: auth.session.active_tenant_id,
        }
    }
}

/// Body of the tenant-scoped context routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextView {
    pub user_id: UserId,
    pub email: String,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Reports who the caller is and which tenant the transaction is bound to.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescribeContext;

#[async_trait]
impl<T: Transaction> TenantHandler<T> for DescribeContext {
    type Output = ContextView;

    async fn handle(&self, ctx: &mut RequestContext<T>) -> anyhow::Result<ContextView> {
        Ok(ContextView {
            user_id: ctx.principal().user_id.clone(),
            email: ctx.principal().email.clone(),
            tenant_id: ctx.tenant_id().clone(),
            role: ctx.role(),
        })
    }
}

async fn resolve<D: Database>(state: &AppState<D>, headers: &HeaderMap) -> Result<Incoming, GuardError> {
    state
        .identity
        .resolve(headers)
        .await
        .map_err(|err| GuardError::Internal(err.context("identity resolution failed")))
}

/// `GET /v1/session`: authentication only.
pub async fn session_handler<D: Database>(
    State(state): State<AppState<D>>,
    headers: HeaderMap,
) -> Result<Json<SessionView>, GuardError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let incoming = resolve(&state, &headers).await?;
    let auth = state.pipeline.authenticate(incoming).await?;
    Ok(Json(SessionView::from(auth)))
}

/// `GET /v1/tenant/context`: any member of the active tenant.
pub async fn tenant_context_handler<D: Database>(
    State(state): State<AppState<D>>,
    headers: HeaderMap,
) -> Result<Json<ContextView>, GuardError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let incoming = resolve(&state, &headers).await?;
    let view = state
        .pipeline
        .run(incoming, Access::Tenant, &DescribeContext)
        .await?;
    Ok(Json(view))
}

/// `GET /v1/admin/context`: owners and admins of the active tenant.
pub async fn admin_context_handler<D: Database>(
    State(state): State<AppState<D>>,
    headers: HeaderMap,
) -> Result<Json<ContextView>, GuardError> {
    let _in_flight = state.shutdown.in_flight_guard();
    let incoming = resolve(&state, &headers).await?;
    let view = state
        .pipeline
        .run(incoming, Access::Elevated, &DescribeContext)
        .await?;
    Ok(Json(view))
}
