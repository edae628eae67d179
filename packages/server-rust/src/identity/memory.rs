//! Server-side session store keyed by opaque token.

use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use tenantgate_core::{Principal, Session, TenantId};

use super::{session_token, IdentityResolver};
use crate::guard::Incoming;

/// In-process session store for development and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, (Session, Principal)>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signs `principal` in under `token`.
    pub fn insert(&self, token: impl Into<String>, principal: Principal, active_tenant_id: Option<TenantId>) {
        let session = Session {
            user_id: principal.user_id.clone(),
            active_tenant_id,
        };
        self.sessions.insert(token.into(), (session, principal));
    }

    /// Signs the session out. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Selects (or clears) the active organization for a session.
    /// Returns `false` if the session does not exist.
    pub fn switch_tenant(&self, token: &str, tenant_id: Option<TenantId>) -> bool {
        match self.sessions.get_mut(token) {
            Some(mut entry) => {
                entry.0.active_tenant_id = tenant_id;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for MemorySessionStore {
    async fn resolve(&self, headers: &HeaderMap) -> anyhow::Result<Incoming> {
        let found = session_token(headers)
            .and_then(|token| self.sessions.get(token))
            .map(|entry| entry.value().clone());

        Ok(match found {
            Some((session, principal)) => Incoming::new(session, principal),
            None => Incoming::anonymous(),
        })
    }
}
