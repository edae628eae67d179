//! Stateless session tokens signed with HS256.

use async_trait::async_trait;
use http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tenantgate_core::{Principal, Session, TenantId, UserId};
use tracing::debug;

use super::{session_token, IdentityResolver};
use crate::guard::Incoming;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub name: String,
    /// Organization the user last selected, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tenant_id: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    pub exp: u64,
}

impl SessionClaims {
    fn into_incoming(self) -> Incoming {
        let user_id = UserId::new(self.sub);
        Incoming::new(
            Session {
                user_id: user_id.clone(),
                active_tenant_id: self.active_tenant_id.map(TenantId::new),
            },
            Principal {
                user_id,
                email: self.email,
                name: self.name,
            },
        )
    }
}

/// Verifies bearer or cookie tokens against a shared secret.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> anyhow::Result<Incoming> {
        let Some(token) = session_token(headers) else {
            return Ok(Incoming::anonymous());
        };

        match decode::<SessionClaims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(data.claims.into_incoming()),
            Err(err) => {
                debug!(error = %err, "rejected session token");
                Ok(Incoming::anonymous())
            }
        }
    }
}
