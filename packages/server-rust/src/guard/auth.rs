//! Rejects requests without an authenticated identity.

use async_trait::async_trait;
use tracing::debug;

use super::context::{Authenticated, Incoming};
use super::Guard;
use crate::error::GuardError;

/// First guard of the chain. Pure: performs no I/O and opens no transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthGuard;

#[async_trait]
impl Guard<Incoming> for AuthGuard {
    type Output = Authenticated;

    async fn attempt(&self, input: Incoming) -> Result<Authenticated, GuardError> {
        let (Some(session), Some(principal)) = (input.session, input.principal) else {
            return Err(GuardError::Unauthenticated);
        };

        if session.user_id != principal.user_id {
            debug!(
                session_user = %session.user_id,
                principal_user = %principal.user_id,
                "session does not belong to principal"
            );
            return Err(GuardError::Unauthenticated);
        }

        Ok(Authenticated { session, principal })
    }
}
