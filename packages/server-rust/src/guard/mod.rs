//! The authorization chain.
//!
//! Guards run strictly in order, each consuming the previous stage's
//! context and producing an extension of it:
//!
//! ```text
//! Incoming --AuthGuard--> Authenticated --TenantGuard--> TenantScoped --RoleGuard--> RoleScoped
//! ```
//!
//! The first failure ends the chain. [`GuardPipeline`] is the fixed driver
//! that runs the chain and then the request handler inside the bound
//! transaction.

pub mod auth;
pub mod context;
pub mod pipeline;
pub mod role;
pub mod tenant;

use async_trait::async_trait;

use crate::error::GuardError;

pub use auth::AuthGuard;
pub use context::{Authenticated, Incoming, RequestContext, RoleScoped, TenantScoped};
pub use pipeline::{Access, GuardPipeline, TenantHandler};
pub use role::RoleGuard;
pub use tenant::TenantGuard;

/// One step of the authorization chain.
#[async_trait]
pub trait Guard<In>: Send + Sync
where
    In: Send + 'static,
{
    type Output: Send;

    /// Checks `input` and, on success, returns the extended context.
    async fn attempt(&self, input: In) -> Result<Self::Output, GuardError>;
}
