//! `TenantGate` server: per-client rate limiting, an authorization guard
//! chain, and tenant-bound database transactions behind an axum HTTP API.

pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod identity;
pub mod network;
pub mod rate_limit;
pub mod worker;

pub use config::{DatabaseConfig, RateLimitConfig, ServerConfig};
pub use db::{BoundTransaction, Database, DbError, Transaction};
pub use error::GuardError;
pub use guard::{Access, GuardPipeline, RequestContext, TenantHandler};
pub use identity::IdentityResolver;
pub use network::NetworkModule;
