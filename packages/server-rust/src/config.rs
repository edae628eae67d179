//! Server-level configuration tree.

use std::time::Duration;

use crate::network::NetworkConfig;
use crate::rate_limit::RateLimitPolicy;

/// Top-level configuration for the `TenantGate` server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listener, TLS, and CORS settings.
    pub network: NetworkConfig,
    /// Per-client request throttling.
    pub rate_limit: RateLimitConfig,
    /// Connection pool and tenant binding settings.
    pub database: DatabaseConfig,
    /// Deadline for a tenant-scoped handler. On expiry the transaction is
    /// rolled back. `None` disables the deadline.
    pub handler_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            rate_limit: RateLimitConfig::default(),
            database: DatabaseConfig::default(),
            handler_timeout: Some(Duration::from_secs(15)),
        }
    }
}

/// Limits for the general API limiter and the tighter limiter layered on
/// sensitive sub-paths.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub general: RateLimitPolicy,
    pub sensitive: RateLimitPolicy,
    /// How often expired client windows are purged.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: RateLimitPolicy::new(100, Duration::from_secs(60)),
            sensitive: RateLimitPolicy::new(20, Duration::from_secs(60)),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Database pool configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `postgres://app@localhost/tenantgate`.
    pub url: String,
    pub max_connections: u32,
    /// Maximum wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Name of the transaction-local setting read by row-level-security policies.
    pub tenant_setting: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/tenantgate".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            tenant_setting: DEFAULT_TENANT_SETTING.to_string(),
        }
    }
}

/// Setting name used when none is configured.
pub const DEFAULT_TENANT_SETTING: &str = "app.current_tenant_id";
