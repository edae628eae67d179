//! Fixed-window request throttling keyed by client address.
//!
//! - [`RateLimitStore`]: the narrow `check` interface over a keyed counter store
//! - [`memory`]: in-process [`DashMap`](dashmap::DashMap) store
//! - [`key`]: client-address derivation from forwarding headers
//! - [`layer`]: Tower middleware that enforces a policy and emits headers
//! - [`sweep`]: background purge of expired windows

pub mod key;
pub mod layer;
pub mod memory;
pub mod sweep;

use std::time::Duration;

use async_trait::async_trait;

pub use key::client_key;
pub use layer::{RateLimitLayer, RateLimitService};
pub use memory::MemoryRateLimitStore;
pub use sweep::RateLimitSweeper;

/// Requests allowed per client within one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum requests per window. `0` denies everything.
    pub limit: u32,
    /// Length of each window.
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow { limit: u32, remaining: u32 },
    Deny { limit: u32, retry_after_secs: u64 },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        match *self {
            Self::Allow { limit, .. } | Self::Deny { limit, .. } => limit,
        }
    }

    /// Quota left in the current window; always zero on deny.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        match *self {
            Self::Allow { remaining, .. } => remaining,
            Self::Deny { .. } => 0,
        }
    }
}

/// Keyed counter store behind the limiter.
///
/// Implementations must make the per-key increment-and-compare atomic with
/// respect to concurrent checks for the same key, and must always resolve to
/// a [`Decision`]. A distributed implementation that cannot reach its backend
/// decides for itself whether to fail open or closed.
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    /// Counts one request for `key` and decides whether it may proceed.
    async fn check(&self, key: &str, policy: &RateLimitPolicy) -> Decision;

    /// Drops every window whose reset time has passed. Returns how many
    /// windows were removed.
    async fn purge_expired(&self) -> usize;

    /// Number of client windows currently held.
    fn tracked_clients(&self) -> usize;
}

/// Whole seconds until `remaining` elapses, rounded up, never less than one.
#[must_use]
pub(crate) fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_nanos().div_ceil(1_000_000_000);
    u64::try_from(secs).unwrap_or(u64::MAX).max(1)
}
