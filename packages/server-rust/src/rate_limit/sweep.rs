//! Periodic purge of expired client windows.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::RateLimitStore;
use crate::worker::BackgroundRunnable;

/// Purges every registered store on each tick of its `BackgroundWorker`.
///
/// Cadence is independent of request traffic, so memory stays bounded even
/// when no request ever revisits an expired key.
pub struct RateLimitSweeper {
    stores: Vec<Arc<dyn RateLimitStore>>,
}

impl RateLimitSweeper {
    #[must_use]
    pub fn new(stores: Vec<Arc<dyn RateLimitStore>>) -> Self {
        Self { stores }
    }

    async fn sweep(&self) -> usize {
        let mut purged = 0;
        for store in &self.stores {
            purged += store.purge_expired().await;
        }
        if purged > 0 {
            debug!(purged, "purged expired rate-limit windows");
        }
        purged
    }
}

#[async_trait]
impl BackgroundRunnable for RateLimitSweeper {
    async fn on_tick(&mut self) {
        self.sweep().await;
    }
}
