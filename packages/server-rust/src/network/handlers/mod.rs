//! Route handlers and the state they share.

pub mod health;
pub mod tenant;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use tenant::{
    admin_context_handler, session_handler, tenant_context_handler, ContextView,
    DescribeContext, SessionView,
};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::db::Database;
use crate::guard::GuardPipeline;
use crate::identity::IdentityResolver;
use crate::rate_limit::RateLimitStore;

/// State extracted by every handler.
pub struct AppState<D: Database> {
    pub pipeline: Arc<GuardPipeline<D>>,
    pub identity: Arc<dyn IdentityResolver>,
    pub shutdown: Arc<ShutdownController>,
    /// Stores behind the mounted rate limiters, for health reporting.
    pub limiters: Vec<Arc<dyn RateLimitStore>>,
    pub start_time: Instant,
}

// Manual impl: deriving would require `D: Clone`.
impl<D: Database> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            identity: Arc::clone(&self.identity),
            shutdown: Arc::clone(&self.shutdown),
            limiters: self.limiters.clone(),
            start_time: self.start_time,
        }
    }
}
