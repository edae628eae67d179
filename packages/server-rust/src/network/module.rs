//! Server lifecycle with deferred startup.
//!
//! `new()` wires the guard pipeline and limiters, `start()` binds the
//! listener, and `serve()` runs until the shutdown future resolves, then
//! drains in-flight requests.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::TlsConfig;
use super::handlers::{
    admin_context_handler, health_handler, liveness_handler, readiness_handler, session_handler,
    tenant_context_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::config::ServerConfig;
use crate::db::Database;
use crate::guard::GuardPipeline;
use crate::identity::IdentityResolver;
use crate::rate_limit::{RateLimitLayer, RateLimitSweeper};
use crate::worker::BackgroundWorker;

/// Owns everything needed to serve the HTTP API for one database backend.
pub struct NetworkModule<D: Database> {
    config: ServerConfig,
    listener: Option<TcpListener>,
    state: AppState<D>,
    general: RateLimitLayer,
    sensitive: RateLimitLayer,
}

impl<D: Database> NetworkModule<D> {
    #[must_use]
    pub fn new(config: ServerConfig, db: Arc<D>, identity: Arc<dyn IdentityResolver>) -> Self {
        let general = RateLimitLayer::in_memory("general", config.rate_limit.general);
        let sensitive = RateLimitLayer::in_memory("sensitive", config.rate_limit.sensitive);
        let pipeline = GuardPipeline::new(db).with_handler_timeout(config.handler_timeout);

        let state = AppState {
            pipeline: Arc::new(pipeline),
            identity,
            shutdown: Arc::new(ShutdownController::new()),
            limiters: vec![general.store(), sensitive.store()],
            start_time: Instant::now(),
        };

        Self {
            config,
            listener: None,
            state,
            general,
            sensitive,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /v1/session` (authenticated)
    /// - `GET /v1/tenant/context` (tenant member)
    /// - `GET /v1/admin/context` (owner or admin)
    ///
    /// Every `/v1` route is behind the general limiter; `/v1/admin` is
    /// additionally behind the sensitive limiter.
    pub fn build_router(&self) -> Router {
        let admin = Router::new()
            .route("/context", get(admin_context_handler::<D>))
            .layer(self.sensitive.clone());

        let v1 = Router::new()
            .route("/session", get(session_handler::<D>))
            .route("/tenant/context", get(tenant_context_handler::<D>))
            .nest("/admin", admin)
            .layer(self.general.clone());

        Router::new()
            .route("/health", get(health_handler::<D>))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler::<D>))
            .nest("/v1", v1)
            .layer(build_http_layers(&self.config.network))
            .with_state(self.state.clone())
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.network.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.network.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests
    /// and stops the rate-limit sweeper.
    ///
    /// When `shutdown` resolves the server moves to `Draining` first and
    /// keeps accepting connections for `readiness_grace`, so readiness
    /// probes observe the 503 before the listener closes.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, TLS material cannot be
    /// loaded, or the server hits a fatal I/O error.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let router = self.build_router();
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let controller = self.state.shutdown;
        let network = self.config.network;

        let mut sweeper = BackgroundWorker::start(
            RateLimitSweeper::new(vec![self.general.store(), self.sensitive.store()]),
            self.config.rate_limit.sweep_interval,
        );

        let shutdown = drain_then_close(shutdown, Arc::clone(&controller), network.readiness_grace);

        controller.set_ready();
        let served = match &network.tls {
            Some(tls) => serve_tls(listener, router, tls, shutdown).await,
            None => serve_plain(listener, router, shutdown).await,
        };

        controller.begin_drain();
        if controller.wait_for_drain(network.drain_timeout).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        sweeper.stop().await;
        served
    }
}

/// Resolves once `signal` fired and the readiness grace period has passed.
async fn drain_then_close(
    signal: impl Future<Output = ()> + Send + 'static,
    controller: Arc<ShutdownController>,
    grace: Duration,
) {
    signal.await;
    controller.begin_drain();
    info!(grace_ms = grace.as_millis(), "shutdown requested, readiness now failing");
    tokio::time::sleep(grace).await;
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Reuses the bound listener through `axum-server` with rustls.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let handle = axum_server::Handle::new();
    let on_shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        on_shutdown.graceful_shutdown(None);
    });

    info!(%addr, "serving HTTPS");
    axum_server::from_tcp_rustls(listener.into_std()?, rustls)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
