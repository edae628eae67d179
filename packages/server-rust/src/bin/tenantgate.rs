//! `TenantGate` API server backed by `PostgreSQL`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tenantgate_server::config::{DatabaseConfig, RateLimitConfig, ServerConfig, DEFAULT_TENANT_SETTING};
use tenantgate_server::db::PgDatabase;
use tenantgate_server::identity::JwtIdentityResolver;
use tenantgate_server::network::{NetworkConfig, NetworkModule, TlsConfig};
use tenantgate_server::rate_limit::RateLimitPolicy;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tenantgate", version, about = "Multi-tenant API server")]
struct Args {
    #[arg(long, env = "TENANTGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TENANTGATE_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "TENANTGATE_DB_MAX_CONNECTIONS", default_value_t = 10)]
    db_max_connections: u32,

    /// Transaction-local setting read by row-level-security policies.
    #[arg(long, env = "TENANTGATE_TENANT_SETTING", default_value = DEFAULT_TENANT_SETTING)]
    tenant_setting: String,

    /// HS256 secret used to verify session tokens.
    #[arg(long, env = "TENANTGATE_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    #[arg(long, env = "TENANTGATE_GENERAL_LIMIT", default_value_t = 100)]
    general_limit: u32,

    #[arg(long, env = "TENANTGATE_SENSITIVE_LIMIT", default_value_t = 20)]
    sensitive_limit: u32,

    /// Rate-limit window in seconds, shared by both limiters.
    #[arg(long, env = "TENANTGATE_WINDOW_SECS", default_value_t = 60)]
    window_secs: u64,

    /// Handler deadline in seconds. 0 disables it.
    #[arg(long, env = "TENANTGATE_HANDLER_TIMEOUT_SECS", default_value_t = 15)]
    handler_timeout_secs: u64,

    /// Seconds readiness reports 503 before the listener closes on shutdown.
    #[arg(long, env = "TENANTGATE_READINESS_GRACE_SECS", default_value_t = 5)]
    readiness_grace_secs: u64,

    #[arg(long, env = "TENANTGATE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    #[arg(long, env = "TENANTGATE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "TENANTGATE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "TENANTGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TENANTGATE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let window = Duration::from_secs(self.window_secs);
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };

        ServerConfig {
            network: NetworkConfig {
                host: self.host.clone(),
                port: self.port,
                tls,
                cors_origins: self.cors_origins.clone(),
                readiness_grace: Duration::from_secs(self.readiness_grace_secs),
                ..NetworkConfig::default()
            },
            rate_limit: RateLimitConfig {
                general: RateLimitPolicy::new(self.general_limit, window),
                sensitive: RateLimitPolicy::new(self.sensitive_limit, window),
                ..RateLimitConfig::default()
            },
            database: DatabaseConfig {
                url: self.database_url.clone(),
                max_connections: self.db_max_connections,
                tenant_setting: self.tenant_setting.clone(),
                ..DatabaseConfig::default()
            },
            handler_timeout: (self.handler_timeout_secs > 0)
                .then(|| Duration::from_secs(self.handler_timeout_secs)),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let config = args.server_config();
    let db = PgDatabase::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    let db = Arc::new(db);
    let identity = Arc::new(JwtIdentityResolver::hs256(args.jwt_secret.as_bytes()));

    let mut module = NetworkModule::new(config, Arc::clone(&db), identity);
    let port = module.start().await?;
    info!(port, "tenantgate listening");

    module.serve(shutdown_signal()).await?;
    db.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, draining"),
        () = terminate => info!("received SIGTERM, draining"),
    }
}
