//! Listener configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Where and how the HTTP listener is exposed.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Serves HTTPS when set.
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Transport-level deadline for a whole request, including guards.
    pub request_timeout: Duration,
    /// Time between the shutdown signal and closing the listener, during
    /// which readiness reports 503.
    pub readiness_grace: Duration,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            readiness_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// PEM certificate chain and private key for rustls.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}
