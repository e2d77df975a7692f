//! The proxy listener.
//!
//! Accepts connections on the configured port and spawns one session task
//! per client; each session owns its injector and its upstream connection.

use crate::error::ProxyError;
use crate::generator::{QueryGenerator, StandardQueryGenerator};
use crate::session;
use electric_core::ProxyConfig;
use std::sync::Arc;
use tokio::net::TcpListener;

/// The Electric Postgres proxy server.
pub struct ElectricProxy {
    config: ProxyConfig,
    generator: Arc<dyn QueryGenerator>,
}

impl ElectricProxy {
    /// Create a proxy with the stock bookkeeping-SQL generator.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_generator(config, Arc::new(StandardQueryGenerator))
    }

    /// Create a proxy with a custom generator (tests use a fixed-version one).
    pub fn with_generator(config: ProxyConfig, generator: Arc<dyn QueryGenerator>) -> Self {
        Self { config, generator }
    }

    /// Get a reference to the proxy configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the accept loop.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listen_addr = format!("{}:{}", self.config.listen_addr, self.config.port);

        if self.config.http_tunnel {
            tracing::info!("HTTP tunnel framing requested; the tunnel endpoint wraps this listener");
        }

        let listener =
            TcpListener::bind(&listen_addr)
                .await
                .map_err(|e| ProxyError::BindFailed {
                    address: listen_addr.clone(),
                    source: e,
                })?;

        let upstream_addr = format!(
            "{}:{}",
            self.config.upstream.host, self.config.upstream.port
        );
        tracing::info!(
            listen_addr = %listen_addr,
            upstream = %upstream_addr,
            "proxy listening"
        );

        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            tracing::debug!(peer = %peer_addr, "new connection");

            let config = self.config.clone();
            let generator = self.generator.clone();
            tokio::spawn(async move {
                if let Err(e) = session::run_session(socket, &config, generator).await {
                    tracing::error!(peer = %peer_addr, error = %e, "session ended with error");
                }
            });
        }
    }
}
