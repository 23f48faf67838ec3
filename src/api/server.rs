//! Provisioning API Server
//!
//! Serves the REST router until shutdown. Shutdown cancels the token every
//! request derives its own from, so in-flight convergence waits end with
//! `Cancelled` instead of holding the server open.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::RestRouter;
use crate::error::{Error, Result};
use crate::provisioning::VolumeProvisioner;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    provisioner: Arc<VolumeProvisioner>,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, provisioner: Arc<VolumeProvisioner>) -> Self {
        Self {
            config,
            provisioner,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run the API server until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> Result<()> {
        let app = RestRouter::new(self.provisioner.clone(), self.shutdown.clone()).build();

        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!("Provisioning API listening on {}", self.config.rest_addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Provisioning API shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryCluster;
    use crate::domain::TokioClock;
    use crate::metrics::Metrics;
    use crate::provisioning::ProvisionerConfig;

    #[test]
    fn test_default_config() {
        assert_eq!(ApiServerConfig::default().rest_addr.port(), 8090);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let cluster = InMemoryCluster::new();
        let provisioner = Arc::new(VolumeProvisioner::new(
            cluster.clone(),
            cluster,
            Arc::new(TokioClock),
            Metrics::new().unwrap(),
            ProvisionerConfig::default(),
        ));
        let server = Arc::new(ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            },
            provisioner,
        ));

        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        server.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(server.shutdown_token().is_cancelled());
    }
}
