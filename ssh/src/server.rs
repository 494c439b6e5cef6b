use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ingressh_k8s_client::ApiClient;
use ingressh_k8s_index::SharedRoutes;
use russh::keys::load_secret_key;
use russh::server::{Config, Server};
use russh::{MethodKind, MethodSet};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::handler::SessionHandler;
use crate::metrics::SshMetrics;

/// The SSH ingress server. Authentication is public-key only, resolved
/// against the routing table; each accepted connection gets its own
/// [`SessionHandler`] with a cancellation token derived from the server's.
pub struct SshServer {
    routes: SharedRoutes,
    client: ApiClient,
    config: Arc<ServerConfig>,
    metrics: SshMetrics,
    shutdown: CancellationToken,
}

impl SshServer {
    pub fn new(
        routes: SharedRoutes,
        client: ApiClient,
        config: Arc<ServerConfig>,
        metrics: SshMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            routes,
            client,
            config,
            metrics,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let host_key = load_secret_key(&self.config.host_key_file, None).with_context(|| {
            format!(
                "unable to read host key file {}",
                self.config.host_key_file.display(),
            )
        })?;

        let russh_config = Arc::new(Config {
            // Hold failed authentications for a second to slow down
            // brute-forcing of the authorized keys.
            auth_rejection_time: Duration::from_secs(1),
            inactivity_timeout: Some(Duration::from_secs(3600)),
            methods: MethodSet::from([MethodKind::PublicKey].as_slice()),
            keys: vec![host_key],
            ..Default::default()
        });

        let address = self.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("unable to listen socket at {address}"))?;
        tracing::info!(%address, "starting ssh ingress server");

        let shutdown = self.shutdown.clone();
        tokio::select! {
            result = self.run_on_socket(russh_config, &listener) => {
                result.context("ssh server terminated")
            }
            _ = shutdown.cancelled() => Ok(()),
        }
    }
}

impl Server for SshServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> SessionHandler {
        SessionHandler::new(
            self.routes.clone(),
            self.client.clone(),
            self.config.clone(),
            self.metrics.clone(),
            self.shutdown.child_token(),
            peer,
        )
    }
}
