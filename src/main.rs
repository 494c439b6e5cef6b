#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admin;
mod controller;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ingressh_k8s_client::ApiClient;
use ingressh_k8s_index::RoutingTable;
use ingressh_ssh::{ServerConfig, SshMetrics, SshServer};
use k8s_openapi::api::coordination::v1 as coordv1;
use kube::api::{Patch, PatchParams};
use kube::Api;
use prometheus_client::registry::Registry;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

// The election id the controller has always used.
const LEASE_NAME: &str = "af6811ad.kuberstein.io";
const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_GRACE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[clap(
    name = "ingressh",
    about = "SSH ingress controller for Kubernetes workloads"
)]
struct Args {
    #[clap(long, default_value = "ingressh=info,warn", env = "INGRESSH_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Path to the configuration file for the SSH server.
    #[clap(long)]
    ssh_config: Option<PathBuf>,

    /// The address the metric endpoint binds to.
    #[clap(long, default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// The address the probe endpoint binds to.
    #[clap(long, default_value = "0.0.0.0:8081")]
    health_probe_bind_address: SocketAddr,

    /// Enable leader election for the controller manager. Enabling this
    /// ensures there is only one active controller writing resources.
    #[clap(long)]
    leader_elect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        ssh_config,
        metrics_bind_address,
        health_probe_bind_address,
        leader_elect,
    } = Args::parse();

    let server_config = Arc::new(ServerConfig::load(ssh_config.as_deref())?);

    let mut prom = <Registry>::default();
    let ssh_metrics = SshMetrics::register(prom.sub_registry_with_prefix("ingressh_ssh"));
    let prom = Arc::new(prom);

    let runtime = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_client(client)
        .build()
        .await?;

    // One cancellation root per process: the runtime's shutdown signal
    // cancels it, and every session and the reconciler hang off it.
    let shutdown = CancellationToken::new();
    {
        let drain = runtime.shutdown_handle();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = drain.signaled().await;
            shutdown.cancel();
        });
    }

    let (ready_tx, ready_rx) = watch::channel(false);
    tokio::spawn(
        async move {
            if let Err(error) = admin::serve_probes(health_probe_bind_address, ready_rx).await {
                tracing::error!(%error, "probe server failed");
            }
        }
        .instrument(info_span!("probes")),
    );
    tokio::spawn(
        async move {
            if let Err(error) = admin::serve_metrics(metrics_bind_address, prom).await {
                tracing::error!(%error, "metrics server failed");
            }
        }
        .instrument(info_span!("metrics")),
    );

    let routes = RoutingTable::shared();

    info!("starting controller");
    let reconciler = {
        let client = runtime.client();
        let routes = routes.clone();
        let shutdown = shutdown.clone();
        let claims = if leader_elect {
            Some(init_lease(runtime.client()).await?)
        } else {
            None
        };
        tokio::spawn(
            async move {
                if let Some((mut claims, claimant)) = claims {
                    info!(lease = LEASE_NAME, "waiting to claim the controller lease");
                    let claimed = tokio::select! {
                        claim = claims.wait_for(|claim| claim.is_current_for(&claimant)) => claim.is_ok(),
                        _ = shutdown.cancelled() => false,
                    };
                    if !claimed {
                        return;
                    }
                    info!(lease = LEASE_NAME, "lease claimed");
                }
                controller::run(client, routes, shutdown).await;
            }
            .instrument(info_span!("ingresshes")),
        )
    };

    info!("starting SSH server");
    let ssh = {
        let server = SshServer::new(
            routes,
            ApiClient::new(runtime.client()),
            server_config,
            ssh_metrics,
            shutdown.clone(),
        );
        tokio::spawn(server.run().instrument(info_span!("ssh")))
    };

    let _ = ready_tx.send(true);

    // Either side failing takes the process down and the shutdown root with
    // it; the other side winds down through the cancellation.
    tokio::select! {
        result = runtime.run() => {
            if result.is_err() {
                bail!("Aborted");
            }
        }
        result = ssh => {
            shutdown.cancel();
            match result {
                Ok(result) => result.context("problem running the SSH server")?,
                Err(error) => bail!("SSH server task failed: {error}"),
            }
        }
        result = reconciler => {
            shutdown.cancel();
            if let Err(error) = result {
                bail!("controller task failed: {error}");
            }
        }
    }
    Ok(())
}

/// Creates the election Lease when absent and spawns the claimer.
async fn init_lease(
    client: kube::Client,
) -> Result<(
    watch::Receiver<Arc<kubert::lease::Claim>>,
    String,
)> {
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let claimant = std::env::var("HOSTNAME").unwrap_or_else(|_| "ingressh".to_string());

    // A resource version of "0" makes the apply create-only, so an existing
    // lease is left untouched.
    let lease = coordv1::Lease {
        metadata: kube::core::ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(namespace.clone()),
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/name".to_string(),
                    "ingressh".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = Api::<coordv1::Lease>::namespaced(client, &namespace);
    match api
        .patch(
            LEASE_NAME,
            &PatchParams {
                field_manager: Some("ingressh".to_string()),
                ..Default::default()
            },
            &Patch::Apply(lease),
        )
        .await
    {
        Ok(_) => info!(lease = LEASE_NAME, %namespace, "created Lease resource"),
        Err(kube::Error::Api(_)) => {
            tracing::debug!(lease = LEASE_NAME, "Lease already exists, no need to create it");
        }
        Err(error) => return Err(error.into()),
    }

    let manager = kubert::lease::LeaseManager::init(api, LEASE_NAME).await?;
    let (claims, _task) = manager
        .spawn(
            claimant.clone(),
            kubert::lease::ClaimParams {
                lease_duration: LEASE_DURATION,
                renew_grace_period: RENEW_GRACE_PERIOD,
            },
        )
        .await?;
    Ok((claims, claimant))
}
