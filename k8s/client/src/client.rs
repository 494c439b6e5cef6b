use async_trait::async_trait;
use futures::{SinkExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{AttachParams, AttachedProcess, ListParams, PostParams, WatchEvent, WatchParams};
use kube::{Api, Client, ResourceExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::terminal::TerminalSession;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A cluster API request failed; propagated verbatim to the user.
    #[error(transparent)]
    Api(#[from] kube::Error),

    #[error("failed to encode pod: {0}")]
    Encode(#[from] serde_json::Error),

    /// The orchestrator reported pod state this gateway cannot reason about.
    #[error("{0}")]
    Protocol(String),

    /// The exec/attach transport failed after setup.
    #[error("{0}")]
    Stream(String),
}

/// The listing capabilities the authorizer depends on, separated out so
/// tests can substitute a canned cluster.
#[async_trait]
pub trait ClusterClient {
    /// Names of the namespaces that exist in the cluster.
    async fn namespaces(&self) -> Result<Vec<String>, ClientError>;

    /// Pods in `namespace` matching `selector` (no label filtering when
    /// empty). A non-empty `name_hint` narrows the listing to the pod with
    /// that name via a field selector.
    async fn pods(
        &self,
        selector: &str,
        namespace: &str,
        name_hint: &str,
    ) -> Result<Vec<Pod>, ClientError>;
}

/// The SSH session side of an exec/attach splice.
///
/// Bytes received on the SSH channel arrive on `stdin`; everything the
/// container writes is pushed to `stdout`; `terminal` feeds window resizes
/// until the session is cancelled.
pub struct TerminalStreams {
    pub stdin: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stdout: mpsc::UnboundedSender<Vec<u8>>,
    pub terminal: TerminalSession,
    pub cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Replaces the pod's `ephemeralcontainers` subresource, returning the
    /// updated pod.
    pub async fn update_ephemeral_containers(
        &self,
        namespace: &str,
        name: &str,
        pod: &Pod,
    ) -> Result<Pod, ClientError> {
        let api = self.pods_api(namespace);
        let pod = api
            .replace_subresource(
                "ephemeralcontainers",
                name,
                &PostParams::default(),
                serde_json::to_vec(pod)?,
            )
            .await?;
        Ok(pod)
    }

    /// Opens a single-object watch on the pod, starting at its current
    /// resource version, and feeds each modification to `check` until it
    /// reports a terminal outcome.
    ///
    /// Any event other than a modification aborts the wait: during a
    /// readiness wait nothing else is expected, and anything else means the
    /// reasoning about the pod no longer holds.
    pub(crate) async fn wait_pod_modified<T>(
        &self,
        namespace: &str,
        pod: &Pod,
        mut check: impl FnMut(&Pod) -> Result<Option<T>, ClientError>,
    ) -> Result<T, ClientError> {
        let api = self.pods_api(namespace);
        let name = pod.name_any();
        let params = WatchParams::default().fields(&format!("metadata.name={name}"));
        let version = pod.resource_version().unwrap_or_default();
        let mut events = api.watch(&params, &version).await?.boxed();

        while let Some(event) = events.try_next().await? {
            match event {
                WatchEvent::Modified(pod) => {
                    if let Some(outcome) = check(&pod)? {
                        return Ok(outcome);
                    }
                }
                event => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected pod {name} event: {event:?}"
                    )));
                }
            }
        }
        Err(ClientError::Protocol(format!(
            "watch on pod {name} ended before the container became ready"
        )))
    }

    /// Runs `command` in the container, splicing the SSH session onto its
    /// terminal until either side closes or the session is cancelled.
    pub async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        io: TerminalStreams,
    ) -> Result<(), ClientError> {
        let api = self.pods_api(namespace);
        let process = api
            .exec(pod, command.iter().cloned(), &attach_params(container))
            .await?;
        stream_session(process, io).await
    }

    /// Attaches the SSH session to the container's existing terminal.
    pub async fn attach(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        io: TerminalStreams,
    ) -> Result<(), ClientError> {
        let api = self.pods_api(namespace);
        let process = api.attach(pod, &attach_params(container)).await?;
        stream_session(process, io).await
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    async fn namespaces(&self) -> Result<Vec<String>, ClientError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api.list(&ListParams::default()).await?;
        Ok(namespaces
            .items
            .into_iter()
            .map(|ns| ns.name_any())
            .collect())
    }

    async fn pods(
        &self,
        selector: &str,
        namespace: &str,
        name_hint: &str,
    ) -> Result<Vec<Pod>, ClientError> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        if !name_hint.is_empty() {
            params = params.fields(&format!("metadata.name={name_hint}"));
        }
        let pods = self.pods_api(namespace).list(&params).await?;
        Ok(pods.items)
    }
}

// A TTY merges the container's stderr into the terminal stream, and the API
// server rejects requesting both.
fn attach_params(container: &str) -> AttachParams {
    AttachParams {
        container: Some(container.to_string()),
        stdin: true,
        stdout: true,
        stderr: false,
        tty: true,
        ..Default::default()
    }
}

async fn stream_session(
    mut process: AttachedProcess,
    io: TerminalStreams,
) -> Result<(), ClientError> {
    let TerminalStreams {
        mut stdin,
        stdout,
        mut terminal,
        cancel,
    } = io;

    let mut container_stdout = process
        .stdout()
        .ok_or_else(|| ClientError::Stream("container stdout unavailable".to_string()))?;
    let mut container_stdin = process
        .stdin()
        .ok_or_else(|| ClientError::Stream("container stdin unavailable".to_string()))?;
    let resize_tx = process.terminal_size();
    let status = process.take_status();

    // Session stdin and terminal resizes flow into the container on their
    // own tasks; they end when the SSH side closes or the stream drops.
    let stdin_task = tokio::spawn(async move {
        while let Some(chunk) = stdin.recv().await {
            if container_stdin.write_all(&chunk).await.is_err() {
                return;
            }
        }
        let _ = container_stdin.shutdown().await;
    });
    let resize_task = tokio::spawn(async move {
        let Some(mut resize_tx) = resize_tx else { return };
        while let Some(size) = terminal.next().await {
            if resize_tx.send(size).await.is_err() {
                return;
            }
        }
    });

    // The container's terminal output drives the session lifetime: EOF here
    // means the remote side closed the stream.
    let pump_output = async {
        let mut buf = [0u8; 4096];
        loop {
            match container_stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdout.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = pump_output => {}
        _ = cancel.cancelled() => {
            stdin_task.abort();
            resize_task.abort();
            return Ok(());
        }
    }

    if let Some(status) = status {
        if let Some(status) = status.await {
            if status.status.as_deref() == Some("Failure") {
                let _ = process.join().await;
                return Err(ClientError::Stream(
                    status
                        .message
                        .unwrap_or_else(|| "command failed".to_string()),
                ));
            }
        }
    }
    process
        .join()
        .await
        .map_err(|e| ClientError::Stream(e.to_string()))?;
    Ok(())
}
