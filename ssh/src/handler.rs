//! Per-connection protocol handling and the end-to-end session flow.
//!
//! The [`SessionHandler`] implements the SSH server callbacks: public-key
//! authentication against the routing table, channel bookkeeping, and the
//! hand-off of stdin/resize events into the spawned session task. The session
//! task resolves the target (automatically or via the wizard), attaches to
//! the container in the mode the config demands, and reports the outcome as
//! the SSH exit status.

use std::net::SocketAddr;
use std::sync::Arc;

use ingressh_core::{AccessConfig, SessionMode, SshTarget};
use ingressh_k8s_client::{attach_access_container, ApiClient, ClientError, TerminalSize};
use ingressh_k8s_index::SharedRoutes;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::authz::{Authorizer, PodAccess};
use crate::config::ServerConfig;
use crate::metrics::SshMetrics;
use crate::select::{Automatic, Interactive, Select, Selection, SessionIo};

pub struct SessionHandler {
    routes: SharedRoutes,
    client: ApiClient,
    config: Arc<ServerConfig>,
    metrics: SshMetrics,
    cancel: CancellationToken,
    peer: Option<SocketAddr>,

    username: Option<String>,
    configs: Vec<AccessConfig>,
    channel: Option<ChannelState>,
}

struct ChannelState {
    id: ChannelId,
    stdin_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    stdin_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    resize_tx: mpsc::UnboundedSender<TerminalSize>,
    resize_rx: Option<mpsc::UnboundedReceiver<TerminalSize>>,
    pty: Option<TerminalSize>,
    started: bool,
}

impl SessionHandler {
    pub(crate) fn new(
        routes: SharedRoutes,
        client: ApiClient,
        config: Arc<ServerConfig>,
        metrics: SshMetrics,
        cancel: CancellationToken,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            routes,
            client,
            config,
            metrics,
            cancel,
            peer,
            username: None,
            configs: Vec::new(),
            channel: None,
        }
    }

    fn state_mut(&mut self, channel: ChannelId) -> Option<&mut ChannelState> {
        self.channel.as_mut().filter(|state| state.id == channel)
    }

    fn start_session(
        &mut self,
        channel: ChannelId,
        command: Option<Vec<String>>,
        session: &mut Session,
    ) {
        let username = self.username.clone().unwrap_or_default();
        let configs = self.configs.clone();
        let client = self.client.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let cancel = self.cancel.clone();
        let handle = session.handle();

        let Some(state) = self.state_mut(channel) else {
            let _ = session.channel_failure(channel);
            return;
        };
        let (receivers, pty) = match (state.started, state.stdin_rx.take(), state.resize_rx.take())
        {
            (false, Some(stdin_rx), Some(resize_rx)) => ((stdin_rx, resize_rx), state.pty.take()),
            _ => {
                let _ = session.channel_failure(channel);
                return;
            }
        };
        state.started = true;
        let _ = session.channel_success(channel);

        let (stdin_rx, resize_rx) = receivers;
        let has_pty = pty.is_some();
        let run = SessionRun {
            io: SessionIo {
                handle,
                channel,
                stdin: stdin_rx,
                resize: resize_rx,
                last_size: pty,
                cancel,
            },
            username: username.clone(),
            configs,
            command,
            has_pty,
            client,
            config,
            metrics,
        };
        tokio::spawn(run_session(run).instrument(tracing::info_span!("session", user = %username)));
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        // Closing the connection unwinds every stream the session opened.
        self.cancel.cancel();
    }
}

impl russh::server::Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let line = public_key
            .to_openssh()
            .map(|line| line.trim().to_string())
            .unwrap_or_default();

        // No awaits while the table lock is held.
        let lookup = self.routes.read().get(&line);
        match lookup {
            Ok(configs) if !configs.is_empty() => {
                tracing::info!(user, peer = ?self.peer, "public key authenticated");
                self.username = Some(user.to_string());
                self.configs = configs;
                self.metrics.auth_succeeded();
                Ok(Auth::Accept)
            }
            _ => {
                tracing::warn!(user, peer = ?self.peer, "public key authentication failed");
                self.metrics.auth_failed();
                // The server's auth rejection delay holds the reply back to
                // slow down brute forcing of the table.
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() {
            return Ok(false);
        }
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        self.channel = Some(ChannelState {
            id: channel.id(),
            stdin_tx: Some(stdin_tx),
            stdin_rx: Some(stdin_rx),
            resize_tx,
            resize_rx: Some(resize_rx),
            pty: None,
            started: false,
        });
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.state_mut(channel) {
            let size = TerminalSize {
                width: col_width as u16,
                height: row_height as u16,
            };
            state.pty = Some(size);
        }
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.state_mut(channel) {
            let _ = state.resize_tx.send(TerminalSize {
                width: col_width as u16,
                height: row_height as u16,
            });
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.start_session(channel, None, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command: Vec<String> = String::from_utf8_lossy(data)
            .split_whitespace()
            .map(String::from)
            .collect();
        self.start_session(channel, (!command.is_empty()).then_some(command), session);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.state_mut(channel) {
            if let Some(stdin_tx) = &state.stdin_tx {
                let _ = stdin_tx.send(data.to_vec());
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the sender closes the container's stdin downstream.
        if let Some(state) = self.state_mut(channel) {
            state.stdin_tx = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.channel.as_ref().is_some_and(|state| state.id == channel) {
            self.cancel.cancel();
        }
        Ok(())
    }
}

pub(crate) struct SessionRun {
    io: SessionIo,
    username: String,
    configs: Vec<AccessConfig>,
    command: Option<Vec<String>>,
    has_pty: bool,
    client: ApiClient,
    config: Arc<ServerConfig>,
    metrics: SshMetrics,
}

async fn run_session(run: SessionRun) {
    let handle = run.io.handle.clone();
    let channel = run.io.channel;
    let metrics = run.metrics.clone();

    let (code, mode) = execute(run).await;
    metrics.session_finished(mode, code);

    let _ = handle.exit_status_request(channel, code).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

async fn execute(run: SessionRun) -> (u32, &'static str) {
    let SessionRun {
        mut io,
        username,
        configs,
        command,
        has_pty,
        client,
        config: server_config,
        metrics: _,
    } = run;

    let hint = SshTarget::from_username(&username);
    let authz = Authorizer::new(&configs, &client);

    // Interactive selection only makes sense with a terminal and an
    // incomplete target.
    let mut strategy: Box<dyn Select<ApiClient> + Send> = if has_pty && !hint.is_complete() {
        Box::new(Interactive)
    } else {
        Box::new(Automatic {
            username: username.clone(),
        })
    };

    let selection = match strategy.select(&mut io, &authz, &hint).await {
        Ok(selection) => selection,
        Err(error) => {
            io.send(&format!("Error: {error}\r\n")).await;
            return (10, "none");
        }
    };

    let Selection { target, access } = selection;
    let Some(access) = access.filter(|_| target.is_complete()) else {
        io.send("No container selected\r\n").await;
        return (13, "none");
    };

    let PodAccess { pod, mut config } = access;
    config.apply_defaults(&server_config.debug_image);
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let pod_name = pod.metadata.name.clone().unwrap_or_default();

    io.send(&format!(
        "Pod has been found. Connecting your SSH session to {namespace}/{pod_name} container {}...\r\n",
        target.container,
    ))
    .await;

    match config.session {
        SessionMode::Exec => {
            let command = command.unwrap_or_else(|| config.command.clone());
            if command.is_empty() {
                // Unlike Debug mode there is no image entrypoint to fall
                // back on.
                io.send("Command is not specified\r\n").await;
                return (2, "exec");
            }
            tracing::info!(container = %target.container, ?command, "executing command in the container");
            match splice(&client, io, &namespace, &pod_name, &target.container, Some(&command)).await
            {
                Ok(()) => (0, "exec"),
                Err(error) => {
                    tracing::error!(%error, "exec stream failed");
                    (3, "exec")
                }
            }
        }
        SessionMode::Debug => {
            let (pod, access_name) =
                match attach_access_container(&client, &pod, &target.container, &config).await {
                    Ok(attached) => attached,
                    Err(error) => {
                        tracing::error!(%error, "failed to set up the access container");
                        return (2, "debug");
                    }
                };
            let pod_name = pod.metadata.name.clone().unwrap_or_default();

            let result = match &command {
                Some(command) => {
                    tracing::info!(container = %access_name, ?command, "executing command in the ephemeral container");
                    splice(&client, io, &namespace, &pod_name, &access_name, Some(command)).await
                }
                None => {
                    tracing::info!(container = %access_name, "attaching SSH session to the ephemeral container");
                    splice(&client, io, &namespace, &pod_name, &access_name, None).await
                }
            };
            match result {
                Ok(()) => (0, "debug"),
                Err(error) => {
                    tracing::error!(%error, "session stream failed");
                    (3, "debug")
                }
            }
        }
    }
}

/// Splices the SSH session onto the container stream, waiting for the relay
/// of buffered output before the exit status goes out.
async fn splice(
    client: &ApiClient,
    io: SessionIo,
    namespace: &str,
    pod: &str,
    container: &str,
    command: Option<&Vec<String>>,
) -> Result<(), ClientError> {
    let (streams, writer) = io.into_streams();
    let result = match command {
        Some(command) => {
            client
                .exec(namespace, pod, container, command, streams)
                .await
        }
        None => client.attach(namespace, pod, container, streams).await,
    };
    let _ = writer.await;
    result
}
