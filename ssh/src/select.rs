//! Target selection strategies: the automatic first-authorized pick and the
//! interactive wizard, behind one interface so the session handler can
//! dispatch on whether a usable terminal is present.

use crate::authz::{Authorizer, AuthzError, PodAccess};
use crate::keys::KeyParser;
use crate::wizard::{StageError, Step, Wizard};
use async_trait::async_trait;
use ingressh_core::SshTarget;
use ingressh_k8s_client::{ClusterClient, TerminalSession, TerminalSize, TerminalStreams};
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// The SSH-channel side of a session: writes go through the connection
/// handle, reads come from the channels the protocol handler feeds.
pub(crate) struct SessionIo {
    pub(crate) handle: Handle,
    pub(crate) channel: ChannelId,
    pub(crate) stdin: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) resize: mpsc::UnboundedReceiver<TerminalSize>,
    pub(crate) last_size: Option<TerminalSize>,
    pub(crate) cancel: CancellationToken,
}

impl SessionIo {
    pub(crate) async fn send(&self, text: &str) {
        let _ = self
            .handle
            .data(self.channel, CryptoVec::from_slice(text.as_bytes()))
            .await;
    }

    /// Converts the session side into the container-facing stream bundle,
    /// spawning the task that pumps container output back onto the channel.
    /// The returned handle completes once all output has been relayed.
    pub(crate) fn into_streams(self) -> (TerminalStreams, tokio::task::JoinHandle<()>) {
        let SessionIo {
            handle,
            channel,
            stdin,
            resize,
            last_size,
            cancel,
        } = self;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = tokio::spawn(async move {
            while let Some(chunk) = out_rx.recv().await {
                if handle.data(channel, CryptoVec::from(chunk)).await.is_err() {
                    break;
                }
            }
        });

        let terminal = TerminalSession::new(resize, cancel.clone(), last_size);
        (
            TerminalStreams {
                stdin,
                stdout: out_tx,
                terminal,
                cancel,
            },
            writer,
        )
    }
}

/// A resolved selection. The target may be incomplete when no candidate
/// remained or the user cancelled; the handler reports that as "no container
/// selected" rather than an error.
pub(crate) struct Selection {
    pub(crate) target: SshTarget,
    pub(crate) access: Option<PodAccess>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SelectError {
    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("{0}")]
    Wizard(String),
}

impl From<StageError> for SelectError {
    fn from(error: StageError) -> Self {
        match error {
            StageError::Authz(error) => SelectError::Authz(error),
            StageError::Empty(message) => SelectError::Wizard(message),
        }
    }
}

#[async_trait]
pub(crate) trait Select<C: ClusterClient + Sync>: Send {
    async fn select(
        &mut self,
        io: &mut SessionIo,
        authz: &Authorizer<'_, C>,
        hint: &SshTarget,
    ) -> Result<Selection, SelectError>;
}

/// Connects to the first authorized namespace/pod/container, narrowed by the
/// hint where one was given.
pub(crate) struct Automatic {
    pub(crate) username: String,
}

#[async_trait]
impl<C: ClusterClient + Sync> Select<C> for Automatic {
    async fn select(
        &mut self,
        io: &mut SessionIo,
        authz: &Authorizer<'_, C>,
        hint: &SshTarget,
    ) -> Result<Selection, SelectError> {
        io.send(&format!(
            "Hello {}, please wait while we are searching pods to set SSH connection to\r\n",
            self.username,
        ))
        .await;
        io.send("Note that at present you will connect to the first authorized pod\r\n")
            .await;

        let mut target = SshTarget::default();

        let namespaces = authz.namespaces(&hint.namespace).await?;
        let Some(namespace) = namespaces.into_iter().next() else {
            return Ok(Selection {
                target,
                access: None,
            });
        };
        target.namespace = namespace;

        let access = authz.pods(&target.namespace, &hint.pod).await?;
        let Some(access) = access.into_iter().next() else {
            return Ok(Selection {
                target,
                access: None,
            });
        };
        target.pod = access.pod.metadata.name.clone().unwrap_or_default();

        let containers = authz.containers(&access.pod, &access.config.containers, &hint.container)?;
        let Some(container) = containers.into_iter().next() else {
            return Ok(Selection {
                target,
                access: Some(access),
            });
        };
        target.container = container;

        Ok(Selection {
            target,
            access: Some(access),
        })
    }
}

enum IoEvent {
    Cancelled,
    Stdin(Option<Vec<u8>>),
    Resize(Option<TerminalSize>),
}

/// Runs the wizard event loop over the SSH channel.
pub(crate) struct Interactive;

#[async_trait]
impl<C: ClusterClient + Sync> Select<C> for Interactive {
    async fn select(
        &mut self,
        io: &mut SessionIo,
        authz: &Authorizer<'_, C>,
        hint: &SshTarget,
    ) -> Result<Selection, SelectError> {
        let mut wizard = Wizard::new(authz, hint, io.last_size.as_ref().map(|size| size.width));
        wizard.start().await?;

        // Shortcut when the cascade of singletons already settled the
        // target: no UI is shown at all.
        if wizard.is_settled() {
            let (target, access) = wizard.result();
            return Ok(Selection { target, access });
        }

        let mut parser = KeyParser::default();
        io.send(&format!("{CLEAR_SCREEN}{}", wizard.view())).await;

        'outer: loop {
            let event = tokio::select! {
                _ = io.cancel.cancelled() => IoEvent::Cancelled,
                chunk = io.stdin.recv() => IoEvent::Stdin(chunk),
                size = io.resize.recv() => IoEvent::Resize(size),
            };
            match event {
                // A closed input or resize channel means the connection
                // handler is gone; there is nobody left to choose.
                IoEvent::Cancelled | IoEvent::Stdin(None) | IoEvent::Resize(None) => break,
                IoEvent::Stdin(Some(chunk)) => {
                    let mut redraw = false;
                    for key in parser.feed(&chunk) {
                        match wizard.handle_key(key).await {
                            Step::Done => {
                                io.send(&format!("{CLEAR_SCREEN}{}\r\n", wizard.view())).await;
                                break 'outer;
                            }
                            Step::Redraw => redraw = true,
                            Step::Idle => {}
                        }
                    }
                    if redraw {
                        io.send(&format!("{CLEAR_SCREEN}{}", wizard.view())).await;
                    }
                }
                IoEvent::Resize(Some(size)) => {
                    wizard.set_width(size.width);
                    io.last_size = Some(size);
                    io.send(&format!("{CLEAR_SCREEN}{}", wizard.view())).await;
                }
            }
        }

        let (target, access) = wizard.result();
        Ok(Selection { target, access })
    }
}
