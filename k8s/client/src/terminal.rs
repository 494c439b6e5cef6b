use kube::api::TerminalSize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Terminal plumbing for exec and attach streams.
///
/// Window-resize events from the SSH `pty-req`/`window-change` requests are
/// delivered through [`next`](Self::next); the session's cancellation is the
/// carrier that unwinds the consumer when the SSH side goes away.
pub struct TerminalSession {
    resize: mpsc::UnboundedReceiver<TerminalSize>,
    cancel: CancellationToken,
    initial: Option<TerminalSize>,
}

impl TerminalSession {
    /// `initial` is the size granted with the PTY request; it is yielded
    /// before any window-change event so the container starts correctly
    /// sized.
    pub fn new(
        resize: mpsc::UnboundedReceiver<TerminalSize>,
        cancel: CancellationToken,
        initial: Option<TerminalSize>,
    ) -> Self {
        Self {
            resize,
            cancel,
            initial,
        }
    }

    /// Returns the next window size, or `None` once the session is
    /// cancelled or the resize source is gone.
    pub async fn next(&mut self) -> Option<TerminalSize> {
        if let Some(size) = self.initial.take() {
            return Some(size);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            size = self.resize.recv() => size,
        }
    }
}
