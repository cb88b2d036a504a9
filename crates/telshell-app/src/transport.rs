//! The TCP side of a session: outbound bytes go through a channel to the
//! connection's writer task.

use std::sync::{Mutex, PoisonError};

use telshell_core::{SessionId, Transport, TransportError};
use tokio::sync::mpsc;

pub struct TcpTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shell: Mutex<Option<SessionId>>,
    console_prompt: String,
}

impl TcpTransport {
    pub fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, console_prompt: String) -> Self {
        Self {
            outbound,
            shell: Mutex::new(None),
            console_prompt,
        }
    }

    /// The session currently fed by this connection, if any.
    pub fn shell(&self) -> Option<SessionId> {
        *self.shell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for TcpTransport {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.outbound
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    fn set_shell(&self, shell: Option<SessionId>) {
        *self.shell.lock().unwrap_or_else(PoisonError::into_inner) = shell;
    }

    fn send_prompt(&self) {
        if self.console_prompt.is_empty() {
            return;
        }
        if let Err(e) = self.send(self.console_prompt.as_bytes()) {
            log::debug!("[tcp] console prompt not sent: {e}");
        }
    }
}
