//! The byte-stream endpoint a session relays its output to.

use crate::session::SessionId;

/// Errors from sending on a transport.
#[derive(Debug)]
pub enum TransportError {
    /// The remote end went away.
    Closed,
    IoError(std::io::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::IoError(err) => write!(f, "transport I/O error: {err}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::IoError(err) => Some(err),
            TransportError::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::IoError(err)
    }
}

/// A connection that a session is bound to.
///
/// `send` is called from the submitting thread for control replies and from
/// the polling worker for evaluator output; the session guarantees the two
/// never relay the same cycle concurrently.
pub trait Transport: Send + Sync {
    /// Write bytes to the remote end.
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Bind (`Some`) or unbind (`None`) the session this transport feeds.
    /// After an unbind the transport must not call into the session again.
    fn set_shell(&self, shell: Option<SessionId>);

    /// Transport-level hook run once when a session exits, before it is
    /// unbound.
    fn send_prompt(&self);
}
