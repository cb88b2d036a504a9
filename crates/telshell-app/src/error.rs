use telshell_core::SessionError;
use telshell_pty::PtyError;

/// Errors that stop the server or a single connection.
#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Pty(PtyError),
    Session(SessionError),
    /// A setting holds a value the server cannot use.
    Config(String),
    /// A blocking task panicked or was cancelled.
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Io(err) => write!(f, "I/O error: {err}"),
            ServerError::Db(err) => write!(f, "database error: {err}"),
            ServerError::Pty(err) => write!(f, "{err}"),
            ServerError::Session(err) => write!(f, "{err}"),
            ServerError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            ServerError::Join(err) => write!(f, "worker task failed: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(err) => Some(err),
            ServerError::Db(err) => Some(err),
            ServerError::Pty(err) => Some(err),
            ServerError::Session(err) => Some(err),
            ServerError::Join(err) => Some(err),
            ServerError::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(err)
    }
}

impl From<rusqlite::Error> for ServerError {
    fn from(err: rusqlite::Error) -> Self {
        ServerError::Db(err)
    }
}

impl From<PtyError> for ServerError {
    fn from(err: PtyError) -> Self {
        ServerError::Pty(err)
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        ServerError::Session(err)
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Join(err)
    }
}
