use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Default interpreter run behind a PTY evaluator.
pub const DEFAULT_COMMAND: &str = "/bin/sh";

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(std::io::Error),
    /// The interpreter never showed its first prompt.
    StartupTimeout,
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
            PtyError::StartupTimeout => write!(f, "interpreter did not show a prompt in time"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Owns a portable-pty child process, master, reader, and writer.
pub struct PtyHandle {
    _master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `program` with `args` on a new PTY.
    ///
    /// `TERM` is set to `dumb` so interpreters keep their output plain.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env("TERM", "dumb");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn {program}: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            _master: pair.master,
            reader: Some(reader),
            writer,
            child,
        })
    }

    /// Write bytes to the PTY master (input -> interpreter).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Extract the PTY reader for use in a dedicated reader thread.
    ///
    /// Reads block, so the reader must not live behind the same lock as the
    /// writer. Returns `None` if it was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                log::debug!("failed to kill PTY child: {e}");
            }
        }
    }
}
