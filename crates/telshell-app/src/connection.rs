//! One client connection: a reader that frames lines and feeds the session,
//! and a writer task that drains the transport's channel into the socket.
//!
//! Every call into the session table can block (starting an interpreter,
//! joining the previous cycle's workers), so each one runs on tokio's
//! blocking pool.

use std::net::SocketAddr;
use std::sync::Arc;

use telshell_core::{SessionError, SessionId, ShellMode, SubmitOutcome, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::ServerError;
use crate::framing::LineFramer;
use crate::state::ServerState;
use crate::transport::TcpTransport;

/// Serve one client until it disconnects or its session exits.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), ServerError> {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let transport = Arc::new(TcpTransport::new(tx, state.config.console_prompt.clone()));

    let result = run_session(reader, &transport, &state, peer).await;

    // The writer stops once every sender is gone: ours here, the session's
    // when it was closed or reclaimed.
    drop(transport);
    writer_task.await?;
    log::info!("[conn] {peer} disconnected");
    result
}

async fn run_session(
    reader: OwnedReadHalf,
    transport: &Arc<TcpTransport>,
    state: &Arc<ServerState>,
    peer: SocketAddr,
) -> Result<(), ServerError> {
    let id = match create_session(transport, state).await {
        Ok(id) => id,
        Err(e) => {
            let _ = transport.send(format!("telshell: {e}\n").as_bytes());
            return Err(e);
        }
    };
    log::info!("[conn] {peer} attached to session {id}");

    let shell = &state.config.shell;
    if shell.mode.contains(ShellMode::SHOW_PROMPT) {
        transport.send(shell.normal_prompt.as_bytes()).map_err(SessionError::from)?;
    }

    let result = read_loop(reader, state, id).await;

    // Still attached means the client left without exiting.
    if transport.shell() == Some(id) {
        let state = Arc::clone(state);
        tokio::task::spawn_blocking(move || state.sessions.close_session(id)).await?;
    }
    result
}

async fn create_session(
    transport: &Arc<TcpTransport>,
    state: &Arc<ServerState>,
) -> Result<SessionId, ServerError> {
    let state = Arc::clone(state);
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    tokio::task::spawn_blocking(move || -> Result<SessionId, ServerError> {
        let evaluator = state.config.make_evaluator()?;
        let id = state
            .sessions
            .create_session(evaluator, state.config.shell.clone(), transport)?;
        Ok(id)
    })
    .await?
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    state: &Arc<ServerState>,
    id: SessionId,
) -> Result<(), ServerError> {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if !framer.partial().is_empty() {
                log::debug!("[conn] session {id}: dropping unterminated input at EOF");
            }
            return Ok(());
        }

        for line in framer.push(&buf[..n]) {
            let state = Arc::clone(state);
            let outcome =
                tokio::task::spawn_blocking(move || state.sessions.submit(id, &line)).await??;
            if outcome == SubmitOutcome::Terminating {
                return Ok(());
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            log::debug!("[conn] write failed: {e}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
