//! The accept loop.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::connection::handle_connection;
use crate::error::ServerError;
use crate::state::ServerState;

/// Bind the configured address and serve until `shutdown` completes.
pub async fn serve(
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&state.config.listen_addr).await?;
    log::info!("[server] listening on {}", listener.local_addr()?);
    serve_on(listener, state, shutdown).await
}

/// Accept connections on `listener` until `shutdown` completes, then close
/// every remaining session.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::warn!("[server] accept failed: {e}");
                        continue;
                    }
                };
                log::info!("[server] connection from {peer}");
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, state).await {
                        log::warn!("[server] connection {peer} ended with error: {e}");
                    }
                });
            }
        }
    }

    log::info!("[server] shutting down, closing {} sessions", state.sessions.len());
    tokio::task::spawn_blocking(move || state.sessions.close_all()).await?;
    Ok(())
}
