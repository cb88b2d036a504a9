mod config;
mod connection;
mod error;
mod framing;
mod server;
mod state;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use config::ServerConfig;
use error::ServerError;
use state::ServerState;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ServerError> {
    // Set up the ~/.telshell directory and open (or create) its database.
    let telshell_home = home_dir()
        .ok_or_else(|| ServerError::Config("could not determine home directory".to_string()))?
        .join(".telshell");
    std::fs::create_dir_all(&telshell_home)?;

    let db = telshell_db::open(&telshell_home.join("telshell.db"))?;
    // Seed default settings on first launch.
    telshell_db::settings::seed_defaults(&db)?;
    let config = ServerConfig::load(&db)?;
    drop(db);

    log::info!(
        "[server] evaluator {:?}, shell command {:?}",
        config.evaluator,
        config.shell_command
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let state = Arc::new(ServerState::new(config));

    runtime.block_on(server::serve(state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("[server] cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }))
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
