//! State shared by the accept loop and every connection task.

use telshell_core::SessionTable;

use crate::config::ServerConfig;

pub struct ServerState {
    /// All live sessions, one per connection.
    pub sessions: SessionTable,
    pub config: ServerConfig,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            sessions: SessionTable::new(),
            config,
        }
    }
}
