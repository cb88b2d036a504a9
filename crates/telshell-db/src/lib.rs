//! telshell-db: persistent server settings for telshell.
//!
//! A single SQLite file holds a key/value `settings` table. The server reads
//! its listen address, prompts and evaluator choice from it at startup.

pub mod schema;
pub mod settings;

use rusqlite::Connection;
use std::path::Path;

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}

/// Open a throwaway database with the same schema.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::initialize(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file() {
        let dir = std::env::temp_dir().join(format!("telshell-db-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("telshell.db");

        {
            let conn = open(&path).unwrap();
            settings::set(&conn, "listen_addr", "0.0.0.0:9").unwrap();
        }
        let conn = open(&path).unwrap();
        assert_eq!(
            settings::get(&conn, "listen_addr").unwrap().as_deref(),
            Some("0.0.0.0:9")
        );

        drop(conn);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
