use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};

pub const LISTEN_ADDR: &str = "listen_addr";
pub const NORMAL_PROMPT: &str = "normal_prompt";
pub const PENDING_PROMPT: &str = "pending_prompt";
pub const SHOW_OUTPUT: &str = "show_output";
pub const SHOW_PROMPT: &str = "show_prompt";
pub const EVALUATOR: &str = "evaluator";
pub const SHELL_COMMAND: &str = "shell_command";
pub const POLL_INTERVAL_MS: &str = "poll_interval_ms";
pub const CONSOLE_PROMPT: &str = "console_prompt";

/// Values written on first launch. Existing values are never overwritten.
pub const DEFAULTS: &[(&str, &str)] = &[
    (LISTEN_ADDR, "127.0.0.1:17001"),
    (NORMAL_PROMPT, "> "),
    (PENDING_PROMPT, "... "),
    (SHOW_OUTPUT, "true"),
    (SHOW_PROMPT, "true"),
    (EVALUATOR, "pty"),
    (SHELL_COMMAND, "/bin/sh"),
    (POLL_INTERVAL_MS, "10"),
    (CONSOLE_PROMPT, ""),
];

pub fn get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Insert every entry of [`DEFAULTS`] that is not already present.
pub fn seed_defaults(conn: &Connection) -> rusqlite::Result<()> {
    for (key, value) in DEFAULTS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}

/// Read `key`, falling back to `default` when it is missing.
pub fn get_or(conn: &Connection, key: &str, default: &str) -> rusqlite::Result<String> {
    Ok(get(conn, key)?.unwrap_or_else(|| default.to_string()))
}

/// Read and parse `key`. Missing or unparsable values yield `default`.
pub fn get_parsed<T: FromStr>(conn: &Connection, key: &str, default: T) -> rusqlite::Result<T> {
    let Some(raw) = get(conn, key)? else {
        return Ok(default);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(value),
        Err(_) => {
            log::warn!("[settings] ignoring unparsable value {raw:?} for {key}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory;

    #[test]
    fn test_get_missing() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get(&conn, "nope").unwrap(), None);
    }

    #[test]
    fn test_set_overwrites() {
        let conn = open_in_memory().unwrap();
        set(&conn, NORMAL_PROMPT, "$ ").unwrap();
        set(&conn, NORMAL_PROMPT, "% ").unwrap();
        assert_eq!(get(&conn, NORMAL_PROMPT).unwrap().as_deref(), Some("% "));
    }

    #[test]
    fn test_seed_keeps_existing_values() {
        let conn = open_in_memory().unwrap();
        set(&conn, EVALUATOR, "echo").unwrap();
        seed_defaults(&conn).unwrap();

        assert_eq!(get(&conn, EVALUATOR).unwrap().as_deref(), Some("echo"));
        assert_eq!(
            get(&conn, LISTEN_ADDR).unwrap().as_deref(),
            Some("127.0.0.1:17001")
        );
        assert_eq!(get(&conn, CONSOLE_PROMPT).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_get_parsed_falls_back() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get_parsed(&conn, POLL_INTERVAL_MS, 10u64).unwrap(), 10);

        set(&conn, POLL_INTERVAL_MS, " 25 ").unwrap();
        assert_eq!(get_parsed(&conn, POLL_INTERVAL_MS, 10u64).unwrap(), 25);

        set(&conn, SHOW_OUTPUT, "sometimes").unwrap();
        assert!(get_parsed(&conn, SHOW_OUTPUT, true).unwrap());
    }

    #[test]
    fn test_get_or() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get_or(&conn, SHELL_COMMAND, "/bin/sh").unwrap(), "/bin/sh");
    }
}
