//! Server configuration, read from the settings table at startup.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use telshell_core::{EchoEvaluator, Evaluator, ShellConfig, ShellMode};
use telshell_db::settings;
use telshell_pty::{PtyEvaluator, DEFAULT_COMMAND};

use crate::error::ServerError;

/// Which backend each connection gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluatorKind {
    Pty,
    Echo,
}

impl FromStr for EvaluatorKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pty" => Ok(EvaluatorKind::Pty),
            "echo" => Ok(EvaluatorKind::Echo),
            other => Err(ServerError::Config(format!(
                "unknown evaluator {other:?} (expected \"pty\" or \"echo\")"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub shell: ShellConfig,
    pub evaluator: EvaluatorKind,
    /// Program and arguments for the PTY backend.
    pub shell_command: Vec<String>,
    /// Sent by the connection when its session exits.
    pub console_prompt: String,
}

impl ServerConfig {
    /// Read every setting, falling back to the built-in defaults.
    pub fn load(conn: &Connection) -> Result<Self, ServerError> {
        let defaults = ShellConfig::default();

        let mut mode = ShellMode::empty();
        mode.set(
            ShellMode::SHOW_OUTPUT,
            settings::get_parsed(conn, settings::SHOW_OUTPUT, true)?,
        );
        mode.set(
            ShellMode::SHOW_PROMPT,
            settings::get_parsed(conn, settings::SHOW_PROMPT, true)?,
        );

        let poll_ms = settings::get_parsed(
            conn,
            settings::POLL_INTERVAL_MS,
            defaults.poll_interval.as_millis() as u64,
        )?;

        let shell = ShellConfig {
            normal_prompt: settings::get_or(conn, settings::NORMAL_PROMPT, &defaults.normal_prompt)?,
            pending_prompt: settings::get_or(conn, settings::PENDING_PROMPT, &defaults.pending_prompt)?,
            mode,
            poll_interval: Duration::from_millis(poll_ms.max(1)),
        };

        let evaluator = settings::get_or(conn, settings::EVALUATOR, "pty")?.parse()?;

        let shell_command: Vec<String> = settings::get_or(conn, settings::SHELL_COMMAND, DEFAULT_COMMAND)?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if shell_command.is_empty() {
            return Err(ServerError::Config("shell_command is empty".to_string()));
        }

        Ok(Self {
            listen_addr: settings::get_or(conn, settings::LISTEN_ADDR, "127.0.0.1:17001")?,
            shell,
            evaluator,
            shell_command,
            console_prompt: settings::get_or(conn, settings::CONSOLE_PROMPT, "")?,
        })
    }

    /// Build a fresh evaluator for one connection. Blocks while a PTY
    /// interpreter starts up.
    pub fn make_evaluator(&self) -> Result<Arc<dyn Evaluator>, ServerError> {
        match self.evaluator {
            EvaluatorKind::Echo => Ok(Arc::new(EchoEvaluator::new())),
            EvaluatorKind::Pty => {
                let (program, args) = self
                    .shell_command
                    .split_first()
                    .ok_or_else(|| ServerError::Config("shell_command is empty".to_string()))?;
                Ok(Arc::new(PtyEvaluator::spawn(program, args)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = telshell_db::open_in_memory().unwrap();
        settings::seed_defaults(&conn).unwrap();
        conn
    }

    #[test]
    fn test_load_defaults() {
        let config = ServerConfig::load(&seeded()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:17001");
        assert_eq!(config.shell.normal_prompt, "> ");
        assert_eq!(config.shell.pending_prompt, "... ");
        assert_eq!(config.shell.mode, ShellMode::all());
        assert_eq!(config.shell.poll_interval, Duration::from_millis(10));
        assert_eq!(config.evaluator, EvaluatorKind::Pty);
        assert_eq!(config.shell_command, vec!["/bin/sh".to_string()]);
        assert_eq!(config.console_prompt, "");
    }

    #[test]
    fn test_load_unseeded_uses_defaults() {
        let conn = telshell_db::open_in_memory().unwrap();
        let config = ServerConfig::load(&conn).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:17001");
        assert_eq!(config.evaluator, EvaluatorKind::Pty);
    }

    #[test]
    fn test_load_overrides() {
        let conn = seeded();
        settings::set(&conn, settings::EVALUATOR, "echo").unwrap();
        settings::set(&conn, settings::SHOW_PROMPT, "false").unwrap();
        settings::set(&conn, settings::SHELL_COMMAND, "/bin/bash --norc -i").unwrap();
        settings::set(&conn, settings::POLL_INTERVAL_MS, "0").unwrap();

        let config = ServerConfig::load(&conn).unwrap();
        assert_eq!(config.evaluator, EvaluatorKind::Echo);
        assert_eq!(config.shell.mode, ShellMode::SHOW_OUTPUT);
        assert_eq!(config.shell_command, vec!["/bin/bash", "--norc", "-i"]);
        assert_eq!(config.shell.poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_unknown_evaluator() {
        let conn = seeded();
        settings::set(&conn, settings::EVALUATOR, "python").unwrap();
        assert!(matches!(ServerConfig::load(&conn), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_empty_shell_command() {
        let conn = seeded();
        settings::set(&conn, settings::SHELL_COMMAND, "   ").unwrap();
        assert!(matches!(ServerConfig::load(&conn), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_make_echo_evaluator() {
        let conn = seeded();
        settings::set(&conn, settings::EVALUATOR, "echo").unwrap();
        let eval = ServerConfig::load(&conn).unwrap().make_evaluator().unwrap();
        eval.eval_expr("hi\n");
        assert_eq!(eval.poll_result(), "hi\n");
    }
}
