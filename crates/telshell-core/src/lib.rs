//! telshell-core: line discipline and evaluation sessions for telshell.
//!
//! This crate sits between a byte-stream transport (a telnet or netcat
//! connection) and a pluggable expression evaluator. It filters control
//! sequences out of incoming lines, runs evaluations one at a time on a
//! worker thread, and streams their output back while the caller keeps
//! reading the connection.
//!
//! # Architecture
//!
//! - [`discipline`] — Classifies a raw input line into an [`Action`].
//! - [`OutputRelay`] — Orders queued text, evaluator output and prompts.
//! - [`Session`] — Owns the evaluation and polling workers for one client.
//! - [`SessionTable`] — Owns all sessions and reclaims the ones that exit.
//! - [`Evaluator`] / [`Transport`] — The two capabilities a session consumes.

pub mod discipline;
pub mod echo;
pub mod evaluator;
pub mod relay;
pub mod session;
pub mod table;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use discipline::{classify, Action};
pub use echo::EchoEvaluator;
pub use evaluator::Evaluator;
pub use relay::{Chunk, OutputRelay, ShellMode};
pub use session::{CloseHandle, Lifecycle, Session, SessionError, SessionId, ShellConfig, SubmitOutcome};
pub use table::SessionTable;
pub use transport::{Transport, TransportError};
