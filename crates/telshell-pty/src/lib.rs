//! telshell-pty: a PTY-backed evaluator for telshell sessions.
//!
//! Runs a real interactive interpreter (by default `/bin/sh`) on a
//! pseudo-terminal and exposes it through the core [`Evaluator`] trait.
//!
//! # Architecture
//!
//! - [`PtyHandle`] — Low-level PTY process management (spawn, write, reader hand-off).
//! - [`PromptScanner`] / [`TextFilter`] — Split PTY output on prompt markers and
//!   strip terminal escape sequences.
//! - [`PtyEvaluator`] — Ties the two together behind a reader thread.
//!
//! [`Evaluator`]: telshell_core::Evaluator

pub mod evaluator;
pub mod pty;
pub mod scanner;

pub use evaluator::PtyEvaluator;
pub use pty::{PtyError, PtyHandle, DEFAULT_COMMAND};
pub use scanner::{PromptKind, PromptScanner, Segment, TextFilter};
