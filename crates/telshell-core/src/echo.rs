//! A trivial evaluator that echoes its input back.
//!
//! Useful for exercising a transport without a real interpreter behind it. A
//! line ending in `\` continues onto the next line; the joined text is echoed
//! once the continuation ends. Lines starting with `!error` are echoed and
//! flagged as failed.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::evaluator::Evaluator;

#[derive(Default)]
struct EchoState {
    /// Continuation lines collected so far.
    buffer: String,
    /// Output not yet polled.
    output: String,
    error: bool,
}

#[derive(Default)]
pub struct EchoEvaluator {
    state: Mutex<EchoState>,
    interrupted: AtomicBool,
}

impl EchoEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EchoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Evaluator for EchoEvaluator {
    fn begin_eval(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    fn eval_expr(&self, expr: &str) {
        let mut state = self.lock();
        let line = expr.strip_suffix('\n').unwrap_or(expr);

        if let Some(head) = line.strip_suffix('\\') {
            state.buffer.push_str(head);
            state.buffer.push('\n');
            return;
        }

        state.buffer.push_str(line);
        let text = mem::take(&mut state.buffer);
        if self.interrupted.load(Ordering::Acquire) || text.is_empty() {
            state.error = false;
            return;
        }

        state.error = text.starts_with("!error");
        state.output.push_str(&text);
        state.output.push('\n');
    }

    fn poll_result(&self) -> String {
        mem::take(&mut self.lock().output)
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn clear_pending(&self) {
        self.lock().buffer.clear();
    }

    fn input_pending(&self) -> bool {
        !self.lock().buffer.is_empty()
    }

    fn eval_error(&self) -> bool {
        self.lock().error
    }
}
