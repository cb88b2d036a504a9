//! In-memory evaluator and transport fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::evaluator::Evaluator;
use crate::session::SessionId;
use crate::transport::{Transport, TransportError};

/// Evaluator driven by a tiny command language:
///
/// - `slow <ms> <tag>`: emits `<tag>-start`, sleeps, emits `<tag>-end`
/// - `loop`: emits `tick` every few milliseconds until interrupted
/// - `open`: leaves a multi-line expression pending
/// - `fail`: emits `boom` and flags an error
/// - anything else is echoed back verbatim
#[derive(Default)]
pub(crate) struct ScriptedEvaluator {
    output: Mutex<VecDeque<String>>,
    evals: Mutex<Vec<String>>,
    pending: AtomicBool,
    error: AtomicBool,
    interrupted: AtomicBool,
    pub begins: AtomicUsize,
    pub thread_inits: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub clears: AtomicUsize,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every expression passed to `eval_expr`, in order.
    pub fn evals(&self) -> Vec<String> {
        self.evals.lock().unwrap().clone()
    }

    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    fn emit(&self, text: impl Into<String>) {
        self.output.lock().unwrap().push_back(text.into());
    }

    fn interruptible_sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if self.interrupted.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Evaluator for ScriptedEvaluator {
    fn begin_eval(&self) {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(false, Ordering::SeqCst);
        self.error.store(false, Ordering::SeqCst);
    }

    fn thread_init(&self) {
        self.thread_inits.fetch_add(1, Ordering::SeqCst);
    }

    fn eval_expr(&self, expr: &str) {
        self.evals.lock().unwrap().push(expr.to_string());
        let line = expr.trim_end_matches('\n');
        let mut words = line.split_whitespace();

        match words.next() {
            Some("slow") => {
                let ms: u64 = words.next().and_then(|w| w.parse().ok()).unwrap_or(50);
                let tag = words.next().unwrap_or("slow");
                self.emit(format!("{tag}-start\n"));
                self.interruptible_sleep(Duration::from_millis(ms));
                self.emit(format!("{tag}-end\n"));
            }
            Some("loop") => {
                while !self.interrupted.load(Ordering::SeqCst) {
                    self.emit("tick\n");
                    thread::sleep(Duration::from_millis(5));
                }
                self.emit("interrupted\n");
            }
            Some("open") => self.pending.store(true, Ordering::SeqCst),
            Some("fail") => {
                self.emit("boom\n");
                self.error.store(true, Ordering::SeqCst);
            }
            _ => {
                if !line.is_empty() {
                    self.emit(format!("{line}\n"));
                }
            }
        }
    }

    fn poll_result(&self) -> String {
        self.output.lock().unwrap().drain(..).collect()
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn clear_pending(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
    }

    fn input_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn eval_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }
}

/// Transport that records everything sent to it.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    written: Mutex<Vec<u8>>,
    shell: Mutex<Option<SessionId>>,
    closed: AtomicBool,
    pub sends: AtomicUsize,
    pub prompts: AtomicUsize,
    pub unbinds: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    pub fn shell(&self) -> Option<SessionId> {
        *self.shell.lock().unwrap()
    }

    /// Make every subsequent `send` fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Wait until the recorded output ends with `suffix`.
    pub fn wait_for_suffix(&self, suffix: &[u8], timeout: Duration) -> bool {
        self.wait_for(|out| out.ends_with(suffix), timeout)
    }

    /// Wait until `check` accepts the recorded output.
    pub fn wait_for(&self, check: impl Fn(&[u8]) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if check(&self.output()) {
                return true;
            }
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn set_shell(&self, shell: Option<SessionId>) {
        if shell.is_none() {
            self.unbinds.fetch_add(1, Ordering::SeqCst);
        }
        *self.shell.lock().unwrap() = shell;
    }

    fn send_prompt(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}
