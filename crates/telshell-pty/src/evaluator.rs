//! An [`Evaluator`] that drives an interactive interpreter on a PTY.
//!
//! The interpreter's prompts are replaced by private markers, so the end of
//! an evaluation is simply "the next prompt appeared", and the primary prompt
//! reports the exit status of the command that just ran. A dedicated reader
//! thread owns the PTY reader, splits the stream on those markers and buffers
//! the plain-text output for [`poll_result`](Evaluator::poll_result).

use std::io::Read;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use telshell_core::Evaluator;

use crate::pty::{PtyError, PtyHandle, DEFAULT_COMMAND};
use crate::scanner::{PromptKind, PromptScanner, Segment, TextFilter};

/// How long to wait for the interpreter's first prompt.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// ETX: the tty turns this into SIGINT for the foreground process.
const INTERRUPT: &[u8] = b"\x03";

/// Sets the prompts to the scanner's markers and turns off echo. Written
/// through `printf` so the echoed command line does not contain the markers;
/// `$?` stays quoted so it is expanded each time the prompt is printed.
const SETUP: &[u8] = b"stty -echo; PS1=\"$(printf '\\001tsh-ready')\"'$?'\"$(printf '\\002')\"; PS2=\"$(printf '\\001tsh-more\\002')\"\n";

#[derive(Default)]
struct ReplState {
    /// Plain-text output not yet polled.
    output: String,
    /// Set by the reader when a prompt marker arrives; cleared when input is
    /// written.
    prompt: Option<PromptKind>,
    /// The last prompt was a continuation prompt.
    pending: bool,
    /// Exit status reported by the last primary prompt.
    status: i32,
    /// An `eval_expr` call is waiting for its prompt.
    busy: bool,
    /// Output is thrown away until the next primary prompt, after setup and
    /// after a cleared continuation.
    discard: bool,
    /// The next primary prompt answers a `^C` from `clear_pending` and must
    /// not end an evaluation.
    swallow_ready: bool,
    /// The interpreter closed the PTY.
    exited: bool,
}

struct Shared {
    state: Mutex<ReplState>,
    prompt_seen: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReplState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Evaluator backed by a POSIX-shell-compatible interpreter on a PTY.
pub struct PtyEvaluator {
    pty: Mutex<PtyHandle>,
    shared: Arc<Shared>,
}

impl PtyEvaluator {
    /// Spawn [`DEFAULT_COMMAND`].
    pub fn spawn_default() -> Result<Self, PtyError> {
        Self::spawn(DEFAULT_COMMAND, &[])
    }

    /// Spawn `program`, start its reader thread and wait for the first
    /// prompt.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, PtyError> {
        let mut pty = PtyHandle::spawn(program, args)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| PtyError::SpawnFailed("PTY reader already taken".to_string()))?;

        let shared = Arc::new(Shared {
            state: Mutex::new(ReplState {
                discard: true,
                ..ReplState::default()
            }),
            prompt_seen: Condvar::new(),
        });

        let reader_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(format!("pty-read-{}", program.rsplit('/').next().unwrap_or(program)))
            .spawn(move || read_loop(reader, &reader_shared))?;

        pty.write(SETUP)?;

        let state = shared.lock();
        let (mut state, timeout) = shared
            .prompt_seen
            .wait_timeout_while(state, STARTUP_TIMEOUT, |s| s.prompt.is_none() && !s.exited)
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() || state.exited {
            return Err(PtyError::StartupTimeout);
        }
        state.discard = false;
        state.prompt = None;
        state.output.clear();
        drop(state);

        log::info!("[pty] {program} ready");
        Ok(Self {
            pty: Mutex::new(pty),
            shared,
        })
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        self.pty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(data)
    }

    /// True once the interpreter has gone away.
    pub fn has_exited(&self) -> bool {
        self.shared.lock().exited
    }
}

impl Evaluator for PtyEvaluator {
    fn begin_eval(&self) {
        let mut state = self.shared.lock();
        state.prompt = None;
        state.busy = true;
    }

    fn eval_expr(&self, expr: &str) {
        {
            let mut state = self.shared.lock();
            if state.exited {
                state.busy = false;
                return;
            }
            state.busy = true;
        }

        if let Err(e) = self.write(expr.as_bytes()) {
            log::warn!("[pty] failed to write expression: {e}");
            let mut state = self.shared.lock();
            state.busy = false;
            state.output.push_str(&format!("{e}\n"));
            return;
        }

        let state = self.shared.lock();
        let mut state = self
            .shared
            .prompt_seen
            .wait_while(state, |s| s.prompt.is_none() && !s.exited)
            .unwrap_or_else(PoisonError::into_inner);
        state.busy = false;
    }

    fn poll_result(&self) -> String {
        mem::take(&mut self.shared.lock().output)
    }

    fn interrupt(&self) {
        if !self.shared.lock().busy {
            return;
        }
        if let Err(e) = self.write(INTERRUPT) {
            log::warn!("[pty] failed to send interrupt: {e}");
        }
    }

    /// Abandons an open multi-line expression without waiting for the
    /// interpreter: the reader drops whatever `^C` produces up to and
    /// including the next primary prompt.
    fn clear_pending(&self) {
        let mut state = self.shared.lock();
        if !state.pending || state.busy || state.exited {
            return;
        }

        if let Err(e) = self.write(INTERRUPT) {
            log::warn!("[pty] failed to clear pending input: {e}");
            return;
        }
        state.pending = false;
        state.prompt = None;
        state.output.clear();
        state.discard = true;
        state.swallow_ready = true;
    }

    fn input_pending(&self) -> bool {
        self.shared.lock().pending
    }

    fn eval_error(&self) -> bool {
        let state = self.shared.lock();
        state.exited || state.status != 0
    }
}

/// Body of the reader thread: runs until the PTY closes.
fn read_loop(mut reader: Box<dyn Read + Send>, shared: &Shared) {
    let mut scanner = PromptScanner::new();
    let mut filter = TextFilter::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let segments = scanner.feed(&buf[..n]);
        let mut state = shared.lock();
        for segment in segments {
            match segment {
                Segment::Output(bytes) => {
                    let text = filter.feed(&bytes);
                    if !state.discard {
                        state.output.push_str(&text);
                    }
                }
                Segment::Prompt(PromptKind::Ready(_)) if state.swallow_ready => {
                    state.swallow_ready = false;
                    state.discard = false;
                }
                Segment::Prompt(kind) => {
                    match kind {
                        PromptKind::Ready(status) => {
                            state.status = status;
                            state.pending = false;
                        }
                        PromptKind::More => state.pending = true,
                    }
                    state.prompt = Some(kind);
                    shared.prompt_seen.notify_all();
                }
            }
        }
    }

    log::debug!("[pty] reader finished");
    let mut state = shared.lock();
    state.exited = true;
    state.pending = false;
    state.output.push_str("\n[interpreter exited]\n");
    shared.prompt_seen.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn run(eval: &PtyEvaluator, expr: &str) -> String {
        eval.begin_eval();
        eval.eval_expr(expr);
        eval.poll_result()
    }

    #[test]
    fn test_spawn_default() {
        let eval = PtyEvaluator::spawn_default();
        assert!(eval.is_ok(), "Failed to start interpreter: {:?}", eval.err());
        let eval = eval.unwrap();
        assert!(!eval.input_pending());
        assert!(!eval.eval_error());
    }

    #[test]
    fn test_eval_output() {
        let eval = PtyEvaluator::spawn_default().unwrap();
        assert_eq!(run(&eval, "echo TELSHELL_EVAL_OK\n"), "TELSHELL_EVAL_OK\n");
        assert_eq!(run(&eval, "x=41; echo $((x + 1))\n"), "42\n");
    }

    #[test]
    fn test_multiline_expression() {
        let eval = PtyEvaluator::spawn_default().unwrap();

        assert_eq!(run(&eval, "if true; then\n"), "");
        assert!(eval.input_pending());

        assert_eq!(run(&eval, "echo inside\n"), "");
        assert!(eval.input_pending());

        assert_eq!(run(&eval, "fi\n"), "inside\n");
        assert!(!eval.input_pending());
    }

    #[test]
    fn test_clear_pending() {
        let eval = PtyEvaluator::spawn_default().unwrap();
        run(&eval, "if true; then\n");
        assert!(eval.input_pending());

        let started = Instant::now();
        eval.clear_pending();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!eval.input_pending());
        assert_eq!(run(&eval, "echo after\n"), "after\n");
    }

    #[test]
    fn test_exit_status_sets_error() {
        let eval = PtyEvaluator::spawn_default().unwrap();
        run(&eval, "false\n");
        assert!(eval.eval_error());
        run(&eval, "true\n");
        assert!(!eval.eval_error());
    }

    #[test]
    fn test_interrupt_running_evaluation() {
        let eval = Arc::new(PtyEvaluator::spawn_default().unwrap());
        eval.begin_eval();

        let worker = {
            let eval = Arc::clone(&eval);
            thread::spawn(move || eval.eval_expr("sleep 30\n"))
        };
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        eval.interrupt();
        worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!eval.has_exited());

        // Let the shell settle, then drop what the interrupt printed.
        thread::sleep(Duration::from_millis(100));
        eval.poll_result();
        assert_eq!(run(&eval, "echo back\n"), "back\n");
    }

    #[test]
    fn test_interrupt_idle_is_noop() {
        let eval = PtyEvaluator::spawn_default().unwrap();
        eval.interrupt();
        assert_eq!(run(&eval, "echo still\n"), "still\n");
    }

    #[test]
    fn test_output_streams_before_completion() {
        let eval = Arc::new(PtyEvaluator::spawn_default().unwrap());
        eval.begin_eval();

        let worker = {
            let eval = Arc::clone(&eval);
            thread::spawn(move || eval.eval_expr("echo first; sleep 1; echo second\n"))
        };

        let mut seen = String::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && !seen.contains("first") {
            seen.push_str(&eval.poll_result());
            thread::sleep(Duration::from_millis(20));
        }
        assert!(seen.contains("first"), "got: {seen:?}");
        assert!(!seen.contains("second"));

        worker.join().unwrap();
        seen.push_str(&eval.poll_result());
        assert_eq!(seen, "first\nsecond\n");
    }

    #[test]
    fn test_exit_is_reported() {
        let eval = PtyEvaluator::spawn_default().unwrap();
        let out = run(&eval, "exit\n");
        assert!(out.contains("[interpreter exited]"), "got: {out:?}");
        assert!(eval.has_exited());
        assert!(eval.eval_error());

        // Later evaluations return immediately.
        assert_eq!(run(&eval, "echo gone\n"), "");
    }
}
