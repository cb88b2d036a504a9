use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::discipline::{self, Action};
use crate::evaluator::Evaluator;
use crate::relay::{Chunk, OutputRelay, ShellMode};
use crate::transport::{Transport, TransportError};

/// Unique identifier for a session.
pub type SessionId = u64;

/// Default normal prompt.
pub const DEFAULT_NORMAL_PROMPT: &str = "> ";
/// Default prompt shown while a multi-line expression is open.
pub const DEFAULT_PENDING_PROMPT: &str = "... ";
/// Default sleep between output polls while an evaluation is silent.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const FAREWELL: &[u8] = b"Exiting the shell\n";

/// Errors from driving a session.
#[derive(Debug)]
pub enum SessionError {
    /// The session is already bound to a transport.
    AlreadyBound(SessionId),
    /// `submit` was called before a transport was bound.
    NotBound(SessionId),
    /// The session has exited and accepts no more input.
    Terminated(SessionId),
    /// No session with this id exists in the table.
    UnknownSession(SessionId),
    /// The OS refused to start a worker thread.
    WorkerSpawn(std::io::Error),
    Transport(TransportError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AlreadyBound(id) => write!(f, "session {id} is already bound to a transport"),
            SessionError::NotBound(id) => write!(f, "session {id} is not bound to a transport"),
            SessionError::Terminated(id) => write!(f, "session {id} has exited"),
            SessionError::UnknownSession(id) => write!(f, "session {id} not found"),
            SessionError::WorkerSpawn(err) => write!(f, "failed to start worker thread: {err}"),
            SessionError::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::WorkerSpawn(err) => Some(err),
            SessionError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

/// Where a session is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, no transport yet.
    Unbound,
    /// Bound and accepting input.
    Active,
    /// The exit command was received; waiting for the owner to reclaim it.
    Terminating,
    /// Workers joined, transport released.
    Closed,
}

/// What the caller should do after a `submit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Keep reading input.
    Continue,
    /// The session detached itself; reclaim it and stop feeding it.
    Terminating,
}

/// Per-session settings.
#[derive(Clone, Debug)]
pub struct ShellConfig {
    pub normal_prompt: String,
    pub pending_prompt: String,
    pub mode: ShellMode,
    pub poll_interval: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            normal_prompt: DEFAULT_NORMAL_PROMPT.to_string(),
            pending_prompt: DEFAULT_PENDING_PROMPT.to_string(),
            mode: ShellMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A running evaluation: the worker's handle plus the flag it raises when
/// `eval_expr` returns.
struct EvalWorker {
    handle: JoinHandle<()>,
    finished: Arc<AtomicBool>,
}

/// Raises the completion flag even if the evaluator panics, so the polling
/// worker still reaches the end of the cycle.
struct FinishGuard(Arc<AtomicBool>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Stops a session from outside its lock.
///
/// `submit` holds the session for as long as it waits on the previous cycle,
/// so an owner tearing the session down cannot lock it first. Closing through
/// this handle interrupts the evaluator and makes the session refuse new
/// cycles, which lets a waiting `submit` return.
#[derive(Clone)]
pub struct CloseHandle {
    evaluator: Arc<dyn Evaluator>,
    closing: Arc<AtomicBool>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.evaluator.interrupt();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// One interactive evaluation session.
///
/// Pairs an [`Evaluator`] with the [`Transport`] of one connected client.
/// Each evaluated line runs on its own evaluation worker while a polling
/// worker streams output back; [`submit`](Session::submit) returns as soon as
/// both are started so the caller can keep reading (and deliver interrupts).
pub struct Session {
    id: SessionId,
    evaluator: Arc<dyn Evaluator>,
    transport: Option<Arc<dyn Transport>>,
    relay: Arc<Mutex<OutputRelay>>,
    poll_interval: Duration,
    eval_worker: Option<EvalWorker>,
    poll_worker: Option<JoinHandle<()>>,
    poll_needed: bool,
    self_destruct: bool,
    closing: Arc<AtomicBool>,
    lifecycle: Lifecycle,
    cycles: u64,
}

impl Session {
    /// Create an unbound session around `evaluator`.
    pub fn new(id: SessionId, evaluator: Arc<dyn Evaluator>, config: ShellConfig) -> Self {
        let relay = OutputRelay::new(config.normal_prompt, config.pending_prompt, config.mode);
        Self {
            id,
            evaluator,
            transport: None,
            relay: Arc::new(Mutex::new(relay)),
            poll_interval: config.poll_interval,
            eval_worker: None,
            poll_worker: None,
            poll_needed: false,
            self_destruct: false,
            closing: Arc::new(AtomicBool::new(false)),
            lifecycle: Lifecycle::Unbound,
            cycles: 0,
        }
    }

    /// A handle that can close this session without locking it.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            evaluator: Arc::clone(&self.evaluator),
            closing: Arc::clone(&self.closing),
        }
    }

    /// Returns the session's unique identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Number of evaluation cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// True while an evaluation worker is still inside `eval_expr`.
    pub fn is_busy(&self) -> bool {
        self.eval_worker
            .as_ref()
            .is_some_and(|w| !w.finished.load(Ordering::Acquire))
    }

    /// Associate this session with `transport`.
    ///
    /// A session binds exactly once; a second bind is a setup bug and is
    /// refused without touching either transport.
    pub fn bind(&mut self, transport: Arc<dyn Transport>) -> Result<(), SessionError> {
        if self.transport.is_some() || self.lifecycle != Lifecycle::Unbound {
            return Err(SessionError::AlreadyBound(self.id));
        }
        transport.set_shell(Some(self.id));
        self.transport = Some(transport);
        self.lifecycle = Lifecycle::Active;
        Ok(())
    }

    /// Suppress (or restore) relayed output.
    pub fn hush_output(&mut self, hush: bool) {
        self.update_mode(ShellMode::SHOW_OUTPUT, !hush);
    }

    /// Suppress (or restore) prompts.
    pub fn hush_prompt(&mut self, hush: bool) {
        self.update_mode(ShellMode::SHOW_PROMPT, !hush);
    }

    fn update_mode(&mut self, flag: ShellMode, on: bool) {
        let mut relay = lock_relay(&self.relay);
        let mut mode = relay.mode();
        mode.set(flag, on);
        relay.set_mode(mode);
    }

    /// Handle one line of input received from the transport.
    ///
    /// Calls must not overlap; the transport's receive loop issues them one
    /// line at a time. Returns once the reply has been relayed or the evaluation and
    /// polling workers are running; the only blocking is the join of the
    /// previous cycle's workers, which keeps cycles ordered on the wire.
    pub fn submit(&mut self, line: &[u8]) -> Result<SubmitOutcome, SessionError> {
        let transport = match self.lifecycle {
            Lifecycle::Active if self.closing.load(Ordering::Acquire) => {
                return Err(SessionError::Terminated(self.id))
            }
            Lifecycle::Active => self.transport.clone().ok_or(SessionError::NotBound(self.id))?,
            Lifecycle::Unbound => return Err(SessionError::NotBound(self.id)),
            Lifecycle::Terminating | Lifecycle::Closed => return Err(SessionError::Terminated(self.id)),
        };

        self.poll_needed = false;
        let action = discipline::classify(line, self.evaluator.input_pending());
        log::debug!(
            "[session {}] line discipline: {} bytes -> {:?}",
            self.id,
            line.len(),
            action
        );

        let finished = self.apply(action)?;

        let relayed = match finished {
            Some(finished) if self.poll_needed => self.start_poll_worker(Arc::clone(&transport), finished),
            _ => self.relay_pending(transport.as_ref()),
        };

        if self.self_destruct {
            if let Err(e) = &relayed {
                log::warn!("[session {}] farewell not delivered: {e}", self.id);
            }
            transport.send_prompt();
            transport.set_shell(None);
            self.transport = None;
            self.lifecycle = Lifecycle::Terminating;
            log::info!("[session {}] exiting after {} cycles", self.id, self.cycles);
            return Ok(SubmitOutcome::Terminating);
        }

        relayed.map(|()| SubmitOutcome::Continue)
    }

    /// Carry out a classified action. Returns the completion flag of the
    /// evaluation worker when one was started.
    fn apply(&mut self, action: Action) -> Result<Option<Arc<AtomicBool>>, SessionError> {
        match action {
            Action::Evaluate(text) => self.start_eval(text).map(Some),
            Action::EvaluateEmpty => self.start_eval("\n".to_string()).map(Some),
            Action::InterruptAndAcknowledge(ack) => {
                self.evaluator.interrupt();
                self.evaluator.clear_pending();
                lock_relay(&self.relay).put_output(ack);
                Ok(None)
            }
            Action::IgnoreAndPrompt => {
                let pending = self.evaluator.input_pending();
                let mut relay = lock_relay(&self.relay);
                let prompt = relay.current_prompt(pending).to_string();
                relay.put_output(prompt.as_bytes());
                Ok(None)
            }
            Action::InterruptAndNewline => {
                self.evaluator.interrupt();
                self.evaluator.clear_pending();
                let mut relay = lock_relay(&self.relay);
                let prompt = relay.normal_prompt().to_string();
                relay.put_output(b"\n");
                relay.put_output(prompt.as_bytes());
                Ok(None)
            }
            Action::Exit => {
                self.self_destruct = true;
                let mut relay = lock_relay(&self.relay);
                if relay.mode().contains(ShellMode::SHOW_PROMPT) {
                    relay.put_output(FAREWELL);
                }
                Ok(None)
            }
        }
    }

    /// Start a new evaluation cycle once the previous one is fully relayed.
    fn start_eval(&mut self, text: String) -> Result<Arc<AtomicBool>, SessionError> {
        // Never run the evaluator on two threads at once, and never let a
        // new cycle's output overtake the tail of the previous one.
        self.join_workers();
        if self.closing.load(Ordering::Acquire) {
            return Err(SessionError::Terminated(self.id));
        }

        lock_relay(&self.relay).begin_cycle();
        self.poll_needed = true;
        self.evaluator.begin_eval();

        let finished = Arc::new(AtomicBool::new(false));
        let guard = FinishGuard(Arc::clone(&finished));
        let evaluator = Arc::clone(&self.evaluator);

        let handle = thread::Builder::new()
            .name(format!("eval-{}", self.id))
            .spawn(move || {
                let _guard = guard;
                evaluator.thread_init();
                evaluator.eval_expr(&text);
            })
            .map_err(SessionError::WorkerSpawn)?;

        self.cycles += 1;
        self.eval_worker = Some(EvalWorker {
            handle,
            finished: Arc::clone(&finished),
        });
        Ok(finished)
    }

    /// Start the worker that streams this cycle's output to the transport.
    fn start_poll_worker(
        &mut self,
        transport: Arc<dyn Transport>,
        finished: Arc<AtomicBool>,
    ) -> Result<(), SessionError> {
        // start_eval already joined the previous poller.
        let relay = Arc::clone(&self.relay);
        let evaluator = Arc::clone(&self.evaluator);
        let interval = self.poll_interval;
        let id = self.id;

        let handle = thread::Builder::new()
            .name(format!("poll-{id}"))
            .spawn(move || poll_loop(id, &relay, evaluator.as_ref(), transport.as_ref(), &finished, interval))
            .map_err(SessionError::WorkerSpawn)?;

        self.poll_worker = Some(handle);
        Ok(())
    }

    /// Synchronously send whatever the session queued itself. Never touches
    /// the evaluator.
    fn relay_pending(&self, transport: &dyn Transport) -> Result<(), SessionError> {
        loop {
            let chunk = lock_relay(&self.relay).drain_pending();
            if chunk.is_empty() {
                return Ok(());
            }
            transport.send(&chunk)?;
        }
    }

    /// Join the previous cycle's workers, evaluation first.
    fn join_workers(&mut self) {
        if let Some(worker) = self.eval_worker.take() {
            log::debug!("[session {}] waiting for evaluation worker", self.id);
            if worker.handle.join().is_err() {
                log::warn!("[session {}] evaluation worker panicked", self.id);
            }
        }
        if let Some(handle) = self.poll_worker.take() {
            log::debug!("[session {}] waiting for polling worker", self.id);
            if handle.join().is_err() {
                log::warn!("[session {}] polling worker panicked", self.id);
            }
        }
    }

    /// Release the transport and join both workers.
    ///
    /// Blocks until the current evaluation returns; callers closing a
    /// connection abruptly should [`interrupt`](Session::interrupt) first.
    pub fn shutdown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.set_shell(None);
        }
        self.join_workers();
        self.lifecycle = Lifecycle::Closed;
        log::debug!("[session {}] closed", self.id);
    }

    /// Interrupt the running evaluation, if any.
    pub fn interrupt(&self) {
        if self.is_busy() {
            self.evaluator.interrupt();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.join_workers();
    }
}

fn lock_relay(relay: &Mutex<OutputRelay>) -> MutexGuard<'_, OutputRelay> {
    // The relay holds plain buffers; a panic elsewhere cannot leave it torn.
    relay.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Body of the polling worker: forward chunks until the cycle is drained.
fn poll_loop(
    id: SessionId,
    relay: &Mutex<OutputRelay>,
    evaluator: &dyn Evaluator,
    transport: &dyn Transport,
    finished: &AtomicBool,
    interval: Duration,
) {
    loop {
        // Read the flag before polling so the last output is not skipped.
        let done = finished.load(Ordering::Acquire);
        let chunk = lock_relay(relay).next_chunk(evaluator, done);

        match chunk {
            Chunk::Output(data) => {
                if let Err(e) = transport.send(&data) {
                    log::warn!("[session {id}] dropping output: {e}");
                    return;
                }
            }
            Chunk::Wait => thread::sleep(interval),
            Chunk::Drained => return,
        }
    }
}
