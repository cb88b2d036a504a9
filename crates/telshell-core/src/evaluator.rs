//! The capability set a session needs from an expression evaluator.

/// A pluggable evaluation backend (an interpreter, a shell, ...).
///
/// One instance is shared between the thread that calls
/// [`Session::submit`](crate::Session::submit), the evaluation worker and the
/// polling worker, so every method takes `&self`. The session never runs two
/// evaluations at once, but [`interrupt`](Evaluator::interrupt),
/// [`poll_result`](Evaluator::poll_result) and
/// [`input_pending`](Evaluator::input_pending) may be called while
/// [`eval_expr`](Evaluator::eval_expr) is running on another thread.
pub trait Evaluator: Send + Sync {
    /// Prepare for a new evaluation. Called on the submitting thread, before
    /// the evaluation worker starts.
    fn begin_eval(&self);

    /// Per-thread setup, run on the evaluation worker before `eval_expr`.
    fn thread_init(&self) {}

    /// Evaluate one line of input. May block for as long as the expression
    /// runs.
    fn eval_expr(&self, expr: &str);

    /// Output produced since the last call. Empty when nothing is buffered.
    fn poll_result(&self) -> String;

    /// Ask the running evaluation to stop. Must be safe to call concurrently
    /// with `eval_expr`.
    fn interrupt(&self);

    /// Discard any partially accumulated multi-line input.
    fn clear_pending(&self);

    /// True while a multi-line expression is still open.
    fn input_pending(&self) -> bool;

    /// True if the most recent evaluation ended in an error.
    fn eval_error(&self) -> bool;
}
