//! Output relay: decides what the next chunk sent to the transport is.
//!
//! Sources are consulted in a fixed order: text queued by the session itself
//! (acknowledgments, farewells), then whatever the evaluator has buffered,
//! then, once per cycle and only after the evaluation has finished, the
//! terminal prompt.

use std::mem;

use bitflags::bitflags;

use crate::evaluator::Evaluator;

bitflags! {
    /// Quiet-mode toggles for a session.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ShellMode: u8 {
        /// Relay the evaluator's results.
        const SHOW_OUTPUT = 0b0000_0001;
        /// Send prompts at the end of each cycle.
        const SHOW_PROMPT = 0b0000_0010;
    }
}

impl Default for ShellMode {
    fn default() -> Self {
        ShellMode::all()
    }
}

/// One step of output polling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes to hand to the transport.
    Output(Vec<u8>),
    /// The evaluation is still running and has nothing buffered yet.
    Wait,
    /// The cycle is fully drained. Repeats until the next cycle begins.
    Drained,
}

pub struct OutputRelay {
    normal_prompt: String,
    pending_prompt: String,
    mode: ShellMode,
    pending_output: Vec<u8>,
    /// Latched once the terminal prompt for the current cycle was produced.
    eval_done: bool,
}

impl OutputRelay {
    pub fn new(normal_prompt: impl Into<String>, pending_prompt: impl Into<String>, mode: ShellMode) -> Self {
        Self {
            normal_prompt: normal_prompt.into(),
            pending_prompt: pending_prompt.into(),
            mode,
            pending_output: Vec::new(),
            eval_done: true,
        }
    }

    pub fn mode(&self) -> ShellMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ShellMode) {
        self.mode = mode;
    }

    pub fn normal_prompt(&self) -> &str {
        &self.normal_prompt
    }

    /// The prompt matching the evaluator's state, or `""` when prompts are
    /// hushed.
    pub fn current_prompt(&self, input_pending: bool) -> &str {
        if !self.mode.contains(ShellMode::SHOW_PROMPT) {
            return "";
        }
        if input_pending {
            &self.pending_prompt
        } else {
            &self.normal_prompt
        }
    }

    /// Queue locally produced text.
    pub fn put_output(&mut self, data: &[u8]) {
        self.pending_output.extend_from_slice(data);
    }

    /// Take everything queued locally, leaving the evaluator alone.
    pub fn drain_pending(&mut self) -> Vec<u8> {
        mem::take(&mut self.pending_output)
    }

    /// Re-arm the prompt latch for a new evaluation cycle.
    pub fn begin_cycle(&mut self) {
        self.eval_done = false;
    }

    /// Produce the next chunk without blocking.
    ///
    /// `finished` must be read from the evaluation worker's completion flag
    /// before this call so that output produced right before completion is
    /// still polled ahead of the prompt.
    pub fn next_chunk(&mut self, evaluator: &dyn Evaluator, finished: bool) -> Chunk {
        if !self.pending_output.is_empty() {
            return Chunk::Output(self.drain_pending());
        }

        let result = evaluator.poll_result();
        if !result.is_empty() {
            return Chunk::Output(result.into_bytes());
        }

        if !finished {
            return Chunk::Wait;
        }
        if self.eval_done {
            return Chunk::Drained;
        }
        self.eval_done = true;

        let prompt = self.terminal_prompt(evaluator);
        if prompt.is_empty() {
            Chunk::Drained
        } else {
            Chunk::Output(prompt.as_bytes().to_vec())
        }
    }

    fn terminal_prompt(&self, evaluator: &dyn Evaluator) -> &str {
        let show_output = self.mode.contains(ShellMode::SHOW_OUTPUT);
        let show_prompt = self.mode.contains(ShellMode::SHOW_PROMPT);

        if evaluator.input_pending() {
            if show_output && show_prompt {
                return &self.pending_prompt;
            }
            return "";
        }

        if (show_output || evaluator.eval_error()) && show_prompt {
            return &self.normal_prompt;
        }
        ""
    }
}
