//! Line discipline: classifies one raw input line into an [`Action`].
//!
//! Lines arrive already framed by the transport with the newline stripped.
//! Telnet clients (RFC 854) deliver interrupts as `IAC IP` / `IAC AO`
//! sequences at the tail of whatever was buffered, while netcat-style
//! clients send bare control bytes. Both are recognized here.

/// Telnet "interpret as command" escape.
pub const IAC: u8 = 0xff;
/// Telnet interrupt process.
pub const IP: u8 = 0xf4;
/// Telnet abort output.
pub const AO: u8 = 0xf5;
/// Telnet erase line.
pub const EL: u8 = 0xf8;
/// Telnet WILL option negotiation.
pub const WILL: u8 = 0xfb;
/// Telnet timing mark option (RFC 860).
pub const TIMING_MARK: u8 = 0x06;

/// End of transmission, `^D` at the keyboard.
pub const EOT: u8 = 0x04;
/// Synchronous idle, `^V` at the keyboard.
pub const SYN: u8 = 0x16;
/// Cancel, `^X` at the keyboard.
pub const CAN: u8 = 0x18;
/// Escape, `^[` at the keyboard.
pub const ESC: u8 = 0x1b;

/// Acknowledgment sent after an interrupt: `IAC WILL TIMING-MARK` plus a
/// newline, so telnet stops discarding output.
pub const ABORT_PROMPT: [u8; 4] = [IAC, WILL, TIMING_MARK, b'\n'];

/// How far from the end of a line to look for a telnet command.
const SCAN_WINDOW: usize = 20;

/// What the session should do with one line of input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Forward the text (the line with its newline re-appended).
    Evaluate(String),
    /// Zero-length input; forwarded as a bare newline.
    EvaluateEmpty,
    /// Interrupt the evaluator, clear pending input, reply with the message.
    InterruptAndAcknowledge(&'static [u8]),
    /// Drop the line and resend the current prompt.
    IgnoreAndPrompt,
    /// Interrupt the evaluator, clear pending input, reply with a blank line
    /// and the normal prompt.
    InterruptAndNewline,
    /// Leave the shell.
    Exit,
}

/// Classify `line` given whether the evaluator is in the middle of a
/// multi-line expression.
///
/// Precedence: a telnet command in the trailing window wins over a trailing
/// control byte, which wins over the exit check.
///
/// Evaluators take text, so the wire is UTF-8: bytes that are not valid UTF-8
/// reach the evaluator as U+FFFD.
pub fn classify(line: &[u8], input_pending: bool) -> Action {
    let Some(&last) = line.last() else {
        return Action::EvaluateEmpty;
    };

    if let Some(action) = scan_telnet_command(line) {
        return action;
    }

    if matches!(last, SYN | CAN | ESC) {
        return Action::InterruptAndNewline;
    }

    if !input_pending && (last == EOT || line == b".") {
        return Action::Exit;
    }

    // The transport cut the newline; put it back or a trailing comment would
    // swallow whatever the evaluator reads next.
    let mut text = String::from_utf8_lossy(line).into_owned();
    text.push('\n');
    Action::Evaluate(text)
}

/// Look for `IAC IP`, `IAC AO` or `IAC EL`, scanning backward from the end of
/// the line but no further than [`SCAN_WINDOW`] bytes.
fn scan_telnet_command(line: &[u8]) -> Option<Action> {
    if line.len() < 2 {
        return None;
    }
    let lowest = line.len().saturating_sub(SCAN_WINDOW);

    (lowest..line.len() - 1).rev().find_map(|i| {
        if line[i] != IAC {
            return None;
        }
        match line[i + 1] {
            IP | AO => Some(Action::InterruptAndAcknowledge(&ABORT_PROMPT)),
            EL => Some(Action::IgnoreAndPrompt),
            _ => None,
        }
    })
}
