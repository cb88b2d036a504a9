//! Splitting a client's byte stream into lines for the session.
//!
//! Lines end at `\n`; a trailing `\r` is removed. Telnet option negotiation
//! (`IAC WILL/WONT/DO/DONT <option>`) is dropped. Sessions take UTF-8 text,
//! which never contains `0xFF`, so an escaped data byte (`IAC IAC`) is dropped
//! as well. Any other telnet command is kept in the line for the
//! session's line discipline; interrupt, abort-output and erase-line also
//! end the line immediately, so they reach the session without waiting for a
//! newline.

use telshell_core::discipline::{AO, EL, IAC, IP, WILL};

const WONT: u8 = 0xFC;
const DO: u8 = 0xFD;
const DONT: u8 = 0xFE;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    /// Just saw IAC.
    Command,
    /// Skipping the option byte of a negotiation.
    Option,
}

#[derive(Debug, Default)]
pub struct LineFramer {
    line: Vec<u8>,
    state: State,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read from the socket; returns every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match self.state {
                State::Data => match byte {
                    IAC => self.state = State::Command,
                    b'\n' => lines.push(self.take_line()),
                    _ => self.line.push(byte),
                },
                State::Command => {
                    self.state = State::Data;
                    match byte {
                        WILL | WONT | DO | DONT => self.state = State::Option,
                        IAC => {}
                        IP | AO | EL => {
                            self.line.extend_from_slice(&[IAC, byte]);
                            lines.push(std::mem::take(&mut self.line));
                        }
                        _ => self.line.extend_from_slice(&[IAC, byte]),
                    }
                }
                State::Option => self.state = State::Data,
            }
        }
        lines
    }

    /// Bytes received since the last complete line.
    pub fn partial(&self) -> &[u8] {
        &self.line
    }

    fn take_line(&mut self) -> Vec<u8> {
        let mut line = std::mem::take(&mut self.line);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        line
    }
}
