//! Splitting raw PTY output into interpreter output and prompt markers.
//!
//! The interpreter is configured to print private sentinel strings as its
//! primary and continuation prompts. The primary prompt also carries the exit
//! status of the last command. [`PromptScanner`] finds the markers in the
//! byte stream (they may straddle reads) and [`TextFilter`] turns what remains
//! into plain text, dropping terminal escape sequences and carriage returns.

use std::mem;

/// Start of the primary prompt; the exit status and [`MARKER_END`] follow.
pub const READY_PREFIX: &[u8] = b"\x01tsh-ready";
/// Printed by the interpreter while a multi-line expression is open.
pub const MORE_MARKER: &[u8] = b"\x01tsh-more\x02";
pub const MARKER_END: u8 = 0x02;

const MARKER_START: u8 = 0x01;
/// Longest status text accepted between [`READY_PREFIX`] and [`MARKER_END`].
const MAX_STATUS_LEN: usize = 8;

/// Which prompt the interpreter printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    /// Ready for a new expression; carries `$?` of the last command. A shell
    /// that does not expand the status reports 0.
    Ready(i32),
    More,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Output(Vec<u8>),
    Prompt(PromptKind),
}

enum Scan {
    Marker { pos: usize, len: usize, kind: PromptKind },
    /// A marker may start at `pos` but the buffer ends first.
    Partial(usize),
    Clear,
}

/// Incremental prompt-marker scanner.
#[derive(Default)]
pub struct PromptScanner {
    carry: Vec<u8>,
}

impl PromptScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes. Bytes that could be the start of a
    /// marker are held back until the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Segment> {
        self.carry.extend_from_slice(bytes);
        let mut segments = Vec::new();

        loop {
            match scan(&self.carry) {
                Scan::Marker { pos, len, kind } => {
                    if pos > 0 {
                        segments.push(Segment::Output(self.carry[..pos].to_vec()));
                    }
                    segments.push(Segment::Prompt(kind));
                    self.carry.drain(..pos + len);
                }
                Scan::Partial(pos) => {
                    if pos > 0 {
                        let rest = self.carry.split_off(pos);
                        segments.push(Segment::Output(mem::replace(&mut self.carry, rest)));
                    }
                    return segments;
                }
                Scan::Clear => {
                    if !self.carry.is_empty() {
                        segments.push(Segment::Output(mem::take(&mut self.carry)));
                    }
                    return segments;
                }
            }
        }
    }
}

/// Find the earliest complete or partial marker in `buf`.
fn scan(buf: &[u8]) -> Scan {
    let mut from = 0;
    while let Some(offset) = buf[from..].iter().position(|&b| b == MARKER_START) {
        let pos = from + offset;
        let rest = &buf[pos..];

        if rest.starts_with(MORE_MARKER) {
            return Scan::Marker {
                pos,
                len: MORE_MARKER.len(),
                kind: PromptKind::More,
            };
        }
        if let Some(status) = rest.strip_prefix(READY_PREFIX) {
            let window = &status[..status.len().min(MAX_STATUS_LEN + 1)];
            if let Some(end) = window.iter().position(|&b| b == MARKER_END) {
                return Scan::Marker {
                    pos,
                    len: READY_PREFIX.len() + end + 1,
                    kind: PromptKind::Ready(parse_status(&status[..end])),
                };
            }
            if status.len() <= MAX_STATUS_LEN {
                return Scan::Partial(pos);
            }
        } else if READY_PREFIX.starts_with(rest) || MORE_MARKER.starts_with(rest) {
            return Scan::Partial(pos);
        }
        from = pos + 1;
    }
    Scan::Clear
}

fn parse_status(text: &[u8]) -> i32 {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Collects the printable part of a terminal byte stream.
#[derive(Default)]
struct PlainText {
    text: String,
}

impl vte::Perform for PlainText {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\t' => self.text.push(byte as char),
            // \r from the tty's output processing, bells, backspaces.
            _ => {}
        }
    }
}

/// Strips escape sequences and control characters, keeping parser state
/// across calls so sequences split between reads are still removed.
pub struct TextFilter {
    parser: vte::Parser,
    sink: PlainText,
}

impl TextFilter {
    pub fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            sink: PlainText::default(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> String {
        self.parser.advance(&mut self.sink, bytes);
        mem::take(&mut self.sink.text)
    }
}

impl Default for TextFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(text: &str) -> Segment {
        Segment::Output(text.as_bytes().to_vec())
    }

    fn ready(status: &str) -> Vec<u8> {
        let mut marker = READY_PREFIX.to_vec();
        marker.extend_from_slice(status.as_bytes());
        marker.push(MARKER_END);
        marker
    }

    #[test]
    fn test_plain_output_passes_through() {
        let mut scanner = PromptScanner::new();
        assert_eq!(scanner.feed(b"hello\r\n"), vec![output("hello\r\n")]);
    }

    #[test]
    fn test_output_then_prompt() {
        let mut scanner = PromptScanner::new();
        let mut bytes = b"42\r\n".to_vec();
        bytes.extend_from_slice(&ready("0"));
        assert_eq!(
            scanner.feed(&bytes),
            vec![output("42\r\n"), Segment::Prompt(PromptKind::Ready(0))]
        );
    }

    #[test]
    fn test_ready_carries_status() {
        let mut scanner = PromptScanner::new();
        assert_eq!(
            scanner.feed(&ready("127")),
            vec![Segment::Prompt(PromptKind::Ready(127))]
        );
        // Unexpanded `$?` reads as success.
        assert_eq!(
            scanner.feed(&ready("$?")),
            vec![Segment::Prompt(PromptKind::Ready(0))]
        );
    }

    #[test]
    fn test_status_split_across_reads() {
        let mut scanner = PromptScanner::new();
        let marker = ready("130");
        let (head, tail) = marker.split_at(READY_PREFIX.len() + 1);

        assert!(scanner.feed(head).is_empty());
        assert_eq!(scanner.feed(tail), vec![Segment::Prompt(PromptKind::Ready(130))]);
    }

    #[test]
    fn test_marker_split_across_reads() {
        let mut scanner = PromptScanner::new();
        let (head, tail) = MORE_MARKER.split_at(4);

        let mut first = b"x".to_vec();
        first.extend_from_slice(head);
        assert_eq!(scanner.feed(&first), vec![output("x")]);
        assert_eq!(scanner.feed(tail), vec![Segment::Prompt(PromptKind::More)]);
    }

    #[test]
    fn test_false_partial_is_released() {
        let mut scanner = PromptScanner::new();
        assert_eq!(scanner.feed(b"a\x01"), vec![output("a")]);
        assert_eq!(scanner.feed(b"b"), vec![output("\x01b")]);
    }

    #[test]
    fn test_unterminated_ready_prefix_is_output() {
        let mut scanner = PromptScanner::new();
        let mut bytes = READY_PREFIX.to_vec();
        bytes.extend_from_slice(b"0123456789");
        assert_eq!(scanner.feed(&bytes), vec![Segment::Output(bytes.clone())]);
    }

    #[test]
    fn test_two_prompts_in_one_read() {
        let mut scanner = PromptScanner::new();
        let mut bytes = MORE_MARKER.to_vec();
        bytes.extend_from_slice(b"\r\n");
        bytes.extend_from_slice(&ready("1"));
        assert_eq!(
            scanner.feed(&bytes),
            vec![
                Segment::Prompt(PromptKind::More),
                output("\r\n"),
                Segment::Prompt(PromptKind::Ready(1)),
            ]
        );
    }

    #[test]
    fn test_filter_strips_escapes() {
        let mut filter = TextFilter::new();
        assert_eq!(filter.feed(b"\x1b[?2004hok\r\n\x1b[1mbold\x1b[0m\t!"), "ok\nbold\t!");
    }

    #[test]
    fn test_filter_keeps_state_across_calls() {
        let mut filter = TextFilter::new();
        assert_eq!(filter.feed(b"a\x1b["), "a");
        assert_eq!(filter.feed(b"31mb"), "b");
    }

    #[test]
    fn test_filter_utf8() {
        let mut filter = TextFilter::new();
        assert_eq!(filter.feed("λ→".as_bytes()), "λ→");
    }
}
