//! Line buffer for raw terminal output.
//!
//! Remote output arrives in arbitrary chunks with terminal escape sequences
//! mixed in. The buffer strips escapes with a `vte` parser (kept across
//! chunks, so a sequence split over two reads is still removed), drops
//! carriage returns, and yields complete lines. Whatever follows the last
//! newline stays pending until more data arrives or the caller flushes it.

use memchr::memchr;

/// Longest pending line kept before it is force-split.
const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Accumulates terminal output and splits it into lines.
pub struct LineBuffer {
    /// Bytes after the last newline.
    pending: Vec<u8>,

    /// Escape-sequence parser state.
    parser: vte::Parser,

    /// Force-split threshold for lines that never end.
    max_line: usize,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Create an empty buffer that force-splits lines longer than `max_line`.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::with_capacity(256),
            parser: vte::Parser::new(),
            max_line: max_line.max(1),
        }
    }

    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut printable = Printable {
            out: &mut self.pending,
        };
        self.parser.advance(&mut printable, data);

        let mut lines = Vec::new();
        while let Some(pos) = memchr(b'\n', &self.pending) {
            let line: Vec<u8> = self.pending.drain(..=pos).take(pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.pending.len() >= self.max_line {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }

        lines
    }

    /// Whether a partial line is waiting for its newline.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take the pending partial line, if any.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// `vte` performer that keeps printable text, tabs and newlines.
struct Printable<'a> {
    out: &'a mut Vec<u8>,
}

impl vte::Perform for Printable<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\t' => self.out.push(byte),
            // Backspace: undo the last echoed character.
            0x08 => {
                self.out.pop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"one\r\ntwo\nthr");
        assert_eq!(lines, vec!["one", "two"]);
        assert!(buffer.has_partial());

        let lines = buffer.push(b"ee\n");
        assert_eq!(lines, vec!["three"]);
        assert!(!buffer.has_partial());
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"\x1b[32mGreen text\x1b[0m\n");
        assert_eq!(lines, vec!["Green text"]);
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"ab\x1b[3").is_empty());
        let lines = buffer.push(b"1mcd\n");
        assert_eq!(lines, vec!["abcd"]);
    }

    #[test]
    fn test_take_partial_clears() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"[sudo] password for alice: ");
        assert_eq!(
            buffer.take_partial().as_deref(),
            Some("[sudo] password for alice: ")
        );
        assert!(buffer.take_partial().is_none());
    }

    #[test]
    fn test_force_split_long_line() {
        let mut buffer = LineBuffer::with_max_line(8);
        let lines = buffer.push(&[b'x'; 10]);
        assert_eq!(lines, vec!["xxxxxxxxxx"]);
        assert!(!buffer.has_partial());
    }
}
