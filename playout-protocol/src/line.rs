//! CRLF line framing for the inbound byte stream.
//!
//! The framer only splits; it never looks at what a line contains. Bytes that
//! are not valid UTF-8 are mapped one-to-one onto Latin-1 characters so that
//! nothing a misbehaving server sends can make framing fail.

use crate::error::ProtocolError;
use crate::MAX_LINE_LENGTH;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// A single line with its terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine(String);

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Decodes raw bytes, falling back to Latin-1 when they are not UTF-8.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self(text.to_string()),
            Err(_) => Self(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RawLine {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Splits a byte stream into CRLF-terminated lines.
///
/// A trailing partial line is retained between calls. A line that grows past
/// the configured maximum without a terminator is discarded up to its next
/// terminator and reported once as [`ProtocolError::LineTooLong`].
pub struct LineFramer {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already searched for a terminator.
    scanned: usize,
    max_line_length: usize,
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            max_line_length,
            discarding: false,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends data and returns an iterator over the lines it completed.
    ///
    /// Lines not consumed from the iterator stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Lines<'_> {
        self.extend(data);
        Lines { framer: self }
    }

    /// Takes the next complete line out of the buffer, if there is one.
    pub fn next_line(&mut self) -> Option<Result<RawLine, ProtocolError>> {
        loop {
            // A CR at the end of the previous scan may pair with a fresh LF.
            let start = self.scanned.saturating_sub(1);
            if let Some(offset) = find_crlf(&self.buffer[start..]) {
                let line = self.buffer.split_to(start + offset);
                self.buffer.advance(2);
                self.scanned = 0;

                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                return Some(Ok(RawLine::from_bytes(&line)));
            }

            self.scanned = self.buffer.len();

            if self.discarding {
                self.drop_partial();
                return None;
            }

            if self.buffer.len() > self.max_line_length {
                let len = self.buffer.len();
                self.drop_partial();
                self.discarding = true;
                return Some(Err(ProtocolError::LineTooLong {
                    len,
                    max: self.max_line_length,
                }));
            }

            return None;
        }
    }

    /// Clears the partial line, keeping a trailing CR so a split CRLF is still
    /// recognized.
    fn drop_partial(&mut self) {
        let trailing_cr = self.buffer.last() == Some(&b'\r');
        self.buffer.clear();
        if trailing_cr {
            self.buffer.put_u8(b'\r');
        }
        self.scanned = self.buffer.len();
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`LineFramer::feed`].
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = Result<RawLine, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(framer: &mut LineFramer, data: &[u8]) -> Vec<String> {
        framer
            .feed(data)
            .map(|line| line.unwrap().into_string())
            .collect()
    }

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new();
        assert_eq!(collect(&mut framer, b"202 LOAD OK\r\n"), vec!["202 LOAD OK"]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"200 O").is_empty());
        assert_eq!(framer.buffered(), 5);
        assert_eq!(collect(&mut framer, b"K\r\n"), vec!["200 OK"]);
    }

    #[test]
    fn test_terminator_split_across_reads() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"202 PLAY OK\r").is_empty());
        assert_eq!(collect(&mut framer, b"\n"), vec!["202 PLAY OK"]);
    }

    #[test]
    fn test_multiple_lines_and_empty_line() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"200 INFO OK\r\n1 PAL PLAYING\r\n\r\n202");
        assert_eq!(lines, vec!["200 INFO OK", "1 PAL PLAYING", ""]);
        assert_eq!(framer.buffered(), 3);
    }

    #[test]
    fn test_bare_lf_is_not_a_terminator() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"line one\nstill one\r\n");
        assert_eq!(lines, vec!["line one\nstill one"]);
    }

    #[test]
    fn test_unconsumed_lines_stay_buffered() {
        let mut framer = LineFramer::new();
        let first = framer.feed(b"a\r\nb\r\n").next().unwrap().unwrap();
        assert_eq!(first.as_str(), "a");
        assert_eq!(framer.next_line().unwrap().unwrap().as_str(), "b");
        assert!(framer.next_line().is_none());
    }

    #[test]
    fn test_latin1_passthrough() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"201 CINF OK\r\n\"caf\xe9\"\r\n");
        assert_eq!(lines[1], "\"café\"");
    }

    #[test]
    fn test_utf8_is_preserved() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, "\"grüße\"\r\n".as_bytes());
        assert_eq!(lines, vec!["\"grüße\""]);
    }

    #[test]
    fn test_overlong_line_flagged_once_then_resyncs() {
        let mut framer = LineFramer::with_max_line_length(8);

        let results: Vec<_> = framer.feed(b"0123456789").collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(ProtocolError::LineTooLong { len: 10, max: 8 })
        ));
        assert_eq!(framer.buffered(), 0);

        // More of the same line is dropped silently.
        assert!(framer.feed(b"abcdefghijkl").next().is_none());
        assert_eq!(framer.buffered(), 0);

        // The terminator ends the discarded line; the next one is intact.
        assert_eq!(collect(&mut framer, b"xyz\r\n202 OK\r\n"), vec!["202 OK"]);
    }

    #[test]
    fn test_overlong_line_with_split_terminator() {
        let mut framer = LineFramer::with_max_line_length(4);
        let results: Vec<_> = framer.feed(b"abcdef\r").collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(collect(&mut framer, b"\n202 OK\r\n"), vec!["202 OK"]);
    }

    #[test]
    fn test_clear() {
        let mut framer = LineFramer::new();
        framer.extend(b"partial");
        framer.clear();
        assert_eq!(framer.buffered(), 0);
        assert_eq!(collect(&mut framer, b"202 OK\r\n"), vec!["202 OK"]);
    }

    proptest! {
        #[test]
        fn prop_split_point_does_not_change_lines(
            lines in proptest::collection::vec("[ -~]{0,40}", 1..8),
            split in 0usize..400,
        ) {
            let mut wire = Vec::new();
            for line in &lines {
                wire.extend_from_slice(line.as_bytes());
                wire.extend_from_slice(b"\r\n");
            }
            let split = split.min(wire.len());

            let mut whole = LineFramer::new();
            let expected = collect(&mut whole, &wire);

            let mut parts = LineFramer::new();
            let mut got = collect(&mut parts, &wire[..split]);
            got.extend(collect(&mut parts, &wire[split..]));

            prop_assert_eq!(&got, &expected);
            prop_assert_eq!(got, lines);
        }
    }
}
