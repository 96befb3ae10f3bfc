//! Encoder and decoder for AMCP lines and responses.

use crate::assembler::{AssembledResponse, ParserState, ResponseAssembler};
use crate::command::Command;
use crate::error::{EncodingError, ProtocolError};
use crate::line::LineFramer;
use crate::LINE_TERMINATOR;
use bytes::{Bytes, BytesMut};

/// Encodes commands into terminated wire lines.
pub struct Encoder;

impl Encoder {
    /// Encodes a command, including its CRLF terminator.
    pub fn encode_command(command: &Command) -> Result<BytesMut, EncodingError> {
        let line = command.encode()?;
        let mut buf = BytesMut::with_capacity(line.len() + LINE_TERMINATOR.len());
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(LINE_TERMINATOR.as_bytes());
        Ok(buf)
    }
}

/// Decodes a byte stream into complete responses.
pub struct Decoder {
    framer: LineFramer,
    assembler: ResponseAssembler,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            framer: LineFramer::new(),
            assembler: ResponseAssembler::new(),
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            framer: LineFramer::with_max_line_length(max_line_length),
            assembler: ResponseAssembler::new(),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.framer.extend(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.framer.extend(&data);
    }

    /// Attempts to decode the next complete response from the buffer.
    ///
    /// An error affects only the offending line; call again to continue with
    /// whatever is still buffered.
    pub fn decode_response(&mut self) -> Result<Option<AssembledResponse>, ProtocolError> {
        while let Some(line) = self.framer.next_line() {
            if let Some(response) = self.assembler.push_line(line?)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Returns the assembler state.
    pub fn state(&self) -> ParserState {
        self.assembler.state()
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }

    /// Drops buffered bytes and any partially assembled response.
    pub fn clear(&mut self) {
        self.framer.clear();
        self.assembler.reset();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Target;
    use crate::status::CommandKind;

    fn drain(decoder: &mut Decoder) -> Vec<AssembledResponse> {
        let mut out = Vec::new();
        while let Some(response) = decoder.decode_response().unwrap() {
            out.push(response);
        }
        out
    }

    #[test]
    fn test_encode_command() {
        let command = Command::load(Target::layer(1, 1), "CG1");
        let bytes = Encoder::encode_command(&command).unwrap();
        assert_eq!(&bytes[..], b"LOAD 1-1 \"CG1\"\r\n");
    }

    #[test]
    fn test_encode_rejects_invalid_command() {
        let command = Command::load(Target::layer(0, 1), "CG1");
        assert!(Encoder::encode_command(&command).is_err());
    }

    #[test]
    fn test_decode_partial_line() {
        let mut decoder = Decoder::new();
        decoder.extend(b"202 LOAD O");
        assert!(decoder.decode_response().unwrap().is_none());
        decoder.extend(b"K\r\n");
        let response = decoder.decode_response().unwrap().unwrap();
        assert_eq!(response.code, 202);
        assert_eq!(response.kind, CommandKind::Load);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_header_without_command() {
        let mut decoder = Decoder::new();
        decoder.extend(b"200 O");
        assert!(decoder.decode_response().unwrap().is_none());
        decoder.extend(b"K\r\n");
        // A 200 header waits for its body.
        assert!(decoder.decode_response().unwrap().is_none());
        assert_eq!(decoder.state(), ParserState::AwaitingMultiLine);
        decoder.extend(b"\r\n");
        let response = decoder.decode_response().unwrap().unwrap();
        assert_eq!(response.code, 200);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_decode_mixed_stream() {
        let mut decoder = Decoder::new();
        decoder.extend_bytes(Bytes::from_static(
            b"202 PLAY OK\r\n200 CLS OK\r\n\"AMB\" MOVIE 1234\r\n\"GO\" MOVIE 99\r\n\r\n201 VERSION OK\r\n2.3.0\r\n",
        ));
        let responses = drain(&mut decoder);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].kind, CommandKind::Play);
        assert_eq!(responses[1].kind, CommandKind::Cls);
        assert_eq!(responses[1].body.len(), 2);
        assert_eq!(responses[2].data(), Some("2.3.0"));
    }

    #[test]
    fn test_decode_error_then_continue() {
        let mut decoder = Decoder::new();
        decoder.extend(b"garbage\r\n299 ODD OK\r\n202 STOP OK\r\n");
        assert!(matches!(
            decoder.decode_response(),
            Err(ProtocolError::MalformedHeader(_))
        ));
        assert!(matches!(
            decoder.decode_response(),
            Err(ProtocolError::UnknownStatus { code: 299, .. })
        ));
        let response = decoder.decode_response().unwrap().unwrap();
        assert_eq!(response.kind, CommandKind::Stop);
    }

    #[test]
    fn test_decode_overlong_line() {
        let mut decoder = Decoder::with_max_line_length(16);
        decoder.extend(&[b'x'; 32]);
        assert!(matches!(
            decoder.decode_response(),
            Err(ProtocolError::LineTooLong { .. })
        ));
        decoder.extend(b"\r\n202 LOAD OK\r\n");
        let response = decoder.decode_response().unwrap().unwrap();
        assert_eq!(response.code, 202);
    }

    #[test]
    fn test_clear_discards_partial_response() {
        let mut decoder = Decoder::new();
        decoder.extend(b"200 INFO OK\r\n1 PAL PLAYING\r\n");
        assert!(decoder.decode_response().unwrap().is_none());
        decoder.clear();
        assert_eq!(decoder.state(), ParserState::AwaitingHeader);
        decoder.extend(b"202 LOAD OK\r\n");
        assert_eq!(decoder.decode_response().unwrap().unwrap().code, 202);
    }
}
