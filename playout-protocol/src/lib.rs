//! # playout-protocol
//!
//! Wire protocol implementation for AMCP playout servers.
//!
//! This crate provides:
//! - CRLF line framing over a byte stream
//! - Status-code driven response classification
//! - Incremental assembly of one-line, two-line and multi-line responses
//! - Typed commands with encoding to (and decoding from) wire lines
//!
//! Nothing in here performs I/O; the client crate drives it from a socket.

pub mod assembler;
pub mod codec;
pub mod command;
pub mod error;
pub mod line;
pub mod params;
pub mod status;

pub use assembler::{AssembledResponse, ParserState, ResponseAssembler};
pub use codec::{Decoder, Encoder};
pub use command::{
    CgOp, Command, Direction, MixerOp, MixerProperty, PlayOptions, Target, Transition,
    TransitionKind, DEFAULT_TWEEN,
};
pub use error::{EncodingError, ProtocolError};
pub use line::{LineFramer, RawLine};
pub use params::Param;
pub use status::{classify, Classification, CommandKind, ResponseShape};

/// Default AMCP port of a playout server.
pub const DEFAULT_PORT: u16 = 5250;

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Longest unterminated line the framer buffers before discarding it (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
