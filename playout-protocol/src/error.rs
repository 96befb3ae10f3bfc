//! Protocol and encoding error types.

use thiserror::Error;

/// Errors raised while framing or assembling inbound responses.
///
/// None of these are fatal to a connection: the assembler resynchronizes on
/// the next header line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed response header: {0:?}")]
    MalformedHeader(String),

    #[error("unknown status code {code} in {line:?}")]
    UnknownStatus { code: u16, line: String },

    #[error("line too long: {len} bytes without terminator (max {max})")]
    LineTooLong { len: usize, max: usize },
}

/// Errors raised while turning a command into a wire line, or a wire line
/// back into a command.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("invalid parameter `{parameter}` for {command}: {reason}")]
    InvalidParameter {
        command: &'static str,
        parameter: &'static str,
        reason: String,
    },

    #[error("cannot parse command line: {0}")]
    Parse(String),
}

impl EncodingError {
    pub(crate) fn invalid(
        command: &'static str,
        parameter: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        EncodingError::InvalidParameter {
            command,
            parameter,
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        EncodingError::Parse(reason.into())
    }
}
