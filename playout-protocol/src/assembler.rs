//! Response assembly state machine.
//!
//! ```text
//!            one-line header
//!          +----------------+
//!          v                |
//!   AwaitingHeader ---------+
//!     |        |  two-line header       any line
//!     |        +---------------> AwaitingTwoLine ----------> emit
//!     | multi-line header             data line
//!     +----------------> AwaitingMultiLine <----+
//!                          |    |               |
//!                          |    +---------------+
//!                          | empty line
//!                          +--------------------------------> emit
//! ```
//!
//! Every emitted response returns the machine to `AwaitingHeader`.

use crate::error::ProtocolError;
use crate::line::RawLine;
use crate::status::{classify, Classification, CommandKind, ResponseShape};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Parser state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    AwaitingHeader,
    /// Transient: a one-line header is complete as soon as it is seen.
    AwaitingOneLine,
    AwaitingTwoLine,
    AwaitingMultiLine,
}

/// A complete response. Only ever constructed once all of its lines are in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledResponse {
    /// Three digit status code.
    pub code: u16,
    /// Command echoed in the header.
    pub kind: CommandKind,
    /// The header line as received.
    pub header: String,
    /// Data lines in arrival order, without the multi-line terminator.
    pub body: Vec<String>,
    /// When the last line of the response arrived.
    pub received_at: DateTime<Utc>,
}

impl AssembledResponse {
    /// 1xx informational.
    pub fn is_info(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 4xx client or 5xx server error.
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// The header text after the status code.
    pub fn message(&self) -> &str {
        self.header
            .trim_start()
            .get(3..)
            .map(str::trim)
            .unwrap_or_default()
    }

    /// The first data line, if any.
    pub fn data(&self) -> Option<&str> {
        self.body.first().map(String::as_str)
    }
}

struct Partial {
    classification: Classification,
    header: String,
    body: Vec<String>,
}

impl Partial {
    fn into_response(self) -> AssembledResponse {
        AssembledResponse {
            code: self.classification.code,
            kind: self.classification.kind,
            header: self.header,
            body: self.body,
            received_at: Utc::now(),
        }
    }
}

/// Accumulates lines into complete responses.
#[derive(Default)]
pub struct ResponseAssembler {
    state: ParserState,
    partial: Option<Partial>,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current parser state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Consumes one line.
    ///
    /// Returns `Ok(Some(response))` when the line completes a response and
    /// `Ok(None)` when more lines are needed. Errors leave the machine in
    /// `AwaitingHeader`, ready for the next header.
    pub fn push_line(
        &mut self,
        line: RawLine,
    ) -> Result<Option<AssembledResponse>, ProtocolError> {
        match self.state {
            ParserState::AwaitingHeader | ParserState::AwaitingOneLine => self.begin(line),
            ParserState::AwaitingTwoLine => match self.partial.take() {
                Some(mut partial) => {
                    partial.body.push(line.into_string());
                    self.state = ParserState::AwaitingHeader;
                    Ok(Some(partial.into_response()))
                }
                None => {
                    self.state = ParserState::AwaitingHeader;
                    self.begin(line)
                }
            },
            ParserState::AwaitingMultiLine => match self.partial.as_mut() {
                Some(partial) if !line.is_empty() => {
                    partial.body.push(line.into_string());
                    Ok(None)
                }
                Some(_) => {
                    self.state = ParserState::AwaitingHeader;
                    Ok(self.partial.take().map(Partial::into_response))
                }
                None => self.begin(line),
            },
        }
    }

    fn begin(&mut self, line: RawLine) -> Result<Option<AssembledResponse>, ProtocolError> {
        self.state = ParserState::AwaitingHeader;

        // Stray terminators between responses carry nothing.
        if line.is_empty() {
            return Ok(None);
        }

        let classification = classify(line.as_str())?;
        if !classification.known {
            return Err(ProtocolError::UnknownStatus {
                code: classification.code,
                line: line.into_string(),
            });
        }

        let partial = Partial {
            classification,
            header: line.into_string(),
            body: Vec::new(),
        };

        self.state = match classification.shape {
            ResponseShape::OneLine => ParserState::AwaitingOneLine,
            ResponseShape::TwoLine => ParserState::AwaitingTwoLine,
            ResponseShape::MultiLine => ParserState::AwaitingMultiLine,
        };

        if self.state == ParserState::AwaitingOneLine {
            self.state = ParserState::AwaitingHeader;
            return Ok(Some(partial.into_response()));
        }

        self.partial = Some(partial);
        Ok(None)
    }

    /// Discards any partially assembled response.
    pub fn reset(&mut self) {
        self.state = ParserState::AwaitingHeader;
        self.partial = None;
    }
}
