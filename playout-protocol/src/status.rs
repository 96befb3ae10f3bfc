//! Response classification by status code.
//!
//! Every response starts with a header line `NNN <echoed command> <word>`.
//! The three digit code decides how many lines follow:
//!
//! | Code            | Meaning                              | Shape      |
//! |-----------------|--------------------------------------|------------|
//! | 100             | information                          | one-line   |
//! | 101             | information, one data line follows   | two-line   |
//! | 200             | OK, data lines follow until blank    | multi-line |
//! | 201             | OK, one data line follows            | two-line   |
//! | 202             | OK, no data                          | one-line   |
//! | 400-404         | client error                         | one-line   |
//! | 500-502         | server error                         | one-line   |
//!
//! Any other code is treated as a one-line echo and reported as unknown.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many lines make up a response after its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// The header is the whole response.
    OneLine,
    /// The header plus exactly one data line.
    TwoLine,
    /// The header plus data lines up to an empty line.
    MultiLine,
}

impl ResponseShape {
    /// Returns the shape for a status code, or `None` if the code is not part
    /// of the protocol.
    pub fn for_code(code: u16) -> Option<Self> {
        match code {
            100 => Some(ResponseShape::OneLine),
            101 => Some(ResponseShape::TwoLine),
            200 => Some(ResponseShape::MultiLine),
            201 => Some(ResponseShape::TwoLine),
            202 => Some(ResponseShape::OneLine),
            400..=404 => Some(ResponseShape::OneLine),
            500..=502 => Some(ResponseShape::OneLine),
            _ => None,
        }
    }
}

/// AMCP command kinds, as sent by the client and echoed in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Load,
    LoadBg,
    Play,
    Pause,
    Stop,
    Clear,
    Call,
    Swap,
    Add,
    Remove,
    Set,
    Mixer,
    Cg,
    Cls,
    Tls,
    Cinf,
    Version,
    Info,
    InfoSystem,
    DataList,
    DataRetrieve,
    ThumbnailList,
    ThumbnailRetrieve,
    /// Bare `ERROR` echo sent by the server for unparseable input.
    Error,
    /// Anything else.
    Unknown,
}

/// Wire names. Multi-word names come first so the longest match wins.
const WIRE_NAMES: &[(&str, CommandKind)] = &[
    ("INFO SYSTEM", CommandKind::InfoSystem),
    ("DATA LIST", CommandKind::DataList),
    ("DATA RETRIEVE", CommandKind::DataRetrieve),
    ("THUMBNAIL LIST", CommandKind::ThumbnailList),
    ("THUMBNAIL RETRIEVE", CommandKind::ThumbnailRetrieve),
    ("LOAD", CommandKind::Load),
    ("LOADBG", CommandKind::LoadBg),
    ("PLAY", CommandKind::Play),
    ("PAUSE", CommandKind::Pause),
    ("STOP", CommandKind::Stop),
    ("CLEAR", CommandKind::Clear),
    ("CALL", CommandKind::Call),
    ("SWAP", CommandKind::Swap),
    ("ADD", CommandKind::Add),
    ("REMOVE", CommandKind::Remove),
    ("SET", CommandKind::Set),
    ("MIXER", CommandKind::Mixer),
    ("CG", CommandKind::Cg),
    ("CLS", CommandKind::Cls),
    ("TLS", CommandKind::Tls),
    ("CINF", CommandKind::Cinf),
    ("VERSION", CommandKind::Version),
    ("INFO", CommandKind::Info),
    ("ERROR", CommandKind::Error),
];

impl CommandKind {
    /// Returns the command name as written on the wire.
    pub fn wire_name(&self) -> &'static str {
        WIRE_NAMES
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Identifies the command at the start of `tokens`.
    ///
    /// Returns the kind and the number of tokens its name spans. The longest
    /// matching name wins, so `INFO SYSTEM` is not mistaken for `INFO`.
    pub fn match_tokens(tokens: &[&str]) -> (CommandKind, usize) {
        let mut best = (CommandKind::Unknown, 0);
        for (name, kind) in WIRE_NAMES {
            let words: Vec<&str> = name.split(' ').collect();
            if words.len() <= best.1 || words.len() > tokens.len() {
                continue;
            }
            let matches = words
                .iter()
                .zip(tokens)
                .all(|(word, token)| word.eq_ignore_ascii_case(token));
            if matches {
                best = (*kind, words.len());
            }
        }
        best
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Result of classifying a header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Three digit status code.
    pub code: u16,
    /// Number of lines that follow the header.
    pub shape: ResponseShape,
    /// Command echoed in the header, if recognized.
    pub kind: CommandKind,
    /// Whether the code is part of the protocol table.
    pub known: bool,
}

/// Classifies a header line.
///
/// Fails with [`ProtocolError::MalformedHeader`] when the line does not start
/// with a three digit code. Codes outside the table classify as one-line with
/// `known == false`.
pub fn classify(header: &str) -> Result<Classification, ProtocolError> {
    let mut tokens = header.split_whitespace();
    let code_token = tokens
        .next()
        .ok_or_else(|| ProtocolError::MalformedHeader(header.to_string()))?;

    if code_token.len() != 3 || !code_token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedHeader(header.to_string()));
    }
    let code: u16 = code_token
        .parse()
        .map_err(|_| ProtocolError::MalformedHeader(header.to_string()))?;

    let rest: Vec<&str> = tokens.collect();
    let (kind, _) = CommandKind::match_tokens(&rest);

    let (shape, known) = match ResponseShape::for_code(code) {
        Some(shape) => (shape, true),
        None => (ResponseShape::OneLine, false),
    };

    Ok(Classification {
        code,
        shape,
        kind,
        known,
    })
}
