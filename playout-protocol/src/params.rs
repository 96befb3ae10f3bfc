//! Parameter rendering and tokenizing.
//!
//! Text parameters (clip, template and file names, template data) are always
//! written in double quotes with `\"`, `\\` and `\n` escaped. Keywords and
//! numbers are written bare. Floats use the shortest fixed-point form that
//! parses back to the same value; booleans are `true`/`false`.

use crate::error::EncodingError;
use std::fmt;

/// A typed free-form parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Bare keyword, written as is.
    Word(String),
    /// Quoted text.
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Param {
    /// Interprets a token read off the wire.
    pub fn from_token(token: &Token) -> Self {
        match token {
            Token::Quoted(text) => Param::Text(text.clone()),
            Token::Word(word) => {
                if word == "true" {
                    Param::Bool(true)
                } else if word == "false" {
                    Param::Bool(false)
                } else if let Ok(n) = word.parse::<i64>() {
                    Param::Int(n)
                } else if let Some(f) = word
                    .contains('.')
                    .then(|| word.parse::<f64>().ok())
                    .flatten()
                    .filter(|f| f.is_finite())
                {
                    Param::Float(f)
                } else {
                    Param::Word(word.clone())
                }
            }
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Word(word) => f.write_str(word),
            Param::Text(text) => f.write_str(&quote(text)),
            Param::Int(n) => write!(f, "{}", n),
            // Keeps a decimal point so the value reads back as a float.
            Param::Float(v) => {
                let rendered = format_float(*v);
                if rendered.contains('.') || !v.is_finite() {
                    f.write_str(&rendered)
                } else {
                    write!(f, "{}.0", rendered)
                }
            }
            Param::Bool(b) => f.write_str(format_bool(*b)),
        }
    }
}

/// Wraps text in double quotes, escaping quotes, backslashes and newlines.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders a float in the shortest fixed-point form that parses back to the
/// same value. Never uses an exponent; whole numbers have no decimal point.
pub fn format_float(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{}", value)
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Builds a wire line from parameters, separating them with single spaces.
#[derive(Debug, Default)]
pub struct LineBuilder {
    line: String,
}

impl LineBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            line: name.to_string(),
        }
    }

    fn space(&mut self) {
        if !self.line.is_empty() {
            self.line.push(' ');
        }
    }

    pub fn word(&mut self, word: &str) -> &mut Self {
        self.space();
        self.line.push_str(word);
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.space();
        self.line.push_str(&quote(text));
        self
    }

    pub fn uint(&mut self, n: u32) -> &mut Self {
        self.space();
        self.line.push_str(&n.to_string());
        self
    }

    pub fn float(&mut self, value: f64) -> &mut Self {
        self.space();
        self.line.push_str(&format_float(value));
        self
    }

    pub fn param(&mut self, param: &Param) -> &mut Self {
        self.space();
        self.line.push_str(&param.to_string());
        self
    }

    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.line)
    }
}

/// Checks that a keyword can be written bare.
pub fn check_word(
    command: &'static str,
    parameter: &'static str,
    word: &str,
) -> Result<(), EncodingError> {
    if word.is_empty() {
        return Err(EncodingError::invalid(command, parameter, "missing"));
    }
    if word.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        return Err(EncodingError::invalid(
            command,
            parameter,
            format!("{:?} must be a single bare word", word),
        ));
    }
    Ok(())
}

/// Checks that a text parameter can be quoted onto one line.
pub fn check_text(
    command: &'static str,
    parameter: &'static str,
    text: &str,
    required: bool,
) -> Result<(), EncodingError> {
    if required && text.is_empty() {
        return Err(EncodingError::invalid(command, parameter, "missing"));
    }
    if text.contains('\r') || text.contains('\0') {
        return Err(EncodingError::invalid(
            command,
            parameter,
            "must not contain carriage returns or NUL",
        ));
    }
    Ok(())
}

/// Checks a free-form parameter.
pub fn check_param(
    command: &'static str,
    parameter: &'static str,
    param: &Param,
) -> Result<(), EncodingError> {
    match param {
        Param::Word(word) => check_word(command, parameter, word),
        Param::Text(text) => check_text(command, parameter, text, false),
        Param::Float(v) if !v.is_finite() => Err(EncodingError::invalid(
            command,
            parameter,
            "must be a finite number",
        )),
        _ => Ok(()),
    }
}

/// A token of a wire line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    /// Text that was written in quotes, with escapes resolved.
    Quoted(String),
}

impl Token {
    pub fn text(&self) -> &str {
        match self {
            Token::Word(s) | Token::Quoted(s) => s,
        }
    }

    pub fn is_quoted(&self) -> bool {
        matches!(self, Token::Quoted(_))
    }

    /// Returns true for an unquoted token equal to `keyword`, ignoring case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

/// Splits a wire line into tokens, honouring quotes and escapes.
pub fn tokenize(line: &str) -> Result<Vec<Token>, EncodingError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some('n') => text.push('\n'),
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => text.push('\\'),
                    },
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(EncodingError::parse("unterminated quoted parameter"));
            }
            tokens.push(Token::Quoted(text));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("CG1"), "\"CG1\"");
        assert_eq!(quote("my clip"), "\"my clip\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
        assert_eq!(quote("line1\nline2"), "\"line1\\nline2\"");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(1.0), "1");
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(-0.0), "0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(1.0 / 3.0), "0.3333333333333333");
        assert_eq!(format_float(1e-7), "0.0000001");
        assert_eq!(format_float(1e21), "1000000000000000000000");
        assert_eq!(format_float(-1.5), "-1.5");
        assert_eq!(format_float(100.0), "100");
    }

    #[test]
    fn test_format_float_round_trips_through_parse() {
        for value in [0.5, 0.75, 1.0, 0.333333, 12.125, 0.000001, 4e-7, 1.0 / 3.0, 2.5e20] {
            let rendered = format_float(value);
            assert!(!rendered.contains('e'), "{}", rendered);
            let parsed: f64 = rendered.parse().unwrap();
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize(r#"LOAD 1-1 "my clip" MIX 20"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("LOAD".into()),
                Token::Word("1-1".into()),
                Token::Quoted("my clip".into()),
                Token::Word("MIX".into()),
                Token::Word("20".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_escapes_and_whitespace() {
        let tokens = tokenize("  CG 1-1 UPDATE 1 \"<a v=\\\"1\\\"/>\\n\"  ").unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[4], Token::Quoted("<a v=\"1\"/>\n".into()));
    }

    #[test]
    fn test_tokenize_empty_quoted() {
        let tokens = tokenize(r#"CLS """#).unwrap();
        assert_eq!(tokens[1], Token::Quoted(String::new()));
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert!(matches!(
            tokenize(r#"LOAD 1-1 "oops"#),
            Err(EncodingError::Parse(_))
        ));
    }

    #[test]
    fn test_quote_tokenize_round_trip() {
        for text in ["plain", "with space", "q\"uote", "back\\slash", "multi\nline", ""] {
            let tokens = tokenize(&quote(text)).unwrap();
            assert_eq!(tokens, vec![Token::Quoted(text.to_string())]);
        }
    }

    #[test]
    fn test_param_from_token() {
        assert_eq!(Param::from_token(&Token::Word("true".into())), Param::Bool(true));
        assert_eq!(Param::from_token(&Token::Word("42".into())), Param::Int(42));
        assert_eq!(Param::from_token(&Token::Word("-3".into())), Param::Int(-3));
        assert_eq!(Param::from_token(&Token::Word("0.5".into())), Param::Float(0.5));
        assert_eq!(
            Param::from_token(&Token::Word("inf".into())),
            Param::Word("inf".into())
        );
        assert_eq!(
            Param::from_token(&Token::Word("PAL".into())),
            Param::Word("PAL".into())
        );
        assert_eq!(
            Param::from_token(&Token::Quoted("42".into())),
            Param::Text("42".into())
        );
    }

    #[test]
    fn test_float_param_keeps_its_type() {
        for value in [3.0, 1e20, 4e-7, -2.0, 0.0] {
            let word = Param::Float(value).to_string();
            assert_eq!(
                Param::from_token(&Token::Word(word.clone())),
                Param::Float(value),
                "{}",
                word
            );
        }
    }

    #[test]
    fn test_param_display() {
        assert_eq!(Param::Bool(false).to_string(), "false");
        assert_eq!(Param::Float(0.5).to_string(), "0.5");
        assert_eq!(Param::Float(3.0).to_string(), "3.0");
        assert_eq!(Param::Float(1e20).to_string(), "100000000000000000000.0");
        assert_eq!(Param::Text("a b".into()).to_string(), "\"a b\"");
        assert_eq!(Param::Int(-7).to_string(), "-7");
    }

    #[test]
    fn test_line_builder() {
        let line = LineBuilder::new("MIXER")
            .word("1-10")
            .word("OPACITY")
            .float(0.5)
            .uint(25)
            .word("LINEAR")
            .finish();
        assert_eq!(line, "MIXER 1-10 OPACITY 0.5 25 LINEAR");
    }

    #[test]
    fn test_checks() {
        assert!(check_word("SET", "variable", "MODE").is_ok());
        assert!(check_word("SET", "variable", "").is_err());
        assert!(check_word("SET", "variable", "TWO WORDS").is_err());
        assert!(check_text("LOAD", "clip", "", true).is_err());
        assert!(check_text("CLS", "directory", "", false).is_ok());
        assert!(check_text("LOAD", "clip", "bad\rname", true).is_err());
        assert!(check_param("CALL", "value", &Param::Float(f64::NAN)).is_err());
    }
}
