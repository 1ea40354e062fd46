//! Protocol commands
//!
//! A command is a verb followed by space-separated parameters, sent as one
//! CRLF-terminated ASCII line.

use std::fmt;

use super::{ProtocolError, Result, LINE_TERMINATOR};

/// A typed command parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Integer, sent as decimal digits
    Int(i64),
    /// Decimal value, sent with two fractional digits
    Decimal(f64),
    /// Bare token such as a unit (`g`, `mg`, `%`)
    Token(String),
    /// String parameter, sent inside double quotes
    Quoted(String),
}

impl Param {
    /// Render the parameter as it appears on the wire
    fn render(&self) -> Result<String> {
        match self {
            Param::Int(v) => Ok(v.to_string()),
            Param::Decimal(v) => {
                if !v.is_finite() {
                    return Err(ProtocolError::Configuration(format!(
                        "decimal parameter must be finite, got {}",
                        v
                    )));
                }
                Ok(format!("{:.2}", v))
            }
            Param::Token(t) => {
                if t.is_empty() || t.chars().any(|c| c.is_whitespace() || c == '"') {
                    return Err(ProtocolError::Configuration(format!(
                        "token parameter {:?} must be non-empty without spaces or quotes",
                        t
                    )));
                }
                Ok(t.clone())
            }
            Param::Quoted(s) => {
                if s.contains(['"', '\r', '\n']) {
                    return Err(ProtocolError::Configuration(format!(
                        "string parameter {:?} must not contain quotes or line breaks",
                        s
                    )));
                }
                Ok(format!("\"{}\"", s))
            }
        }
    }
}

/// A single command line (without terminator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    line: String,
}

impl Command {
    /// Build a command from a verb, fixed arguments and typed parameters
    pub fn build(verb: &str, fixed: &[&str], params: &[Param]) -> Result<Self> {
        let mut line = String::from(verb);
        for arg in fixed {
            line.push(' ');
            line.push_str(arg);
        }
        for param in params {
            line.push(' ');
            line.push_str(&param.render()?);
        }
        Self::raw(line)
    }

    /// Wrap an already formatted line
    pub fn raw(line: impl Into<String>) -> Result<Self> {
        let line = line.into();
        if line.is_empty() || !line.is_ascii() || line.contains(['\r', '\n']) {
            return Err(ProtocolError::Configuration(format!(
                "command {:?} must be a non-empty single ASCII line",
                line
            )));
        }
        Ok(Self { line })
    }

    /// The command text without terminator
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Convert command to bytes, appending CRLF for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.line.len() + LINE_TERMINATOR.len());
        bytes.extend_from_slice(self.line.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}
