//! Response matching and typed field parsing
//!
//! A [`ResponsePattern`] is compiled twice: once framed, so that it only
//! matches a reply whose line terminator has arrived, and once bare, for
//! parsing a single line that has already been split off a stream.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ProtocolError, Result};

/// Matcher over raw reply bytes with positional capture groups
#[derive(Debug, Clone)]
pub struct ResponsePattern {
    source: String,
    framed: Regex,
    bare: Regex,
}

impl ResponsePattern {
    /// Compile a pattern body such as `S S +([-+]?[0-9.]+) (\S+)`
    pub fn new(body: &str) -> Result<Self> {
        let compile = |re: String| {
            Regex::new(&re).map_err(|e| {
                ProtocolError::Configuration(format!("invalid response pattern {:?}: {}", body, e))
            })
        };
        Ok(Self {
            source: body.to_string(),
            framed: compile(format!(r"(?m)^(?:{}) *\r?\n", body))?,
            bare: compile(format!(r"^(?:{})\s*$", body))?,
        })
    }

    /// The pattern body as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether a complete reply line matching the pattern is in `buf`
    pub fn is_match(&self, buf: &[u8]) -> bool {
        self.framed.is_match(buf)
    }

    /// Capture groups of the first complete matching line in `buf`
    pub fn fields(&self, buf: &[u8]) -> Option<Vec<String>> {
        self.framed.captures(buf).map(|caps| collect_fields(&caps))
    }

    /// Text of the first complete matching line in `buf`, without terminator
    pub fn matched_line(&self, buf: &[u8]) -> Option<String> {
        self.framed.find(buf).map(|m| {
            String::from_utf8_lossy(m.as_bytes())
                .trim_end()
                .to_string()
        })
    }

    /// Capture groups of a single line, terminator optional
    pub fn parse_line(&self, line: &str) -> Option<Vec<String>> {
        let line = line.trim_end_matches(['\r', '\n']);
        self.bare
            .captures(line.as_bytes())
            .map(|caps| collect_fields(&caps))
    }
}

impl fmt::Display for ResponsePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_fields(caps: &regex::bytes::Captures<'_>) -> Vec<String> {
    caps.iter()
        .skip(1)
        .map(|m| {
            m.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                .unwrap_or_default()
        })
        .collect()
}

/// Parse a signed decimal such as `12.34`, `-0.02` or `+3`
pub fn parse_decimal(field: &'static str, text: &str) -> Result<f64> {
    let err = || ProtocolError::Parse {
        field,
        text: text.to_string(),
    };
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    let dots = digits.chars().filter(|c| *c == '.').count();
    let valid = !digits.is_empty()
        && dots <= 1
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !valid {
        return Err(err());
    }
    text.parse::<f64>().map_err(|_| err())
}

/// Parse a contiguous alphabetic token such as a unit
pub fn parse_token(field: &'static str, text: &str) -> Result<String> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ProtocolError::Parse {
            field,
            text: text.to_string(),
        });
    }
    Ok(text.to_string())
}

/// A weight value together with its unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Signed weight value
    pub value: f64,
    /// Alphabetic unit token, e.g. `g`
    pub unit: String,
}

impl Measurement {
    /// Build a measurement from captured value and unit text
    ///
    /// Both fields must convert, otherwise no measurement is produced.
    pub fn from_fields(value: &str, unit: &str) -> Result<Self> {
        let value = parse_decimal("weight value", value)?;
        let unit = parse_token("weight unit", unit)?;
        Ok(Self { value, unit })
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Status letter carried by most replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// `A`: command executed
    Acknowledged,
    /// `L`: device already in the requested state
    AlreadyInState,
    /// `I`: command understood but not executable right now
    Intermediate,
    /// `S`: stable weight
    Stable,
    /// `D`: dynamic (not yet settled) weight
    Dynamic,
    /// `+`: balance in overload range
    Overload,
    /// `-`: balance in underload range
    Underload,
}

impl DeviceStatus {
    /// Map a status letter
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "A" => Ok(DeviceStatus::Acknowledged),
            "L" => Ok(DeviceStatus::AlreadyInState),
            "I" => Ok(DeviceStatus::Intermediate),
            "S" => Ok(DeviceStatus::Stable),
            "D" => Ok(DeviceStatus::Dynamic),
            "+" => Ok(DeviceStatus::Overload),
            "-" => Ok(DeviceStatus::Underload),
            _ => Err(ProtocolError::Parse {
                field: "status",
                text: code.to_string(),
            }),
        }
    }

    /// Acknowledged and already-in-state both count as success for toggles
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Acknowledged | DeviceStatus::AlreadyInState
        )
    }

    /// Overload and underload are device error conditions
    pub fn is_error(&self) -> bool {
        matches!(self, DeviceStatus::Overload | DeviceStatus::Underload)
    }
}

/// Draft shield door state reported by `WS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoorStatus {
    AllClosed,
    RightOpen,
    LeftOpen,
    TopOpen,
    RightAndLeftOpen,
    AllOpen,
    RightAndTopOpen,
    LeftAndTopOpen,
    Error,
    Intermediate,
}

impl DoorStatus {
    /// Map a status digit 0-9
    pub fn from_digit(digit: &str) -> Result<Self> {
        let status = match digit {
            "0" => DoorStatus::AllClosed,
            "1" => DoorStatus::RightOpen,
            "2" => DoorStatus::LeftOpen,
            "3" => DoorStatus::TopOpen,
            "4" => DoorStatus::RightAndLeftOpen,
            "5" => DoorStatus::AllOpen,
            "6" => DoorStatus::RightAndTopOpen,
            "7" => DoorStatus::LeftAndTopOpen,
            "8" => DoorStatus::Error,
            "9" => DoorStatus::Intermediate,
            _ => {
                return Err(ProtocolError::Parse {
                    field: "door status",
                    text: digit.to_string(),
                })
            }
        };
        Ok(status)
    }

    /// Wire digit of this status
    pub fn code(&self) -> u8 {
        match self {
            DoorStatus::AllClosed => 0,
            DoorStatus::RightOpen => 1,
            DoorStatus::LeftOpen => 2,
            DoorStatus::TopOpen => 3,
            DoorStatus::RightAndLeftOpen => 4,
            DoorStatus::AllOpen => 5,
            DoorStatus::RightAndTopOpen => 6,
            DoorStatus::LeftAndTopOpen => 7,
            DoorStatus::Error => 8,
            DoorStatus::Intermediate => 9,
        }
    }

    /// True while the doors are still moving
    pub fn is_transitional(&self) -> bool {
        *self == DoorStatus::Intermediate
    }
}
