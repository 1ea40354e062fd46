//! Command catalog
//!
//! Every balance operation is a row of data: a command template, the reply
//! pattern that completes it, and the extractor that turns the captured
//! fields into a typed [`Reply`]. One generic path executes all of them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::protocol::pattern::{parse_token, DeviceStatus, DoorStatus, Measurement};
use crate::protocol::{Command, CommandChannel, Param, ProtocolError, ResponsePattern, Result, Transport};

/// Semantic balance operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    PowerOn,
    PowerOff,
    Zero,
    Tare,
    Weight,
    WeightImmediately,
    SetTargetValue,
    SetUpperTolerance,
    SetLowerTolerance,
    SetResultId,
    SetTaskId,
    DisplayMessage,
    ShowWeight,
    GetUnit,
    SetUnit,
    DoorStatus,
    CloseAllDoors,
    OpenRightDoor,
    OpenLeftDoor,
    StartStreaming,
    StopStreaming,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Weighing unit channel addressed by `M21`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitChannel {
    /// Unit used on the host interface
    Host,
    /// Unit shown on the display
    Display,
    /// Unit shown in the display's info field
    Info,
}

impl UnitChannel {
    /// Wire code of the channel
    pub fn code(&self) -> i64 {
        match self {
            UnitChannel::Host => 0,
            UnitChannel::Display => 1,
            UnitChannel::Info => 2,
        }
    }

    /// Map a wire code back to a channel
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "0" => Ok(UnitChannel::Host),
            "1" => Ok(UnitChannel::Display),
            "2" => Ok(UnitChannel::Info),
            _ => Err(ProtocolError::Parse {
                field: "unit channel",
                text: code.to_string(),
            }),
        }
    }
}

/// Command line template: verb, fixed arguments, then `arity` parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub verb: &'static str,
    pub fixed: &'static [&'static str],
    pub arity: usize,
}

impl CommandTemplate {
    /// Render the template with `params`
    pub fn render(&self, params: &[Param]) -> Result<Command> {
        if params.len() != self.arity {
            return Err(ProtocolError::Configuration(format!(
                "{} expects {} parameter(s), got {}",
                self.verb,
                self.arity,
                params.len()
            )));
        }
        Command::build(self.verb, self.fixed, params)
    }
}

/// How captured fields become a [`Reply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldExtractor {
    /// `[status]`
    Status,
    /// `[value, unit]`
    Measurement,
    /// `[status, value, unit]`
    Reading,
    /// `[channel, unit]`
    Unit,
    /// `[door digit]`
    Door,
}

/// Typed result of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Status(DeviceStatus),
    Measurement(Measurement),
    Reading {
        status: DeviceStatus,
        measurement: Measurement,
    },
    Unit {
        channel: UnitChannel,
        unit: String,
    },
    Door(DoorStatus),
}

fn field<'f>(fields: &'f [String], index: usize, name: &'static str) -> Result<&'f str> {
    fields
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| ProtocolError::Parse {
            field: name,
            text: fields.join(" "),
        })
}

impl FieldExtractor {
    /// Convert captured fields
    pub fn extract(&self, fields: &[String]) -> Result<Reply> {
        match self {
            FieldExtractor::Status => Ok(Reply::Status(DeviceStatus::from_code(field(
                fields, 0, "status",
            )?)?)),
            FieldExtractor::Measurement => Ok(Reply::Measurement(Measurement::from_fields(
                field(fields, 0, "weight value")?,
                field(fields, 1, "weight unit")?,
            )?)),
            FieldExtractor::Reading => Ok(Reply::Reading {
                status: DeviceStatus::from_code(field(fields, 0, "status")?)?,
                measurement: Measurement::from_fields(
                    field(fields, 1, "weight value")?,
                    field(fields, 2, "weight unit")?,
                )?,
            }),
            FieldExtractor::Unit => Ok(Reply::Unit {
                channel: UnitChannel::from_code(field(fields, 0, "unit channel")?)?,
                unit: parse_token("unit", field(fields, 1, "unit")?)?,
            }),
            FieldExtractor::Door => Ok(Reply::Door(DoorStatus::from_digit(field(
                fields,
                0,
                "door status",
            )?)?)),
        }
    }
}

/// One row of the catalog
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub operation: Operation,
    pub template: CommandTemplate,
    pub pattern: ResponsePattern,
    /// Error replies that end the wait early
    pub rejection: ResponsePattern,
    pub extractor: FieldExtractor,
}

/// Generic `ES`/`ET`/`EL` errors, or the reply verb followed by `I`, `+` or `-`
fn rejection_body(pattern: &str) -> String {
    let verb: String = pattern
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if verb.is_empty() {
        "ES|ET|EL".to_string()
    } else {
        format!("ES|ET|EL|{} [I+-]", verb)
    }
}

impl CatalogEntry {
    /// Compile an entry
    ///
    /// The rejection pattern is derived from the verb the reply starts with.
    pub fn new(
        operation: Operation,
        template: CommandTemplate,
        pattern: &str,
        extractor: FieldExtractor,
    ) -> Result<Self> {
        Ok(Self {
            operation,
            template,
            pattern: ResponsePattern::new(pattern)?,
            rejection: ResponsePattern::new(&rejection_body(pattern))?,
            extractor,
        })
    }

    /// Render the command for `params`
    pub fn command(&self, params: &[Param]) -> Result<Command> {
        self.template.render(params)
    }

    /// Extract the reply from bytes returned by the channel
    pub fn parse(&self, reply: &[u8]) -> Result<Reply> {
        let fields = self.pattern.fields(reply).ok_or_else(|| ProtocolError::Parse {
            field: "reply",
            text: String::from_utf8_lossy(reply).into_owned(),
        })?;
        self.extractor.extract(&fields)
    }

    /// Extract the reply from a single line
    pub fn parse_line(&self, line: &str) -> Result<Reply> {
        let fields = self.pattern.parse_line(line).ok_or_else(|| ProtocolError::Parse {
            field: "reply",
            text: line.to_string(),
        })?;
        self.extractor.extract(&fields)
    }
}

/// A rendered command bound to its catalog entry, ready to run
#[derive(Debug)]
pub struct PreparedCommand<'c> {
    pub entry: &'c CatalogEntry,
    pub command: Command,
}

impl PreparedCommand<'_> {
    /// Send the command and extract the reply
    pub fn run<T: Transport>(&self, channel: &mut CommandChannel<T>) -> Result<Reply> {
        let reply = channel.send_and_await_or_reject(
            &self.command,
            &self.entry.pattern,
            &self.entry.rejection,
        )?;
        self.entry.parse(&reply)
    }
}

const VALUE: &str = r"(\S+)";

/// Reply frame emitted while continuous transmission is active
const STREAM_FRAME: &str = r"ST +(\S+) (\S+)";

const fn template(
    verb: &'static str,
    fixed: &'static [&'static str],
    arity: usize,
) -> CommandTemplate {
    CommandTemplate { verb, fixed, arity }
}

/// Operation table
fn default_rows() -> Vec<(Operation, CommandTemplate, String, FieldExtractor)> {
    use FieldExtractor as X;
    use Operation as Op;

    let weight = |prefix: &str| format!("{} +{} {}", prefix, VALUE, VALUE);
    vec![
        (Op::PowerOn, template("PWR", &["1"], 0), "PWR ([AL])".into(), X::Status),
        (Op::PowerOff, template("PWR", &["0"], 0), "PWR ([AL])".into(), X::Status),
        (Op::Zero, template("Z", &[], 0), "Z (A)".into(), X::Status),
        (Op::Tare, template("T", &[], 0), weight("T S"), X::Measurement),
        (Op::Weight, template("S", &[], 0), weight("S S"), X::Measurement),
        (Op::WeightImmediately, template("SI", &[], 0), weight("S ([SD])"), X::Reading),
        (Op::SetTargetValue, template("A10", &["0"], 2), "A10 (A)".into(), X::Status),
        (Op::SetUpperTolerance, template("A10", &["1"], 2), "A10 (A)".into(), X::Status),
        (Op::SetLowerTolerance, template("A10", &["2"], 2), "A10 (A)".into(), X::Status),
        (Op::SetResultId, template("A36", &["1"], 2), "A36 (A)".into(), X::Status),
        (Op::SetTaskId, template("A37", &["1"], 2), "A37 (A)".into(), X::Status),
        (Op::DisplayMessage, template("D", &[], 1), "D (A)".into(), X::Status),
        (Op::ShowWeight, template("DW", &[], 0), "DW (A)".into(), X::Status),
        (Op::GetUnit, template("M21", &[], 1), format!("M21 A ([0-9]) {}", VALUE), X::Unit),
        (Op::SetUnit, template("M21", &[], 2), "M21 (A)".into(), X::Status),
        (Op::DoorStatus, template("WS", &[], 0), "WS (?:A )?([0-9])".into(), X::Door),
        (Op::CloseAllDoors, template("WS", &["0"], 0), "WS ([AL])".into(), X::Status),
        (Op::OpenRightDoor, template("WS", &["1"], 0), "WS ([AL])".into(), X::Status),
        (Op::OpenLeftDoor, template("WS", &["2"], 0), "WS ([AL])".into(), X::Status),
        (Op::StartStreaming, template("ST", &["1"], 0), "ST ([AL])".into(), X::Status),
        (Op::StopStreaming, template("ST", &["0"], 0), "ST ([AL])".into(), X::Status),
    ]
}

/// Declarative table of balance operations
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    entries: HashMap<Operation, CatalogEntry>,
    frame: ResponsePattern,
}

impl CommandCatalog {
    /// Compile the standard MT-SICS catalog
    pub fn new() -> Result<Self> {
        let mut entries = HashMap::new();
        for (operation, template, pattern, extractor) in default_rows() {
            entries.insert(
                operation,
                CatalogEntry::new(operation, template, &pattern, extractor)?,
            );
        }
        Ok(Self {
            entries,
            frame: ResponsePattern::new(STREAM_FRAME)?,
        })
    }

    /// Add or replace an entry
    pub fn with_entry(mut self, entry: CatalogEntry) -> Self {
        self.entries.insert(entry.operation, entry);
        self
    }

    /// Look up an operation
    pub fn entry(&self, operation: Operation) -> Result<&CatalogEntry> {
        self.entries.get(&operation).ok_or_else(|| {
            ProtocolError::Configuration(format!("operation {} is not in the catalog", operation))
        })
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pattern of a continuous-mode measurement frame
    pub fn frame_pattern(&self) -> &ResponsePattern {
        &self.frame
    }

    /// Render an operation's command without sending it
    pub fn prepare(&self, operation: Operation, params: &[Param]) -> Result<PreparedCommand<'_>> {
        let entry = self.entry(operation)?;
        Ok(PreparedCommand {
            entry,
            command: entry.command(params)?,
        })
    }

    /// Run an operation over `channel`
    pub fn execute<T: Transport>(
        &self,
        channel: &mut CommandChannel<T>,
        operation: Operation,
        params: &[Param],
    ) -> Result<Reply> {
        self.prepare(operation, params)?.run(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> CommandCatalog {
        CommandCatalog::new().unwrap()
    }

    fn render(op: Operation, params: &[Param]) -> String {
        catalog().prepare(op, params).unwrap().command.to_string()
    }

    #[test]
    fn test_catalog_is_complete() {
        assert_eq!(catalog().len(), 21);
    }

    #[test]
    fn test_fixed_commands() {
        assert_eq!(render(Operation::PowerOn, &[]), "PWR 1");
        assert_eq!(render(Operation::PowerOff, &[]), "PWR 0");
        assert_eq!(render(Operation::Weight, &[]), "S");
        assert_eq!(render(Operation::DoorStatus, &[]), "WS");
        assert_eq!(render(Operation::OpenLeftDoor, &[]), "WS 2");
        assert_eq!(render(Operation::StopStreaming, &[]), "ST 0");
    }

    #[test]
    fn test_parameterised_commands() {
        assert_eq!(
            render(Operation::GetUnit, &[Param::Int(UnitChannel::Display.code())]),
            "M21 1"
        );
        assert_eq!(
            render(
                Operation::SetUnit,
                &[Param::Int(UnitChannel::Host.code()), Param::Token("mg".into())]
            ),
            "M21 0 mg"
        );
        assert_eq!(
            render(Operation::DisplayMessage, &[Param::Quoted("See PC".into())]),
            "D \"See PC\""
        );
    }

    #[test]
    fn test_arity_mismatch_is_configuration_error() {
        let err = catalog().prepare(Operation::Zero, &[Param::Int(1)]).unwrap_err();
        assert!(matches!(err, ProtocolError::Configuration(_)));
    }

    #[test]
    fn test_weight_reply_parsing() {
        let cat = catalog();
        let entry = cat.entry(Operation::Weight).unwrap();
        assert_eq!(
            entry.parse_line("S S    12.34 g").unwrap(),
            Reply::Measurement(Measurement { value: 12.34, unit: "g".into() })
        );
        assert_eq!(
            entry.parse_line("S S   -0.02 g").unwrap(),
            Reply::Measurement(Measurement { value: -0.02, unit: "g".into() })
        );
    }

    #[test]
    fn test_malformed_value_is_parse_error() {
        let cat = catalog();
        let entry = cat.entry(Operation::Tare).unwrap();
        assert!(matches!(
            entry.parse(b"T S  1.2.3 g\r\n"),
            Err(ProtocolError::Parse { field: "weight value", .. })
        ));
    }

    #[test]
    fn test_reading_and_unit_replies() {
        let cat = catalog();
        assert_eq!(
            cat.entry(Operation::WeightImmediately)
                .unwrap()
                .parse(b"S D      5.01 g\r\n")
                .unwrap(),
            Reply::Reading {
                status: DeviceStatus::Dynamic,
                measurement: Measurement { value: 5.01, unit: "g".into() },
            }
        );
        assert_eq!(
            cat.entry(Operation::GetUnit).unwrap().parse(b"M21 A 2 mg\r\n").unwrap(),
            Reply::Unit { channel: UnitChannel::Info, unit: "mg".into() }
        );
    }

    #[test]
    fn test_toggle_patterns_accept_ack_and_noop_only() {
        let cat = catalog();
        let entry = cat.entry(Operation::CloseAllDoors).unwrap();
        assert_eq!(
            entry.parse(b"WS A\r\n").unwrap(),
            Reply::Status(DeviceStatus::Acknowledged)
        );
        assert_eq!(
            entry.parse(b"WS L\r\n").unwrap(),
            Reply::Status(DeviceStatus::AlreadyInState)
        );
        assert!(!entry.pattern.is_match(b"WS I\r\n"));
    }

    #[test]
    fn test_door_status_does_not_match_toggle_ack() {
        let cat = catalog();
        let status = cat.entry(Operation::DoorStatus).unwrap();
        assert!(!status.pattern.is_match(b"WS A\r\n"));
        assert_eq!(
            status.parse(b"WS A 5\r\n").unwrap(),
            Reply::Door(DoorStatus::AllOpen)
        );
    }

    #[test]
    fn test_unit_get_and_set_patterns_are_distinct() {
        let cat = catalog();
        assert!(!cat.entry(Operation::SetUnit).unwrap().pattern.is_match(b"M21 A 0 g\r\n"));
        assert!(!cat.entry(Operation::GetUnit).unwrap().pattern.is_match(b"M21 A\r\n"));
    }

    #[test]
    fn test_frame_pattern_ignores_acks() {
        let cat = catalog();
        assert!(cat.frame_pattern().parse_line("ST A").is_none());
        assert_eq!(
            cat.frame_pattern().parse_line("ST     3.21 g"),
            Some(vec!["3.21".to_string(), "g".to_string()])
        );
    }

    #[test]
    fn test_rejection_uses_reply_verb() {
        let cat = catalog();
        let si = cat.entry(Operation::WeightImmediately).unwrap();
        assert!(si.rejection.is_match(b"S I\r\n"));
        assert!(si.rejection.is_match(b"S -\r\n"));
        assert!(!si.rejection.is_match(b"S D      5.01 g\r\n"));

        let power = cat.entry(Operation::PowerOn).unwrap();
        assert!(power.rejection.is_match(b"PWR I\r\n"));
        assert!(power.rejection.is_match(b"ES\r\n"));
        assert!(!power.rejection.is_match(b"PWR L\r\n"));
    }

    #[test]
    fn test_with_entry_extends_catalog() {
        let entry = CatalogEntry::new(
            Operation::Zero,
            template("ZI", &[], 0),
            "ZI ([DS])",
            FieldExtractor::Status,
        )
        .unwrap();
        let cat = catalog().with_entry(entry);
        assert_eq!(cat.len(), 21);
        assert_eq!(render_with(&cat, Operation::Zero), "ZI");
    }

    fn render_with(cat: &CommandCatalog, op: Operation) -> String {
        cat.prepare(op, &[]).unwrap().command.to_string()
    }
}
