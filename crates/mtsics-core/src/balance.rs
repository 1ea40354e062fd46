//! Balance facade
//!
//! Typed entry points over the [`CommandCatalog`]. Each method only chooses
//! an operation and its parameters; sending, matching and parsing are done by
//! the catalog and the channel.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CommandCatalog, Operation, Reply, UnitChannel};
use crate::config::BalanceConfig;
use crate::protocol::{
    ChannelConfig, CommandChannel, DeviceStatus, DoorStatus, Measurement, Param, ProtocolError,
    Result, SerialTransport, Transport,
};
use crate::stream::{StreamBounds, StreamingReader};

/// Target weight with tolerance band for fill-to-target workflows
#[derive(Debug, Clone, PartialEq)]
pub struct TargetWeight {
    pub value: f64,
    pub unit: String,
    pub upper_tolerance: f64,
    pub lower_tolerance: f64,
    /// Tolerances in percent of the target instead of in `unit`
    pub relative: bool,
}

impl TargetWeight {
    fn steps(&self) -> [(Operation, Vec<Param>); 3] {
        let tolerance_unit = if self.relative {
            "%".to_string()
        } else {
            self.unit.clone()
        };
        [
            (
                Operation::SetTargetValue,
                vec![Param::Decimal(self.value), Param::Token(self.unit.clone())],
            ),
            (
                Operation::SetUpperTolerance,
                vec![
                    Param::Decimal(self.upper_tolerance),
                    Param::Token(tolerance_unit.clone()),
                ],
            ),
            (
                Operation::SetLowerTolerance,
                vec![
                    Param::Decimal(self.lower_tolerance),
                    Param::Token(tolerance_unit),
                ],
            ),
        ]
    }
}

/// A balance behind an exclusively owned transport
pub struct Balance<T: Transport> {
    channel: CommandChannel<T>,
    catalog: CommandCatalog,
}

impl Balance<SerialTransport> {
    /// Open the configured serial port
    pub fn connect(config: &BalanceConfig) -> Result<Self> {
        let transport = SerialTransport::open(&config.serial)?;
        tracing::info!(port = %config.serial.port_name, "connected to balance");
        Self::new(transport, config.channel.clone())
    }
}

impl<T: Transport> Balance<T> {
    /// Wrap a transport with the standard catalog
    pub fn new(transport: T, config: ChannelConfig) -> Result<Self> {
        Ok(Self::with_catalog(
            CommandChannel::new(transport, config),
            CommandCatalog::new()?,
        ))
    }

    /// Use a custom channel and catalog
    pub fn with_catalog(channel: CommandChannel<T>, catalog: CommandCatalog) -> Self {
        Self { channel, catalog }
    }

    pub fn channel(&self) -> &CommandChannel<T> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<T> {
        &mut self.channel
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Token that aborts pending waits and streaming sessions
    pub fn cancel_token(&self) -> CancellationToken {
        self.channel.cancel_token()
    }

    /// Close the transport
    pub fn close(&mut self) -> Result<()> {
        self.channel.close()
    }

    /// Run any catalog operation
    pub fn execute(&mut self, operation: Operation, params: &[Param]) -> Result<Reply> {
        self.catalog.execute(&mut self.channel, operation, params)
    }

    fn execute_status(&mut self, operation: Operation, params: &[Param]) -> Result<DeviceStatus> {
        match self.execute(operation, params)? {
            Reply::Status(status) => Ok(status),
            _ => Err(unexpected(operation)),
        }
    }

    fn execute_measurement(&mut self, operation: Operation) -> Result<Measurement> {
        match self.execute(operation, &[])? {
            Reply::Measurement(m) => Ok(m),
            _ => Err(unexpected(operation)),
        }
    }

    /// Leave stand-by; `AlreadyInState` if it was already on
    pub fn power_on(&mut self) -> Result<DeviceStatus> {
        self.execute_status(Operation::PowerOn, &[])
    }

    /// Enter stand-by; `AlreadyInState` if it was already off
    pub fn power_off(&mut self) -> Result<DeviceStatus> {
        self.execute_status(Operation::PowerOff, &[])
    }

    /// Set the current weight as zero
    pub fn zero(&mut self) -> Result<()> {
        self.execute_status(Operation::Zero, &[]).map(|_| ())
    }

    /// Tare and return the stored tare weight
    pub fn tare(&mut self) -> Result<Measurement> {
        self.execute_measurement(Operation::Tare)
    }

    /// Stable net weight
    pub fn weight(&mut self) -> Result<Measurement> {
        self.execute_measurement(Operation::Weight)
    }

    /// Current weight without waiting for stability
    pub fn weight_immediately(&mut self) -> Result<(DeviceStatus, Measurement)> {
        match self.execute(Operation::WeightImmediately, &[])? {
            Reply::Reading {
                status,
                measurement,
            } => Ok((status, measurement)),
            _ => Err(unexpected(Operation::WeightImmediately)),
        }
    }

    /// Set target weight, then upper and lower tolerance
    ///
    /// All three commands are rendered before the first is sent, so invalid
    /// parameters never leave the device half configured.
    pub fn set_target(&mut self, target: &TargetWeight) -> Result<()> {
        let prepared = target
            .steps()
            .iter()
            .map(|(op, params)| self.catalog.prepare(*op, params))
            .collect::<Result<Vec<_>>>()?;
        for step in prepared {
            step.run(&mut self.channel)?;
        }
        Ok(())
    }

    /// Label the result, e.g. ("Sample No.:", "1234")
    pub fn set_result_id(&mut self, label: &str, value: &str) -> Result<()> {
        self.execute_status(Operation::SetResultId, &quoted_pair(label, value))
            .map(|_| ())
    }

    /// Label the task step, e.g. ("Process step:", "1st weighing")
    pub fn set_task_id(&mut self, label: &str, value: &str) -> Result<()> {
        self.execute_status(Operation::SetTaskId, &quoted_pair(label, value))
            .map(|_| ())
    }

    /// Overlay a message on the weight display; empty clears it
    pub fn set_message(&mut self, message: &str) -> Result<()> {
        self.execute_status(Operation::DisplayMessage, &[Param::Quoted(message.to_string())])
            .map(|_| ())
    }

    /// Return the display to the weight value
    pub fn show_weight(&mut self) -> Result<()> {
        self.execute_status(Operation::ShowWeight, &[]).map(|_| ())
    }

    /// Unit used on `channel`
    pub fn unit(&mut self, channel: UnitChannel) -> Result<String> {
        match self.execute(Operation::GetUnit, &[Param::Int(channel.code())])? {
            Reply::Unit { unit, .. } => Ok(unit),
            _ => Err(unexpected(Operation::GetUnit)),
        }
    }

    /// Change the unit used on `channel`
    pub fn set_unit(&mut self, channel: UnitChannel, unit: &str) -> Result<()> {
        self.execute_status(
            Operation::SetUnit,
            &[Param::Int(channel.code()), Param::Token(unit.to_string())],
        )
        .map(|_| ())
    }

    /// Draft shield door state
    pub fn door_status(&mut self) -> Result<DoorStatus> {
        match self.execute(Operation::DoorStatus, &[])? {
            Reply::Door(status) => Ok(status),
            _ => Err(unexpected(Operation::DoorStatus)),
        }
    }

    pub fn close_all_doors(&mut self) -> Result<DeviceStatus> {
        self.execute_status(Operation::CloseAllDoors, &[])
    }

    pub fn open_right_door(&mut self) -> Result<DeviceStatus> {
        self.execute_status(Operation::OpenRightDoor, &[])
    }

    pub fn open_left_door(&mut self) -> Result<DeviceStatus> {
        self.execute_status(Operation::OpenLeftDoor, &[])
    }

    /// Collect continuous-mode measurements within `bounds`
    pub fn stream(&mut self, bounds: StreamBounds) -> Result<Vec<Measurement>> {
        StreamingReader::new(&mut self.channel, &self.catalog)?.stream(bounds)
    }

    /// Collect up to `count` transfer-key measurements, or until `timeout`
    pub fn weight_on_key(
        &mut self,
        count: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Measurement>> {
        self.stream(StreamBounds::new(count, timeout))
    }
}

fn quoted_pair(label: &str, value: &str) -> [Param; 2] {
    [
        Param::Quoted(label.to_string()),
        Param::Quoted(value.to_string()),
    ]
}

fn unexpected(operation: Operation) -> ProtocolError {
    ProtocolError::UnexpectedReply {
        operation: operation.to_string(),
    }
}
