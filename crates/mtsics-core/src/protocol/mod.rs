//! MT-SICS Protocol Communication
//!
//! Line-oriented ASCII command/response protocol used by Mettler Toledo
//! balances. Commands and replies are single lines terminated by CRLF.

mod channel;
mod command;
mod error;
pub mod pattern;
pub mod serial;
pub mod transport;

pub use channel::{ChannelConfig, CommandChannel, TrafficCounters};
pub use command::{Command, Param};
pub use error::{ProtocolError, Result};
pub use pattern::{DeviceStatus, DoorStatus, Measurement, ResponsePattern};
pub use serial::{list_ports, open_port, PortInfo, SerialConfig};
pub use transport::{SerialTransport, TcpTransport, Transport};

/// Default baud rate for MT-SICS balances
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for a command's reply in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default transport-level read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Line terminator used in both directions
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Maximum number of observed bytes reported in a timeout error
pub const MAX_OBSERVED_BYTES: usize = 256;
