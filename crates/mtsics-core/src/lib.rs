//! # MT-SICS Core Library
//!
//! Core functionality for controlling Mettler Toledo laboratory balances over
//! the MT-SICS command set.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A blocking command/response engine with per-call timeouts and cancellation
//! - Continuous weight acquisition bounded by count or time
//! - A declarative catalog of balance operations
//! - Serial and TCP transports, plus a simulated balance for demo mode
//!
//! ## Example
//!
//! ```rust,ignore
//! use mtsics_core::{config::BalanceConfig, Balance, StreamBounds};
//!
//! let config = BalanceConfig::load("balance.json")?;
//! let mut balance = Balance::connect(&config)?;
//!
//! balance.zero()?;
//! let reading = balance.weight()?;
//! println!("{} {}", reading.value, reading.unit);
//!
//! // Five transfer-key presses, at most one minute
//! let readings = balance.stream(StreamBounds::new(Some(5), Some(Duration::from_secs(60))))?;
//! ```

pub mod balance;
pub mod catalog;
pub mod config;
pub mod protocol;
pub mod simulator;
pub mod stream;

pub use balance::{Balance, TargetWeight};
pub use stream::{StreamBounds, StreamingReader};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::balance::{Balance, TargetWeight};
    pub use crate::catalog::{CommandCatalog, Operation, Reply, UnitChannel};
    pub use crate::config::BalanceConfig;
    pub use crate::protocol::{
        ChannelConfig, Command, CommandChannel, DeviceStatus, DoorStatus, Measurement,
        ProtocolError, ResponsePattern, SerialConfig, Transport,
    };
    pub use crate::simulator::SimulatedBalance;
    pub use crate::stream::{SessionState, StreamBounds, StreamSession, StreamingReader};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
