//! solenoid-driver: protocol engine for a six-channel SPI solenoid driver IC
//!
//! Layers, leaves first: the CRC-8 engine ([`checksum`]), the 32-bit frame codec
//! ([`frame`]), the register map ([`registers`]), engineering-unit conversions
//! ([`units`]), the Configuration/Mission gate ([`mode`]) and the [`Driver`]
//! that sequences them over any [`spi_transport::Transport`].
//!
//! The default `sim` feature adds [`SimulatedDevice`], a register-level model of
//! the IC that plugs in as a transport.

pub mod checksum;
pub mod frame;
pub mod mode;
pub mod registers;
pub mod units;

mod driver;
pub use driver::Driver;

mod error;
pub use error::{DriverError, Result};

mod types;
pub use types::{
    Channel, ChannelConfig, ChannelDiagnostics, ChannelFaults, ChannelMode, DeviceStatus,
    DiagCurrent, DitherSettings, DriverConfig, FaultReport, GlobalConfig, GlobalFaults,
    ParallelPair, PwmPeriod, SlewRate, VioLevel,
};

pub use frame::{ReplyFrame, SpiFrame, SupplyChecks};
pub use mode::DeviceMode;

#[cfg(any(test, feature = "sim"))]
mod sim;

#[cfg(any(test, feature = "sim"))]
pub use sim::SimulatedDevice;
