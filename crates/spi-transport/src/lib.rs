//! spi-transport: word-level SPI exchange abstractions
//!
//! This crate provides the [`Transport`] trait that device drivers call to move 32-bit
//! frames across an SPI bus, with feature-gated backends. The default build enables a
//! scripted `mock` backend so that drivers and binaries can be exercised on any host.

mod types;
pub use types::{BusInfo, TransferStats};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Transport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockTransport;

#[cfg(feature = "bridge")]
mod bridge;

#[cfg(feature = "bridge")]
pub use bridge::{SerialBridge, SpiClock};
