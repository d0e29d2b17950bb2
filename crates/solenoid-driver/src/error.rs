use crate::frame::SupplyChecks;
use crate::mode::DeviceMode;
use spi_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = DriverError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("driver not initialized")]
    NotInitialized,
    #[error("operation requires {required} mode, device is in {current} mode")]
    WrongMode {
        required: DeviceMode,
        current: DeviceMode,
    },
    #[error("transport failure: {0}")]
    Hardware(#[from] TransportError),
    #[error("device not responding")]
    DeviceNotResponding,
    #[error("unexpected device id: expected 0x{expected:02X}, found 0x{found:02X}")]
    WrongDeviceId { expected: u8, found: u8 },
    #[error("reply CRC mismatch: computed 0x{expected:02X}, received 0x{received:02X}")]
    Crc { expected: u8, received: u8 },
    #[error("device reported SPI frame error (status 0x{status:02X}) at 0x{address:03X}")]
    SpiFrame { address: u16, status: u8 },
    #[error("device reported register error (status 0x{status:02X}) at 0x{address:03X}")]
    Register { address: u16, status: u8 },
    #[error("register 0x{0:03X} is read-only")]
    WriteToReadOnly(u16),
    #[error("register 0x{0:03X} is write-only and has no shadow copy")]
    ReadFromWriteOnly(u16),
    #[error("write verification failed at 0x{address:03X}: wrote 0x{wrote:04X}, read 0x{read:04X}")]
    VerifyMismatch { address: u16, wrote: u16, read: u16 },
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("invalid channel: {0}")]
    InvalidChannel(u8),
    #[error("undefined reply mode {0}")]
    UndefinedReplyMode(u8),
    #[error("device answered with a critical fault frame ({0})")]
    CriticalFault(SupplyChecks),
}
