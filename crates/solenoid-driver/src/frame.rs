//! 32-bit SPI frame codec.
//!
//! Transmit frame (MOSI):
//!
//! ```text
//!  31      24 23        17  16  15                 0
//! +----------+------------+----+--------------------+
//! |   CRC    |  ADDR[6:0] | RW |        DATA        |
//! +----------+------------+----+--------------------+
//! ```
//!
//! Receive frame (MISO), selected by the reply-mode bits [23:22]:
//!
//! ```text
//! mode 0, 16-bit:  CRC[31:24] | 00 | STATUS[21:17] | RW[16] | DATA[15:0]
//! mode 1, 22-bit:  CRC[31:24] | 01 | DATA[21:0]
//! mode 2, fault:   xx[31:24]  | 10 | 0...0          | CHECKS[7:0]
//! ```
//!
//! The 22-bit layout reuses the STATUS and RW spans of the 16-bit layout as the
//! top six data bits: DATA[21:17] sit in the low five bits of byte 2 next to
//! the mode bits, DATA[16] in the RW position.

use crate::checksum;
use crate::error::{DriverError, Result};
use crate::registers::{self, WireAddress, EXTENDED_FIELD};
use core::fmt;

pub const ADDRESS_SHIFT: u32 = 17;
pub const RW_BIT: u32 = 1 << 16;
pub const DATA_MASK: u32 = 0xFFFF;
pub const REPLY_MODE_SHIFT: u32 = 22;
pub const STATUS_SHIFT: u32 = 17;
pub const STATUS_MASK: u32 = 0x1F;
pub const WIDE_DATA_MASK: u32 = 0x3F_FFFF;
pub const CHECKS_MASK: u32 = 0xFF;

/// Reply-mode selector of a received frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplyMode {
    SixteenBit = 0,
    TwentyTwoBit = 1,
    CriticalFault = 2,
}

impl ReplyMode {
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(ReplyMode::SixteenBit),
            1 => Ok(ReplyMode::TwentyTwoBit),
            2 => Ok(ReplyMode::CriticalFault),
            other => Err(DriverError::UndefinedReplyMode(other)),
        }
    }

    pub fn of(raw: u32) -> Result<Self> {
        Self::from_bits(((raw >> REPLY_MODE_SHIFT) & 0b11) as u8)
    }
}

/// A CRC-stamped transmit frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpiFrame(u32);

impl SpiFrame {
    fn build(field: u8, write: bool, data: u16) -> Self {
        let mut raw = (u32::from(field & registers::WIRE_FIELD_MASK)) << ADDRESS_SHIFT;
        if write {
            raw |= RW_BIT;
        }
        raw |= u32::from(data);
        SpiFrame(checksum::stamp(raw))
    }

    pub fn from_raw(raw: u32) -> Self {
        SpiFrame(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn crc(&self) -> u8 {
        checksum::received_crc(self.0)
    }

    pub fn address_field(&self) -> u8 {
        ((self.0 >> ADDRESS_SHIFT) as u8) & registers::WIRE_FIELD_MASK
    }

    pub fn is_write(&self) -> bool {
        self.0 & RW_BIT != 0
    }

    pub fn data(&self) -> u16 {
        (self.0 & DATA_MASK) as u16
    }
}

impl fmt::Display for SpiFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Build a write frame. Only registers in the direct banks can be written.
pub fn encode_write(address: u16, data: u16) -> Result<SpiFrame> {
    match registers::wire_address(address) {
        Some(WireAddress::Direct(field)) => Ok(SpiFrame::build(field, true, data)),
        Some(WireAddress::Extended) => Err(DriverError::WriteToReadOnly(address)),
        None => Err(DriverError::InvalidParameter("address exceeds 10 bits")),
    }
}

/// Build a read frame, folding extended addresses into the data field.
pub fn encode_read(address: u16) -> Result<SpiFrame> {
    match registers::wire_address(address) {
        Some(WireAddress::Direct(field)) => Ok(SpiFrame::build(field, false, 0)),
        Some(WireAddress::Extended) => Ok(SpiFrame::build(EXTENDED_FIELD, false, address)),
        None => Err(DriverError::InvalidParameter("address exceeds 10 bits")),
    }
}

/// A transmit frame as the device sees it, with the logical address restored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Command {
    pub address: u16,
    pub write: bool,
    pub data: u16,
}

/// Inverse of [`encode_write`] / [`encode_read`]; the CRC byte is not checked.
pub fn decode_command(raw: u32) -> Option<Command> {
    let frame = SpiFrame::from_raw(raw);
    let field = frame.address_field();
    let write = frame.is_write();
    if field == EXTENDED_FIELD {
        if write {
            return None;
        }
        return Some(Command {
            address: frame.data() & registers::ADDRESS_MASK,
            write,
            data: 0,
        });
    }
    let address = registers::logical_address(field)?;
    Some(Command {
        address,
        write,
        data: if write { frame.data() } else { 0 },
    })
}

/// Device status code from a 16-bit reply.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpiStatus {
    Ok,
    FrameError,
    CrcError,
    WriteToReadOnly,
    AccessError,
    Reserved(u8),
}

impl SpiStatus {
    pub fn from_bits(bits: u8) -> Self {
        match bits & STATUS_MASK as u8 {
            0x00 => SpiStatus::Ok,
            0x01 => SpiStatus::FrameError,
            0x02 => SpiStatus::CrcError,
            0x03 => SpiStatus::WriteToReadOnly,
            0x04 => SpiStatus::AccessError,
            other => SpiStatus::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            SpiStatus::Ok => 0x00,
            SpiStatus::FrameError => 0x01,
            SpiStatus::CrcError => 0x02,
            SpiStatus::WriteToReadOnly => 0x03,
            SpiStatus::AccessError => 0x04,
            SpiStatus::Reserved(bits) => bits & STATUS_MASK as u8,
        }
    }

    /// Map a device-reported status to the driver error it stands for.
    pub fn into_result(self, address: u16) -> Result<()> {
        match self {
            SpiStatus::Ok => Ok(()),
            SpiStatus::FrameError | SpiStatus::CrcError => Err(DriverError::SpiFrame {
                address,
                status: self.bits(),
            }),
            SpiStatus::WriteToReadOnly => Err(DriverError::WriteToReadOnly(address)),
            SpiStatus::AccessError | SpiStatus::Reserved(_) => Err(DriverError::Register {
                address,
                status: self.bits(),
            }),
        }
    }
}

/// Supply and clock checks carried by a critical-fault reply; a set bit means
/// the check passed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SupplyChecks {
    raw: u8,
}

impl SupplyChecks {
    pub const VBAT_UV_OK: u8 = 1 << 0;
    pub const VBAT_OV_OK: u8 = 1 << 1;
    pub const VIO_UV_OK: u8 = 1 << 2;
    pub const VIO_OV_OK: u8 = 1 << 3;
    pub const VDD_UV_OK: u8 = 1 << 4;
    pub const VDD_OV_OK: u8 = 1 << 5;
    pub const CLOCK_OK: u8 = 1 << 6;
    pub const REFERENCE_OK: u8 = 1 << 7;

    const NAMES: [&'static str; 8] = [
        "VBAT_UV", "VBAT_OV", "VIO_UV", "VIO_OV", "VDD_UV", "VDD_OV", "CLOCK", "REFERENCE",
    ];

    pub fn from_raw(raw: u8) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> u8 {
        self.raw
    }

    fn passed(&self, bit: u8) -> bool {
        self.raw & bit != 0
    }

    pub fn vbat_ok(&self) -> bool {
        self.passed(Self::VBAT_UV_OK) && self.passed(Self::VBAT_OV_OK)
    }

    pub fn vio_ok(&self) -> bool {
        self.passed(Self::VIO_UV_OK) && self.passed(Self::VIO_OV_OK)
    }

    pub fn vdd_ok(&self) -> bool {
        self.passed(Self::VDD_UV_OK) && self.passed(Self::VDD_OV_OK)
    }

    pub fn clock_ok(&self) -> bool {
        self.passed(Self::CLOCK_OK)
    }

    pub fn reference_ok(&self) -> bool {
        self.passed(Self::REFERENCE_OK)
    }

    pub fn all_passed(&self) -> bool {
        self.raw == 0xFF
    }

    pub fn all_failed(&self) -> bool {
        self.raw == 0x00
    }

    /// Names of the checks that failed.
    pub fn failed(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.raw & (1 << i) == 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for SupplyChecks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_passed() {
            return write!(f, "all checks passed");
        }
        write!(f, "failed: {}", self.failed().join(", "))
    }
}

/// A decoded receive frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplyFrame {
    SixteenBit {
        crc: u8,
        status: SpiStatus,
        write_echo: bool,
        data: u16,
    },
    TwentyTwoBit {
        crc: u8,
        data: u32,
    },
    CriticalFault {
        checks: SupplyChecks,
    },
}

impl ReplyFrame {
    pub fn mode(&self) -> ReplyMode {
        match self {
            ReplyFrame::SixteenBit { .. } => ReplyMode::SixteenBit,
            ReplyFrame::TwentyTwoBit { .. } => ReplyMode::TwentyTwoBit,
            ReplyFrame::CriticalFault { .. } => ReplyMode::CriticalFault,
        }
    }

    pub fn carries_crc(&self) -> bool {
        !matches!(self, ReplyFrame::CriticalFault { .. })
    }

    /// Register payload, zero-extended; `None` for critical-fault replies.
    pub fn data(&self) -> Option<u32> {
        match *self {
            ReplyFrame::SixteenBit { data, .. } => Some(u32::from(data)),
            ReplyFrame::TwentyTwoBit { data, .. } => Some(data),
            ReplyFrame::CriticalFault { .. } => None,
        }
    }

    /// Pack back into a raw word. The CRC byte is copied verbatim; use
    /// [`checksum::stamp`] to recompute it.
    pub fn to_raw(&self) -> u32 {
        match *self {
            ReplyFrame::SixteenBit {
                crc,
                status,
                write_echo,
                data,
            } => {
                let mut raw = u32::from(crc) << checksum::CRC_SHIFT;
                raw |= (ReplyMode::SixteenBit as u32) << REPLY_MODE_SHIFT;
                raw |= u32::from(status.bits()) << STATUS_SHIFT;
                if write_echo {
                    raw |= RW_BIT;
                }
                raw | u32::from(data)
            }
            ReplyFrame::TwentyTwoBit { crc, data } => {
                (u32::from(crc) << checksum::CRC_SHIFT)
                    | ((ReplyMode::TwentyTwoBit as u32) << REPLY_MODE_SHIFT)
                    | (data & WIDE_DATA_MASK)
            }
            ReplyFrame::CriticalFault { checks } => {
                ((ReplyMode::CriticalFault as u32) << REPLY_MODE_SHIFT) | u32::from(checks.raw())
            }
        }
    }
}

/// Decode a received word. Reply mode 3 is a protocol violation.
pub fn decode_reply(raw: u32) -> Result<ReplyFrame> {
    let crc = checksum::received_crc(raw);
    match ReplyMode::of(raw)? {
        ReplyMode::SixteenBit => Ok(ReplyFrame::SixteenBit {
            crc,
            status: SpiStatus::from_bits(((raw >> STATUS_SHIFT) & STATUS_MASK) as u8),
            write_echo: raw & RW_BIT != 0,
            data: (raw & DATA_MASK) as u16,
        }),
        ReplyMode::TwentyTwoBit => Ok(ReplyFrame::TwentyTwoBit {
            crc,
            data: raw & WIDE_DATA_MASK,
        }),
        ReplyMode::CriticalFault => Ok(ReplyFrame::CriticalFault {
            checks: SupplyChecks::from_raw((raw & CHECKS_MASK) as u8),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{central, channel_register, channel, ident};
    use crate::types::Channel;

    #[test]
    fn test_write_frame_layout() {
        let frame = encode_write(central::CH_CTRL, 0x8001).unwrap();
        assert_eq!(frame.address_field(), 0x00);
        assert!(frame.is_write());
        assert_eq!(frame.data(), 0x8001);
        assert_eq!(frame.raw() & 0x00FF_FFFF, 0x0001_8001);
        assert!(checksum::verify_crc(frame.raw()));
    }

    #[test]
    fn test_channel_write_frame_layout() {
        let ch = Channel::new(2).unwrap();
        let frame = encode_write(channel_register(ch, channel::SETPOINT), 0x1234).unwrap();
        // Channel 2 block starts at wire field 0x10 + 0x20
        assert_eq!(frame.address_field(), 0x30);
        assert_eq!(frame.raw() & 0x00FF_FFFF, (0x30 << 17) | (1 << 16) | 0x1234);
    }

    #[test]
    fn test_round_trip_write_frames() {
        let addresses = (0x000..0x010u16).chain(0x100..0x160u16);
        for address in addresses {
            for data in [0x0000u16, 0x0001, 0x7FFF, 0x8000, 0xA5A5, 0xFFFF] {
                let frame = encode_write(address, data).unwrap();
                let cmd = decode_command(frame.raw()).unwrap();
                assert_eq!(cmd, Command { address, write: true, data });
            }
        }
    }

    #[test]
    fn test_extended_read_folds_address() {
        let frame = encode_read(ident::ICVID).unwrap();
        assert_eq!(frame.address_field(), EXTENDED_FIELD);
        assert!(!frame.is_write());
        assert_eq!(frame.data(), ident::ICVID);
        let cmd = decode_command(frame.raw()).unwrap();
        assert_eq!(cmd.address, ident::ICVID);
        assert!(!cmd.write);
    }

    #[test]
    fn test_extended_write_rejected() {
        assert_eq!(
            encode_write(ident::ICVID, 1),
            Err(DriverError::WriteToReadOnly(ident::ICVID))
        );
        assert!(encode_read(0x400).is_err());
    }

    #[test]
    fn test_decode_sixteen_bit_reply() {
        let raw = checksum::stamp((0x04 << STATUS_SHIFT) | RW_BIT | 0xBEEF);
        match decode_reply(raw).unwrap() {
            ReplyFrame::SixteenBit {
                status,
                write_echo,
                data,
                ..
            } => {
                assert_eq!(status, SpiStatus::AccessError);
                assert!(write_echo);
                assert_eq!(data, 0xBEEF);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_twenty_two_bit_reply_reassembles_split_span() {
        // DATA[21:17] = 0b10110 in the status span, DATA[16] = 1 in the rw span
        let data = (0b10110 << 17) | (1 << 16) | 0x1357;
        let raw = checksum::stamp((1 << REPLY_MODE_SHIFT) | data);
        assert_eq!(raw >> 24 & 0xFF, u32::from(checksum::compute_crc(raw)));
        assert_eq!(
            decode_reply(raw).unwrap(),
            ReplyFrame::TwentyTwoBit {
                crc: checksum::received_crc(raw),
                data,
            }
        );
        assert_eq!(decode_reply(raw).unwrap().data(), Some(0x2D_1357));
    }

    #[test]
    fn test_decode_critical_fault_all_failed() {
        let reply = decode_reply(0x0080_0000).unwrap();
        match reply {
            ReplyFrame::CriticalFault { checks } => {
                assert!(checks.all_failed());
                assert!(!checks.vbat_ok());
                assert!(!checks.vio_ok());
                assert!(!checks.vdd_ok());
                assert!(!checks.clock_ok());
                assert_eq!(checks.failed().len(), 8);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!reply.carries_crc());
        assert_eq!(reply.data(), None);
    }

    #[test]
    fn test_undefined_reply_mode_rejected() {
        let raw = checksum::stamp(0x00C0_1234);
        assert_eq!(decode_reply(raw), Err(DriverError::UndefinedReplyMode(3)));
    }

    #[test]
    fn test_reply_to_raw_round_trip() {
        let reply = ReplyFrame::SixteenBit {
            crc: 0x5A,
            status: SpiStatus::WriteToReadOnly,
            write_echo: false,
            data: 0x00FF,
        };
        assert_eq!(decode_reply(reply.to_raw()).unwrap(), reply);
        let fault = ReplyFrame::CriticalFault {
            checks: SupplyChecks::from_raw(SupplyChecks::CLOCK_OK),
        };
        assert_eq!(decode_reply(fault.to_raw()).unwrap(), fault);
    }

    #[test]
    fn test_status_mapping() {
        assert!(SpiStatus::Ok.into_result(0x100).is_ok());
        assert_eq!(
            SpiStatus::FrameError.into_result(0x100),
            Err(DriverError::SpiFrame {
                address: 0x100,
                status: 1
            })
        );
        assert_eq!(
            SpiStatus::WriteToReadOnly.into_result(0x003),
            Err(DriverError::WriteToReadOnly(0x003))
        );
        assert_eq!(
            SpiStatus::from_bits(0x11).into_result(0x006),
            Err(DriverError::Register {
                address: 0x006,
                status: 0x11
            })
        );
    }

    #[test]
    fn test_supply_checks_display() {
        let checks = SupplyChecks::from_raw(0xFF & !SupplyChecks::VIO_UV_OK);
        assert_eq!(checks.to_string(), "failed: VIO_UV");
        assert_eq!(SupplyChecks::from_raw(0xFF).to_string(), "all checks passed");
    }
}
