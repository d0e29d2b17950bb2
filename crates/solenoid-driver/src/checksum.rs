//! CRC-8 engine for the 32-bit SPI frame.
//!
//! The device protects every frame with CRC-8/SAE-J1850 (poly 0x1D, init 0xFF,
//! xorout 0xFF) computed over frame bits [23:0], sent MSB first. The CRC byte
//! itself sits in bits [31:24] and is excluded from the computation, so the same
//! routine serves outgoing commands and incoming replies.

use crc::{Crc, CRC_8_SAE_J1850};

const CRC_J1850: Crc<u8> = Crc::<u8>::new(&CRC_8_SAE_J1850);

pub const CRC_SHIFT: u32 = 24;
pub const CRC_MASK: u32 = 0xFF << CRC_SHIFT;

/// Reply-mode value whose frames carry no CRC in the top byte.
const CRITICAL_FAULT_MODE: u32 = 0b10;

/// Result of checking a received frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrcCheck {
    Valid,
    /// The reply mode carries no CRC; nothing was checked.
    Skipped,
    Mismatch { expected: u8, received: u8 },
}

impl CrcCheck {
    pub fn is_ok(self) -> bool {
        !matches!(self, CrcCheck::Mismatch { .. })
    }
}

/// CRC over the payload of `frame`; the current CRC byte is ignored.
pub fn compute_crc(frame: u32) -> u8 {
    let bytes = frame.to_be_bytes();
    CRC_J1850.checksum(&bytes[1..])
}

/// Replace the CRC byte of `frame` with the value computed over its payload.
pub fn stamp(frame: u32) -> u32 {
    (frame & !CRC_MASK) | (u32::from(compute_crc(frame)) << CRC_SHIFT)
}

pub fn received_crc(frame: u32) -> u8 {
    (frame >> CRC_SHIFT) as u8
}

/// Plain check of the CRC byte against the payload, regardless of reply mode.
pub fn verify_crc(frame: u32) -> bool {
    received_crc(frame) == compute_crc(frame)
}

/// Reply-aware check: critical-fault replies reuse the top byte as "don't care"
/// and are reported as [`CrcCheck::Skipped`] instead of a false mismatch.
pub fn verify_reply(frame: u32) -> CrcCheck {
    if (frame >> 22) & 0b11 == CRITICAL_FAULT_MODE {
        return CrcCheck::Skipped;
    }
    let expected = compute_crc(frame);
    let received = received_crc(frame);
    if expected == received {
        CrcCheck::Valid
    } else {
        CrcCheck::Mismatch { expected, received }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sae_j1850_check_value() {
        // Catalogue check value for CRC-8/SAE-J1850 over "123456789"
        assert_eq!(CRC_J1850.checksum(b"123456789"), 0x4B);
    }

    #[test]
    fn test_crc_ignores_existing_crc_byte() {
        let payload = 0x0012_3456;
        assert_eq!(compute_crc(payload), compute_crc(payload | 0xA5 << 24));
    }

    #[test]
    fn test_stamp_then_verify() {
        for payload in [0u32, 0x00FF_FFFF, 0x0003_0001, 0x0020_8000, 0x0012_3456] {
            let framed = stamp(payload);
            assert_eq!(framed & !CRC_MASK, payload);
            assert!(verify_crc(framed));
        }
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let framed = stamp(0x0021_7FFF);
        for bit in 0..24 {
            assert!(!verify_crc(framed ^ (1 << bit)), "flip of bit {bit} not detected");
        }
        for bit in 24..32 {
            assert!(!verify_crc(framed ^ (1 << bit)), "flip of crc bit {bit} not detected");
        }
    }

    #[test]
    fn test_critical_fault_reply_skipped() {
        // Reply mode 2 with a garbage top byte
        let frame = 0x5A80_0000;
        assert_eq!(verify_reply(frame), CrcCheck::Skipped);
        assert!(verify_reply(frame).is_ok());
    }

    #[test]
    fn test_verify_reply_reports_mismatch() {
        let framed = stamp(0x0000_1234);
        let corrupted = framed ^ 0x0000_0100;
        match verify_reply(corrupted) {
            CrcCheck::Mismatch { expected, received } => {
                assert_eq!(received, received_crc(framed));
                assert_ne!(expected, received);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert_eq!(verify_reply(framed), CrcCheck::Valid);
    }
}
