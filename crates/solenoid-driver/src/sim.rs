//! Register-level model of the solenoid driver IC.
//!
//! `SimulatedDevice` implements [`Transport`] and answers every frame the way
//! the silicon does: it checks the command CRC while CRC is enabled, locks the
//! configuration registers in Mission mode, reads CH_CTRL, GLOBAL_CONFIG and
//! WD_RELOAD back as zero, clears diagnostic latches on write-1 and drops every
//! output when leaving Mission mode. Faults, raw replies and transport
//! failures can be injected for tests.

use crate::checksum;
use crate::frame::{self, ReplyFrame, SpiStatus, SupplyChecks};
use crate::registers::{
    self, central, channel, channel_register, feedback, feedback_register, fields, ident, Access,
    ChCtrl, ADDRESS_MASK,
};
use crate::types::{Channel, DriverConfig};
use spi_transport::{Result, Transport, TransportError};
use std::collections::VecDeque;
use tracing::trace;

const REGISTER_SPACE: usize = ADDRESS_MASK as usize + 1;
/// 12.0 V at 0.16208 V/LSB.
const DEFAULT_FB_VBAT: u16 = 74;
/// 3.3 V at 0.02 V/LSB.
const DEFAULT_FB_VIO: u16 = 165;
/// Ripple around the average current reported in FB_IMIN/FB_IMAX.
const CURRENT_RIPPLE: u16 = 16;

#[derive(Debug)]
pub struct SimulatedDevice {
    regs: Vec<u16>,
    crc_enabled: bool,
    wide_replies: bool,
    initialized: bool,
    critical: Option<SupplyChecks>,
    raw_replies: VecDeque<u32>,
    failure: Option<(usize, TransportError)>,
    stuck: Vec<u16>,
    transfers: usize,
    last_tx: Option<u32>,
    delay_us: u64,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// A device fresh out of power-on reset: Configuration mode, CRC on, the
    /// POR latch set.
    pub fn new() -> Self {
        Self::with_device_id(DriverConfig::DEFAULT_DEVICE_ID)
    }

    pub fn with_device_id(device_id: u8) -> Self {
        let mut regs = vec![0u16; REGISTER_SPACE];
        regs[ident::ICVID as usize] = (u16::from(device_id) << 8) | 0x01;
        regs[ident::CHIP_ID0 as usize] = 0x5A17;
        regs[ident::CHIP_ID1 as usize] = 0x0C3E;
        regs[ident::CHIP_ID2 as usize] = 0x0001;
        regs[ident::FB_VBAT as usize] = DEFAULT_FB_VBAT;
        regs[ident::FB_VIO as usize] = DEFAULT_FB_VIO;
        regs[central::GLOBAL_DIAG0 as usize] = fields::GD0_POR_EVENT.mask() as u16;
        regs[central::GLOBAL_CONFIG as usize] = fields::GC_CRC_EN.mask() as u16;
        Self {
            regs,
            crc_enabled: true,
            wide_replies: false,
            initialized: false,
            critical: None,
            raw_replies: VecDeque::new(),
            failure: None,
            stuck: Vec::new(),
            transfers: 0,
            last_tx: None,
            delay_us: 0,
        }
    }

    /// Stored register content, including registers the device reads back as zero.
    pub fn register(&self, address: u16) -> u16 {
        self.regs
            .get(usize::from(address & ADDRESS_MASK))
            .copied()
            .unwrap_or_default()
    }

    /// Overwrite a register behind the protocol's back.
    pub fn poke(&mut self, address: u16, value: u16) {
        if let Some(slot) = self.regs.get_mut(usize::from(address & ADDRESS_MASK)) {
            *slot = value;
        }
    }

    /// Make a register ignore writes, so read-back verification fails.
    pub fn stick_register(&mut self, address: u16, value: u16) {
        self.poke(address, value);
        self.stuck.push(address);
    }

    pub fn crc_enabled(&self) -> bool {
        self.crc_enabled
    }

    pub fn is_mission(&self) -> bool {
        self.ch_ctrl().mission()
    }

    pub fn enabled_mask(&self) -> u8 {
        self.ch_ctrl().enable_mask()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers
    }

    pub fn last_tx(&self) -> Option<u32> {
        self.last_tx
    }

    pub fn total_delay_us(&self) -> u64 {
        self.delay_us
    }

    /// Answer reads with 22-bit replies.
    pub fn set_wide_replies(&mut self, wide: bool) {
        self.wide_replies = wide;
    }

    /// Answer every frame with a critical-fault reply until cleared.
    pub fn inject_critical_fault(&mut self, checks: SupplyChecks) {
        self.critical = Some(checks);
    }

    pub fn clear_critical_fault(&mut self) {
        self.critical = None;
    }

    /// Queue a raw word to be returned verbatim by the next exchange.
    pub fn push_raw_reply(&mut self, word: u32) {
        self.raw_replies.push_back(word);
    }

    pub fn fail_next_transfer(&mut self, err: TransportError) {
        self.fail_transfer_after(0, err);
    }

    /// Let `ok` more exchanges through, then fail one with `err`.
    pub fn fail_transfer_after(&mut self, ok: usize, err: TransportError) {
        self.failure = Some((ok, err));
    }

    /// Latch bits in GLOBAL_DIAG0.
    pub fn latch_global_fault(&mut self, bits: u16) {
        self.regs[central::GLOBAL_DIAG0 as usize] |= bits;
    }

    /// Latch bits in a channel DIAG register.
    pub fn latch_channel_fault(&mut self, ch: Channel, bits: u16) {
        self.regs[usize::from(channel_register(ch, channel::DIAG))] |= bits;
    }

    pub fn set_supply_feedback(&mut self, vbat_raw: u8, vio_raw: u8) {
        self.regs[ident::FB_VBAT as usize] = vbat_raw.into();
        self.regs[ident::FB_VIO as usize] = vio_raw.into();
    }

    /// The stamped reply a clean read of `address` would produce right now,
    /// without touching counters or state.
    pub fn peek_reply(&self, address: u16) -> u32 {
        let value = self.read_value(address);
        self.reply(SpiStatus::Ok, false, value)
    }

    fn ch_ctrl(&self) -> ChCtrl {
        ChCtrl::from_raw(self.regs[central::CH_CTRL as usize])
    }

    fn read_value(&self, address: u16) -> u16 {
        match registers::lookup(address) {
            Some(info) if info.descriptor.shadowed || info.access() == Access::WriteOnly => 0,
            Some(_) => self.register(address),
            None => 0,
        }
    }

    fn reply(&self, status: SpiStatus, write: bool, data: u16) -> u32 {
        let reply = if self.wide_replies && !write && status == SpiStatus::Ok {
            ReplyFrame::TwentyTwoBit {
                crc: 0,
                data: u32::from(data),
            }
        } else {
            ReplyFrame::SixteenBit {
                crc: 0,
                status,
                write_echo: write,
                data,
            }
        };
        checksum::stamp(reply.to_raw())
    }

    fn is_locked_in_mission(address: u16) -> bool {
        if matches!(address, central::GLOBAL_CONFIG | central::VBAT_TH) {
            return true;
        }
        match registers::lookup(address) {
            Some(info) if info.channel.is_some() && address < registers::FEEDBACK_BASE => {
                let offset = (address - registers::CHANNEL_BASE) % registers::CHANNEL_STRIDE;
                !matches!(offset, channel::SETPOINT | channel::DIAG)
            }
            _ => false,
        }
    }

    fn handle_write(&mut self, address: u16, data: u16) -> SpiStatus {
        let info = match registers::lookup(address) {
            Some(info) => info,
            None => return SpiStatus::AccessError,
        };
        if !info.access().writable() {
            return SpiStatus::WriteToReadOnly;
        }
        let mission = self.is_mission();
        if mission && Self::is_locked_in_mission(address) {
            return SpiStatus::AccessError;
        }
        if self.stuck.contains(&address) {
            return SpiStatus::Ok;
        }

        let slot = usize::from(address);
        if info.descriptor.clear_on_write {
            self.regs[slot] &= !data;
            return SpiStatus::Ok;
        }
        match address {
            // Pairing is frozen in Mission mode; enables only stick in Mission mode.
            central::CH_CTRL => {
                let old = self.ch_ctrl();
                let new = ChCtrl::from_raw(data);
                if mission && fields::CH_CTRL_PAR.get(old.raw()) != fields::CH_CTRL_PAR.get(data) {
                    return SpiStatus::AccessError;
                }
                let stored = if new.mission() {
                    new
                } else {
                    new.with_enable_mask(0)
                };
                self.regs[slot] = stored.raw();
            }
            _ => self.regs[slot] = data,
        }
        self.update_feedback();
        SpiStatus::Ok
    }

    /// Enabled channels report their setpoint as measured current.
    fn update_feedback(&mut self) {
        let enabled = self.enabled_mask();
        for ch in Channel::all() {
            let target = fields::SETPOINT_TARGET.get(self.register(channel_register(ch, channel::SETPOINT)));
            let avg = if enabled & ch.mask() != 0 { target } else { 0 };
            let (min, max, duty) = if avg == 0 {
                (0, 0, 0)
            } else {
                let max = avg.saturating_add(CURRENT_RIPPLE).min(fields::FB_CURRENT.max() as u16);
                let duty = (u32::from(avg) * 2).min(u32::from(u16::MAX)) as u16;
                (avg.saturating_sub(CURRENT_RIPPLE), max, duty)
            };
            self.poke(feedback_register(ch, feedback::FB_I_AVG), avg);
            self.poke(feedback_register(ch, feedback::FB_IMIN), min);
            self.poke(feedback_register(ch, feedback::FB_IMAX), max);
            self.poke(feedback_register(ch, feedback::FB_DC), duty);
        }
    }

    fn respond(&mut self, tx: u32) -> u32 {
        if let Some(checks) = self.critical {
            return ReplyFrame::CriticalFault { checks }.to_raw();
        }
        if self.crc_enabled && !checksum::verify_crc(tx) {
            return self.reply(SpiStatus::CrcError, false, 0);
        }
        let Some(cmd) = frame::decode_command(tx) else {
            return self.reply(SpiStatus::FrameError, false, 0);
        };
        if cmd.write {
            let status = self.handle_write(cmd.address, cmd.data);
            let word = self.reply(status, true, 0);
            // The new CRC setting applies from the next frame on.
            self.crc_enabled = fields::GC_CRC_EN.flag(self.regs[central::GLOBAL_CONFIG as usize]);
            word
        } else if registers::lookup(cmd.address).is_none() {
            self.reply(SpiStatus::AccessError, false, 0)
        } else {
            let value = self.read_value(cmd.address);
            self.reply(SpiStatus::Ok, false, value)
        }
    }
}

impl Transport for SimulatedDevice {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn transfer(&mut self, tx: u32) -> Result<u32> {
        self.transfers += 1;
        self.last_tx = Some(tx);
        if let Some((remaining, err)) = self.failure.take() {
            if remaining == 0 {
                return Err(err);
            }
            self.failure = Some((remaining - 1, err));
        }
        if let Some(word) = self.raw_replies.pop_front() {
            return Ok(word);
        }
        let rx = self.respond(tx);
        trace!(tx = format_args!("0x{tx:08X}"), rx = format_args!("0x{rx:08X}"), "sim exchange");
        Ok(rx)
    }

    fn delay(&mut self, micros: u32) {
        self.delay_us += u64::from(micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_reply, encode_read, encode_write};

    fn exchange(sim: &mut SimulatedDevice, raw: u32) -> ReplyFrame {
        let rx = sim.transfer(raw).unwrap();
        decode_reply(rx).unwrap()
    }

    fn status_of(reply: ReplyFrame) -> SpiStatus {
        match reply {
            ReplyFrame::SixteenBit { status, .. } => status,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_identity_read() {
        let mut sim = SimulatedDevice::new();
        let reply = exchange(&mut sim, encode_read(ident::ICVID).unwrap().raw());
        assert_eq!(reply.data(), Some(0x4601));
        assert_eq!(sim.transfer_count(), 1);
    }

    #[test]
    fn test_bad_command_crc() {
        let mut sim = SimulatedDevice::new();
        let raw = encode_read(ident::ICVID).unwrap().raw() ^ 0x0100_0000;
        assert_eq!(status_of(exchange(&mut sim, raw)), SpiStatus::CrcError);
    }

    #[test]
    fn test_ch_ctrl_reads_zero_and_locks() {
        let mut sim = SimulatedDevice::new();
        let on = ChCtrl::default().with_mission(true).with_enable_mask(0b11);
        exchange(&mut sim, encode_write(central::CH_CTRL, on.raw()).unwrap().raw());
        assert!(sim.is_mission());
        assert_eq!(sim.enabled_mask(), 0b11);
        let reply = exchange(&mut sim, encode_read(central::CH_CTRL).unwrap().raw());
        assert_eq!(reply.data(), Some(0));

        let addr = channel_register(Channel::new(0).unwrap(), channel::PERIOD);
        let reply = exchange(&mut sim, encode_write(addr, 0x0123).unwrap().raw());
        assert_eq!(status_of(reply), SpiStatus::AccessError);

        exchange(&mut sim, encode_write(central::CH_CTRL, 0).unwrap().raw());
        assert!(!sim.is_mission());
        assert_eq!(sim.enabled_mask(), 0);
    }

    #[test]
    fn test_enables_ignored_in_config_mode() {
        let mut sim = SimulatedDevice::new();
        let ctrl = ChCtrl::default().with_enable_mask(0b1);
        exchange(&mut sim, encode_write(central::CH_CTRL, ctrl.raw()).unwrap().raw());
        assert_eq!(sim.enabled_mask(), 0);
    }

    #[test]
    fn test_write_one_to_clear() {
        let mut sim = SimulatedDevice::new();
        sim.latch_global_fault(0b11);
        let reply = exchange(&mut sim, encode_write(central::GLOBAL_DIAG0, 0b01).unwrap().raw());
        assert_eq!(status_of(reply), SpiStatus::Ok);
        let por = fields::GD0_POR_EVENT.mask() as u16;
        assert_eq!(sim.register(central::GLOBAL_DIAG0), por | 0b10);
    }

    #[test]
    fn test_extended_read_of_feedback() {
        let mut sim = SimulatedDevice::new();
        sim.set_supply_feedback(80, 250);
        let frame = encode_read(ident::FB_VIO).unwrap();
        assert_eq!(frame.address_field(), registers::EXTENDED_FIELD);
        assert_eq!(exchange(&mut sim, frame.raw()).data(), Some(250));
    }

    #[test]
    fn test_crc_disable_takes_effect_after_reply() {
        let mut sim = SimulatedDevice::new();
        exchange(&mut sim, encode_write(central::GLOBAL_CONFIG, 0).unwrap().raw());
        assert!(!sim.crc_enabled());
        let raw = encode_read(ident::ICVID).unwrap().raw() ^ 0xFF00_0000;
        assert_eq!(exchange(&mut sim, raw).data(), Some(0x4601));
    }

    #[test]
    fn test_injected_failures() {
        let mut sim = SimulatedDevice::new();
        sim.fail_transfer_after(1, TransportError::Timeout);
        let read = encode_read(ident::ICVID).unwrap().raw();
        assert!(sim.transfer(read).is_ok());
        assert_eq!(sim.transfer(read), Err(TransportError::Timeout));
        assert!(sim.transfer(read).is_ok());

        sim.inject_critical_fault(SupplyChecks::from_raw(0));
        assert!(matches!(
            exchange(&mut sim, read),
            ReplyFrame::CriticalFault { checks } if checks.all_failed()
        ));
    }
}
