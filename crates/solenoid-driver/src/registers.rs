//! Register map: logical addresses, access classes, bit-field layouts and the
//! folding of 10-bit logical addresses into the 7-bit wire address field.
//!
//! Logical address space:
//!
//! | Range           | Bank                         | Wire field            |
//! |-----------------|------------------------------|-----------------------|
//! | `0x000..=0x00F` | central control / diagnosis  | `0x00..=0x0F`         |
//! | `0x100..=0x15F` | channel n at `0x100 + 0x10n` | `0x10..=0x6F`         |
//! | everything else | feedback and identification  | `0x7F` + address data |
//!
//! Registers outside the two direct banks are read-only; a read frame selects
//! them with the extended field and carries the full logical address in its
//! data field.

use crate::types::{Channel, ParallelPair};

pub const ADDRESS_MASK: u16 = 0x3FF;
pub const WIRE_FIELD_MASK: u8 = 0x7F;
pub const EXTENDED_FIELD: u8 = 0x7F;

pub const CENTRAL_BASE: u16 = 0x000;
pub const CENTRAL_SIZE: u16 = 0x10;
pub const CHANNEL_BASE: u16 = 0x100;
pub const CHANNEL_STRIDE: u16 = 0x10;
pub const FEEDBACK_BASE: u16 = 0x200;
pub const IDENT_BASE: u16 = 0x300;

const CHANNEL_WIRE_BASE: u8 = 0x10;

/// Central register addresses.
pub mod central {
    pub const CH_CTRL: u16 = 0x000;
    pub const GLOBAL_CONFIG: u16 = 0x002;
    pub const GLOBAL_DIAG0: u16 = 0x003;
    pub const GLOBAL_DIAG1: u16 = 0x004;
    pub const GLOBAL_DIAG2: u16 = 0x005;
    pub const VBAT_TH: u16 = 0x006;
    pub const WD_RELOAD: u16 = 0x009;
}

/// Offsets inside a channel block (`0x100 + 0x10 * n`).
pub mod channel {
    pub const SETPOINT: u16 = 0x0;
    pub const CTRL: u16 = 0x1;
    pub const PERIOD: u16 = 0x2;
    pub const DITHER_STEP: u16 = 0x3;
    pub const DITHER_CTRL: u16 = 0x4;
    pub const MODE: u16 = 0x5;
    pub const DIAG: u16 = 0x6;
}

/// Offsets inside a channel feedback block (`0x200 + 0x10 * n`).
pub mod feedback {
    pub const FB_DC: u16 = 0x0;
    pub const FB_I_AVG: u16 = 0x1;
    pub const FB_IMIN: u16 = 0x2;
    pub const FB_IMAX: u16 = 0x3;
}

/// Identification and supply feedback registers.
pub mod ident {
    pub const ICVID: u16 = 0x300;
    pub const CHIP_ID0: u16 = 0x301;
    pub const CHIP_ID1: u16 = 0x302;
    pub const CHIP_ID2: u16 = 0x303;
    pub const FB_VBAT: u16 = 0x304;
    pub const FB_VIO: u16 = 0x305;
}

pub fn channel_register(ch: Channel, offset: u16) -> u16 {
    CHANNEL_BASE + CHANNEL_STRIDE * u16::from(ch.index()) + offset
}

pub fn feedback_register(ch: Channel, offset: u16) -> u16 {
    FEEDBACK_BASE + CHANNEL_STRIDE * u16::from(ch.index()) + offset
}

/// How a logical address is carried in a transmit frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireAddress {
    /// Fits the 7-bit address field.
    Direct(u8),
    /// Read-only; sent as [`EXTENDED_FIELD`] with the address in the data field.
    Extended,
}

pub fn wire_address(address: u16) -> Option<WireAddress> {
    if address > ADDRESS_MASK {
        return None;
    }
    let channel_end = CHANNEL_BASE + CHANNEL_STRIDE * Channel::COUNT as u16;
    if address < CENTRAL_BASE + CENTRAL_SIZE {
        Some(WireAddress::Direct(address as u8))
    } else if (CHANNEL_BASE..channel_end).contains(&address) {
        Some(WireAddress::Direct(
            CHANNEL_WIRE_BASE + (address - CHANNEL_BASE) as u8,
        ))
    } else {
        Some(WireAddress::Extended)
    }
}

/// Inverse of [`wire_address`] for direct fields.
pub fn logical_address(field: u8) -> Option<u16> {
    let field = field & WIRE_FIELD_MASK;
    let channel_end = CHANNEL_WIRE_BASE + (CHANNEL_STRIDE as u8) * Channel::COUNT as u8;
    if u16::from(field) < CENTRAL_SIZE {
        Some(CENTRAL_BASE + u16::from(field))
    } else if (CHANNEL_WIRE_BASE..channel_end).contains(&field) {
        Some(CHANNEL_BASE + u16::from(field - CHANNEL_WIRE_BASE))
    } else {
        None
    }
}

/// Access class of a register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn writable(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

/// A named span of bits inside a register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BitField {
    pub name: &'static str,
    pub offset: u8,
    pub width: u8,
}

impl BitField {
    pub const fn new(name: &'static str, offset: u8, width: u8) -> Self {
        Self {
            name,
            offset,
            width,
        }
    }

    pub const fn mask(&self) -> u32 {
        ((1u32 << self.width) - 1) << self.offset
    }

    pub const fn max(&self) -> u32 {
        (1u32 << self.width) - 1
    }

    pub const fn extract(&self, raw: u32) -> u32 {
        (raw & self.mask()) >> self.offset
    }

    /// Replace the field in `raw`; bits of `value` beyond the field width are dropped.
    pub const fn insert(&self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask()) | ((value << self.offset) & self.mask())
    }

    pub fn flag(&self, raw: u16) -> bool {
        self.extract(u32::from(raw)) != 0
    }

    pub fn get(&self, raw: u16) -> u16 {
        self.extract(u32::from(raw)) as u16
    }

    pub fn set(&self, raw: u16, value: u16) -> u16 {
        self.insert(u32::from(raw), u32::from(value)) as u16
    }
}

/// Bit-field layouts, one constant per field.
pub mod fields {
    use super::BitField;

    pub const CH_CTRL_EN: BitField = BitField::new("EN", 0, 6);
    pub const CH_CTRL_PAR: BitField = BitField::new("PAR", 8, 3);
    pub const CH_CTRL_OP_MODE: BitField = BitField::new("OP_MODE", 15, 1);

    pub const GC_CLK_WD_EN: BitField = BitField::new("CLK_WD_EN", 0, 1);
    pub const GC_SPI_WD_EN: BitField = BitField::new("SPI_WD_EN", 1, 1);
    pub const GC_CRC_EN: BitField = BitField::new("CRC_EN", 2, 1);
    pub const GC_VIO_5V: BitField = BitField::new("VIO_5V", 3, 1);

    pub const GD0_VBAT_UV: BitField = BitField::new("VBAT_UV", 0, 1);
    pub const GD0_VBAT_OV: BitField = BitField::new("VBAT_OV", 1, 1);
    pub const GD0_VIO_UV: BitField = BitField::new("VIO_UV", 2, 1);
    pub const GD0_VIO_OV: BitField = BitField::new("VIO_OV", 3, 1);
    pub const GD0_VDD_UV: BitField = BitField::new("VDD_UV", 4, 1);
    pub const GD0_VDD_OV: BitField = BitField::new("VDD_OV", 5, 1);
    pub const GD0_CLK_NOK: BitField = BitField::new("CLK_NOK", 6, 1);
    pub const GD0_SPI_WD_ERR: BitField = BitField::new("SPI_WD_ERR", 7, 1);
    pub const GD0_OT_WARN: BitField = BitField::new("OT_WARN", 8, 1);
    pub const GD0_OT_ERR: BitField = BitField::new("OT_ERR", 9, 1);
    pub const GD0_POR_EVENT: BitField = BitField::new("POR_EVENT", 10, 1);
    pub const GD0_RESET_EVENT: BitField = BitField::new("RESET_EVENT", 11, 1);

    pub const GD1_OC: BitField = BitField::new("OC", 0, 6);
    pub const GD1_SG: BitField = BitField::new("SG", 8, 6);
    pub const GD2_OL: BitField = BitField::new("OL", 0, 6);
    pub const GD2_OT: BitField = BitField::new("OT", 8, 6);

    pub const VBAT_TH_UV: BitField = BitField::new("VBAT_UV_TH", 0, 8);
    pub const VBAT_TH_OV: BitField = BitField::new("VBAT_OV_TH", 8, 8);

    pub const WD_RELOAD: BitField = BitField::new("WD_RELOAD", 0, 16);

    pub const SETPOINT_TARGET: BitField = BitField::new("TARGET", 0, 15);

    pub const CTRL_SLEWR: BitField = BitField::new("SLEWR", 0, 2);
    pub const CTRL_DIAG_I: BitField = BitField::new("DIAG_I", 2, 2);
    pub const CTRL_OL_TH: BitField = BitField::new("OL_TH", 4, 3);
    pub const CTRL_AUTO_LIMIT: BitField = BitField::new("AUTO_LIMIT", 8, 1);
    pub const CTRL_REG_WARN_EN: BitField = BitField::new("REG_WARN_EN", 9, 1);
    pub const CTRL_OLSG_WARN_EN: BitField = BitField::new("OLSG_WARN_EN", 10, 1);

    pub const PERIOD_MANT: BitField = BitField::new("PWM_MANT", 0, 8);
    pub const PERIOD_EXP: BitField = BitField::new("PWM_EXP", 8, 3);
    pub const PERIOD_LOW_FREQ: BitField = BitField::new("PWM_LOW_FREQ", 11, 1);

    pub const DITHER_STEP_SIZE: BitField = BitField::new("STEP_SIZE", 0, 12);
    pub const DITHER_STEPS: BitField = BitField::new("NUM_STEPS", 0, 8);
    pub const DITHER_FLAT: BitField = BitField::new("FLAT_STEPS", 8, 8);

    pub const MODE_OP: BitField = BitField::new("MODE", 0, 4);

    pub const DIAG_OC: BitField = BitField::new("OC", 0, 1);
    pub const DIAG_OL: BitField = BitField::new("OL", 1, 1);
    pub const DIAG_SG: BitField = BitField::new("SG", 2, 1);
    pub const DIAG_OT: BitField = BitField::new("OT", 3, 1);
    pub const DIAG_OT_WARN: BitField = BitField::new("OT_WARN", 4, 1);
    pub const DIAG_I_REG_WARN: BitField = BitField::new("I_REG_WARN", 5, 1);
    pub const DIAG_PWM_REG_WARN: BitField = BitField::new("PWM_REG_WARN", 6, 1);
    pub const DIAG_OLSG_WARN: BitField = BitField::new("OLSG_WARN", 7, 1);

    pub const FB_DUTY: BitField = BitField::new("DUTY", 0, 16);
    pub const FB_CURRENT: BitField = BitField::new("CURRENT", 0, 15);

    pub const ICVID_DEVICE_ID: BitField = BitField::new("DEVICE_ID", 8, 8);
    pub const ICVID_REVISION: BitField = BitField::new("REVISION", 0, 8);
    pub const CHIP_ID: BitField = BitField::new("CHIP_ID", 0, 16);
    pub const FB_VOLTAGE: BitField = BitField::new("VOLTAGE", 0, 8);
}

/// Static metadata for one register.
///
/// For per-channel registers `offset` is relative to the channel block; for
/// central and identification registers it is the absolute logical address.
#[derive(Debug)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub offset: u16,
    pub access: Access,
    /// The device reads this register back as zero; the driver keeps the last written value.
    pub shadowed: bool,
    /// Writing ones clears latched flags, so a read-back never matches the write.
    pub clear_on_write: bool,
    pub fields: &'static [BitField],
}

impl RegisterDescriptor {
    const fn new(
        name: &'static str,
        offset: u16,
        access: Access,
        fields: &'static [BitField],
    ) -> Self {
        Self {
            name,
            offset,
            access,
            shadowed: false,
            clear_on_write: false,
            fields,
        }
    }

    const fn shadowed(mut self) -> Self {
        self.shadowed = true;
        self
    }

    const fn clear_on_write(mut self) -> Self {
        self.clear_on_write = true;
        self
    }
}

use fields::*;

pub static CENTRAL_REGISTERS: [RegisterDescriptor; 7] = [
    RegisterDescriptor::new(
        "CH_CTRL",
        central::CH_CTRL,
        Access::ReadWrite,
        &[CH_CTRL_EN, CH_CTRL_PAR, CH_CTRL_OP_MODE],
    )
    .shadowed(),
    RegisterDescriptor::new(
        "GLOBAL_CONFIG",
        central::GLOBAL_CONFIG,
        Access::WriteOnly,
        &[GC_CLK_WD_EN, GC_SPI_WD_EN, GC_CRC_EN, GC_VIO_5V],
    )
    .shadowed(),
    RegisterDescriptor::new(
        "GLOBAL_DIAG0",
        central::GLOBAL_DIAG0,
        Access::ReadWrite,
        &[
            GD0_VBAT_UV,
            GD0_VBAT_OV,
            GD0_VIO_UV,
            GD0_VIO_OV,
            GD0_VDD_UV,
            GD0_VDD_OV,
            GD0_CLK_NOK,
            GD0_SPI_WD_ERR,
            GD0_OT_WARN,
            GD0_OT_ERR,
            GD0_POR_EVENT,
            GD0_RESET_EVENT,
        ],
    )
    .clear_on_write(),
    RegisterDescriptor::new(
        "GLOBAL_DIAG1",
        central::GLOBAL_DIAG1,
        Access::ReadWrite,
        &[GD1_OC, GD1_SG],
    )
    .clear_on_write(),
    RegisterDescriptor::new(
        "GLOBAL_DIAG2",
        central::GLOBAL_DIAG2,
        Access::ReadWrite,
        &[GD2_OL, GD2_OT],
    )
    .clear_on_write(),
    RegisterDescriptor::new(
        "VBAT_TH",
        central::VBAT_TH,
        Access::ReadWrite,
        &[VBAT_TH_UV, VBAT_TH_OV],
    ),
    RegisterDescriptor::new(
        "WD_RELOAD",
        central::WD_RELOAD,
        Access::WriteOnly,
        &[fields::WD_RELOAD],
    ),
];

pub static CHANNEL_REGISTERS: [RegisterDescriptor; 7] = [
    RegisterDescriptor::new(
        "SETPOINT",
        channel::SETPOINT,
        Access::ReadWrite,
        &[SETPOINT_TARGET],
    ),
    RegisterDescriptor::new(
        "CTRL",
        channel::CTRL,
        Access::ReadWrite,
        &[
            CTRL_SLEWR,
            CTRL_DIAG_I,
            CTRL_OL_TH,
            CTRL_AUTO_LIMIT,
            CTRL_REG_WARN_EN,
            CTRL_OLSG_WARN_EN,
        ],
    ),
    RegisterDescriptor::new(
        "PERIOD",
        channel::PERIOD,
        Access::ReadWrite,
        &[PERIOD_MANT, PERIOD_EXP, PERIOD_LOW_FREQ],
    ),
    RegisterDescriptor::new(
        "DITHER_STEP",
        channel::DITHER_STEP,
        Access::ReadWrite,
        &[DITHER_STEP_SIZE],
    ),
    RegisterDescriptor::new(
        "DITHER_CTRL",
        channel::DITHER_CTRL,
        Access::ReadWrite,
        &[DITHER_STEPS, DITHER_FLAT],
    ),
    RegisterDescriptor::new("MODE", channel::MODE, Access::ReadWrite, &[MODE_OP]),
    RegisterDescriptor::new(
        "DIAG",
        channel::DIAG,
        Access::ReadWrite,
        &[
            DIAG_OC,
            DIAG_OL,
            DIAG_SG,
            DIAG_OT,
            DIAG_OT_WARN,
            DIAG_I_REG_WARN,
            DIAG_PWM_REG_WARN,
            DIAG_OLSG_WARN,
        ],
    )
    .clear_on_write(),
];

pub static FEEDBACK_REGISTERS: [RegisterDescriptor; 4] = [
    RegisterDescriptor::new("FB_DC", feedback::FB_DC, Access::ReadOnly, &[FB_DUTY]),
    RegisterDescriptor::new(
        "FB_I_AVG",
        feedback::FB_I_AVG,
        Access::ReadOnly,
        &[FB_CURRENT],
    ),
    RegisterDescriptor::new("FB_IMIN", feedback::FB_IMIN, Access::ReadOnly, &[FB_CURRENT]),
    RegisterDescriptor::new("FB_IMAX", feedback::FB_IMAX, Access::ReadOnly, &[FB_CURRENT]),
];

pub static IDENT_REGISTERS: [RegisterDescriptor; 6] = [
    RegisterDescriptor::new(
        "ICVID",
        ident::ICVID,
        Access::ReadOnly,
        &[ICVID_DEVICE_ID, ICVID_REVISION],
    ),
    RegisterDescriptor::new("CHIP_ID0", ident::CHIP_ID0, Access::ReadOnly, &[CHIP_ID]),
    RegisterDescriptor::new("CHIP_ID1", ident::CHIP_ID1, Access::ReadOnly, &[CHIP_ID]),
    RegisterDescriptor::new("CHIP_ID2", ident::CHIP_ID2, Access::ReadOnly, &[CHIP_ID]),
    RegisterDescriptor::new("FB_VBAT", ident::FB_VBAT, Access::ReadOnly, &[FB_VOLTAGE]),
    RegisterDescriptor::new("FB_VIO", ident::FB_VIO, Access::ReadOnly, &[FB_VOLTAGE]),
];

/// A resolved register: its descriptor plus where it lives.
#[derive(Clone, Copy, Debug)]
pub struct RegisterInfo {
    pub descriptor: &'static RegisterDescriptor,
    pub address: u16,
    pub channel: Option<Channel>,
}

impl RegisterInfo {
    pub fn access(&self) -> Access {
        self.descriptor.access
    }
}

/// Resolve a logical address against the register map.
pub fn lookup(address: u16) -> Option<RegisterInfo> {
    let banked = |table: &'static [RegisterDescriptor], base: u16| {
        if address < base {
            return None;
        }
        let rel = address - base;
        let ch = Channel::new((rel / CHANNEL_STRIDE) as u8)?;
        let offset = rel % CHANNEL_STRIDE;
        table
            .iter()
            .find(|d| d.offset == offset)
            .map(|descriptor| RegisterInfo {
                descriptor,
                address,
                channel: Some(ch),
            })
    };

    match address {
        a if a < CENTRAL_BASE + CENTRAL_SIZE => CENTRAL_REGISTERS
            .iter()
            .find(|d| d.offset == a)
            .map(|descriptor| RegisterInfo {
                descriptor,
                address,
                channel: None,
            }),
        a if (CHANNEL_BASE..FEEDBACK_BASE).contains(&a) => banked(&CHANNEL_REGISTERS, CHANNEL_BASE),
        a if (FEEDBACK_BASE..IDENT_BASE).contains(&a) => {
            banked(&FEEDBACK_REGISTERS, FEEDBACK_BASE)
        }
        a => IDENT_REGISTERS
            .iter()
            .find(|d| d.offset == a)
            .map(|descriptor| RegisterInfo {
                descriptor,
                address,
                channel: None,
            }),
    }
}

/// Structured decode of a raw register value through its field table.
pub fn decode_fields(descriptor: &RegisterDescriptor, raw: u32) -> Vec<(&'static str, u32)> {
    descriptor
        .fields
        .iter()
        .map(|f| (f.name, f.extract(raw)))
        .collect()
}

/// CH_CTRL: channel enables, parallel pairing and operating mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChCtrl {
    raw: u16,
}

impl ChCtrl {
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn enable_mask(&self) -> u8 {
        CH_CTRL_EN.get(self.raw) as u8
    }

    pub fn with_enable_mask(self, mask: u8) -> Self {
        Self {
            raw: CH_CTRL_EN.set(self.raw, u16::from(mask)),
        }
    }

    pub fn parallel(&self, pair: ParallelPair) -> bool {
        CH_CTRL_PAR.get(self.raw) & (1 << pair.bit()) != 0
    }

    pub fn with_parallel(self, pair: ParallelPair, enabled: bool) -> Self {
        let mut bits = CH_CTRL_PAR.get(self.raw);
        if enabled {
            bits |= 1 << pair.bit();
        } else {
            bits &= !(1 << pair.bit());
        }
        Self {
            raw: CH_CTRL_PAR.set(self.raw, bits),
        }
    }

    pub fn mission(&self) -> bool {
        CH_CTRL_OP_MODE.flag(self.raw)
    }

    pub fn with_mission(self, mission: bool) -> Self {
        Self {
            raw: CH_CTRL_OP_MODE.set(self.raw, u16::from(mission)),
        }
    }
}

/// GLOBAL_DIAG0: supply, clock, watchdog, thermal and reset flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GlobalDiag0 {
    raw: u16,
}

impl GlobalDiag0 {
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn vbat_uv(&self) -> bool {
        GD0_VBAT_UV.flag(self.raw)
    }

    pub fn vbat_ov(&self) -> bool {
        GD0_VBAT_OV.flag(self.raw)
    }

    pub fn vio_uv(&self) -> bool {
        GD0_VIO_UV.flag(self.raw)
    }

    pub fn vio_ov(&self) -> bool {
        GD0_VIO_OV.flag(self.raw)
    }

    pub fn vdd_uv(&self) -> bool {
        GD0_VDD_UV.flag(self.raw)
    }

    pub fn vdd_ov(&self) -> bool {
        GD0_VDD_OV.flag(self.raw)
    }

    pub fn clock_fault(&self) -> bool {
        GD0_CLK_NOK.flag(self.raw)
    }

    pub fn spi_watchdog_error(&self) -> bool {
        GD0_SPI_WD_ERR.flag(self.raw)
    }

    pub fn ot_warning(&self) -> bool {
        GD0_OT_WARN.flag(self.raw)
    }

    pub fn ot_error(&self) -> bool {
        GD0_OT_ERR.flag(self.raw)
    }

    pub fn por_event(&self) -> bool {
        GD0_POR_EVENT.flag(self.raw)
    }

    pub fn reset_event(&self) -> bool {
        GD0_RESET_EVENT.flag(self.raw)
    }
}

/// Per-channel DIAG register.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChannelDiag {
    raw: u16,
}

impl ChannelDiag {
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn overcurrent(&self) -> bool {
        DIAG_OC.flag(self.raw)
    }

    pub fn open_load(&self) -> bool {
        DIAG_OL.flag(self.raw)
    }

    pub fn short_to_ground(&self) -> bool {
        DIAG_SG.flag(self.raw)
    }

    pub fn over_temperature(&self) -> bool {
        DIAG_OT.flag(self.raw)
    }

    pub fn ot_warning(&self) -> bool {
        DIAG_OT_WARN.flag(self.raw)
    }

    pub fn current_regulation_warning(&self) -> bool {
        DIAG_I_REG_WARN.flag(self.raw)
    }

    pub fn pwm_regulation_warning(&self) -> bool {
        DIAG_PWM_REG_WARN.flag(self.raw)
    }

    pub fn olsg_warning(&self) -> bool {
        DIAG_OLSG_WARN.flag(self.raw)
    }
}

/// ICVID: device family id and silicon revision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Icvid {
    raw: u16,
}

impl Icvid {
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    pub fn device_id(&self) -> u8 {
        ICVID_DEVICE_ID.get(self.raw) as u8
    }

    pub fn revision(&self) -> u8 {
        ICVID_REVISION.get(self.raw) as u8
    }
}
