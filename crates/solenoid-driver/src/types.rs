use crate::error::{DriverError, Result};
use crate::mode::DeviceMode;
use crate::registers::{ChannelDiag, GlobalDiag0};
use crate::units;
use core::fmt;
use serde::{Deserialize, Serialize};

/// One of the six output channels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    pub const COUNT: usize = 6;

    pub fn new(index: u8) -> Option<Self> {
        if (index as usize) < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub fn try_from_index(index: u8) -> Result<Self> {
        Self::new(index).ok_or(DriverError::InvalidChannel(index))
    }

    pub fn index(&self) -> u8 {
        self.0
    }

    pub fn mask(&self) -> u8 {
        1 << self.0
    }

    pub fn all() -> impl Iterator<Item = Channel> {
        (0..Self::COUNT as u8).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Fixed channel pairings that can be tied together for double current.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPair {
    Ch0Ch3,
    Ch1Ch2,
    Ch4Ch5,
}

impl ParallelPair {
    pub const ALL: [ParallelPair; 3] = [
        ParallelPair::Ch0Ch3,
        ParallelPair::Ch1Ch2,
        ParallelPair::Ch4Ch5,
    ];

    /// Bit position inside the CH_CTRL parallel field.
    pub fn bit(self) -> u8 {
        match self {
            ParallelPair::Ch0Ch3 => 0,
            ParallelPair::Ch1Ch2 => 1,
            ParallelPair::Ch4Ch5 => 2,
        }
    }

    pub fn channels(self) -> (Channel, Channel) {
        let (a, b) = match self {
            ParallelPair::Ch0Ch3 => (0, 3),
            ParallelPair::Ch1Ch2 => (1, 2),
            ParallelPair::Ch4Ch5 => (4, 5),
        };
        (Channel(a), Channel(b))
    }

    pub fn containing(ch: Channel) -> ParallelPair {
        match ch.index() {
            0 | 3 => ParallelPair::Ch0Ch3,
            1 | 2 => ParallelPair::Ch1Ch2,
            _ => ParallelPair::Ch4Ch5,
        }
    }
}

/// Channel operating mode (MODE register).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Off,
    /// Integrated current control towards the programmed setpoint.
    #[default]
    Icc,
    DirectDrive,
    ExternalDrive,
    FreeRunningMeasurement,
}

impl ChannelMode {
    pub fn bits(self) -> u16 {
        match self {
            ChannelMode::Off => 0x0,
            ChannelMode::Icc => 0x1,
            ChannelMode::DirectDrive => 0x2,
            ChannelMode::ExternalDrive => 0x3,
            ChannelMode::FreeRunningMeasurement => 0x4,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0x0 => Some(ChannelMode::Off),
            0x1 => Some(ChannelMode::Icc),
            0x2 => Some(ChannelMode::DirectDrive),
            0x3 => Some(ChannelMode::ExternalDrive),
            0x4 => Some(ChannelMode::FreeRunningMeasurement),
            _ => None,
        }
    }
}

/// Output slew rate (CTRL.SLEWR).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlewRate {
    V1_0,
    #[default]
    V2_5,
    V5_0,
    V10_0,
}

impl SlewRate {
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Off-state diagnostic current (CTRL.DIAG_I).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagCurrent {
    #[default]
    Ua80,
    Ua190,
    Ua720,
    Ua1250,
}

impl DiagCurrent {
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// PWM period encoding: `mantissa * 2^exponent / f_sys`, times 8 in the low-frequency range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PwmPeriod {
    pub mantissa: u8,
    pub exponent: u8,
    #[serde(default)]
    pub low_freq: bool,
}

impl PwmPeriod {
    pub fn from_micros(micros: f32) -> Result<Self> {
        units::micros_to_pwm(micros)
    }

    pub fn micros(&self) -> f32 {
        units::pwm_to_micros(*self)
    }
}

impl Default for PwmPeriod {
    /// 250 us (4 kHz).
    fn default() -> Self {
        Self {
            mantissa: 250,
            exponent: 3,
            low_freq: false,
        }
    }
}

/// Raw dither parameters. All zero disables dither.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DitherSettings {
    pub step_size: u16,
    pub num_steps: u8,
    pub flat_steps: u8,
}

impl DitherSettings {
    pub fn from_amplitude(amplitude_ma: f32, frequency_hz: f32, parallel: bool) -> Result<Self> {
        units::dither_from_amplitude(amplitude_ma, frequency_hz, parallel)
    }

    pub fn is_enabled(&self) -> bool {
        self.step_size != 0 && self.num_steps != 0
    }
}

/// Per-channel configuration, applied in Configuration mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub mode: ChannelMode,
    pub current_setpoint_ma: f32,
    pub slew_rate: SlewRate,
    pub diag_current: DiagCurrent,
    /// 0 disables open-load detection, 1..=7 selects n/8 of the setpoint.
    pub open_load_threshold: u8,
    pub pwm_period: PwmPeriod,
    pub dither: DitherSettings,
    pub auto_limit: bool,
    pub regulation_warning: bool,
    pub open_load_warning: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mode: ChannelMode::Icc,
            current_setpoint_ma: 0.0,
            slew_rate: SlewRate::default(),
            diag_current: DiagCurrent::default(),
            open_load_threshold: 0,
            pwm_period: PwmPeriod::default(),
            dither: DitherSettings::default(),
            auto_limit: true,
            regulation_warning: true,
            open_load_warning: false,
        }
    }
}

/// VIO supply level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VioLevel {
    #[default]
    V3_3,
    V5_0,
}

/// Device-wide configuration, applied in Configuration mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub crc_enabled: bool,
    pub spi_watchdog_enabled: bool,
    pub spi_watchdog_reload: u16,
    pub clock_watchdog_enabled: bool,
    pub vio: VioLevel,
    pub vbat_uv_v: f32,
    pub vbat_ov_v: f32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            crc_enabled: true,
            spi_watchdog_enabled: false,
            spi_watchdog_reload: 1000,
            clock_watchdog_enabled: true,
            vio: VioLevel::V3_3,
            vbat_uv_v: 7.0,
            vbat_ov_v: 40.0,
        }
    }
}

/// Driver-side settings supplied at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Read every written register back and compare.
    pub verify_writes: bool,
    /// Expected ICVID.DEVICE_ID.
    pub expected_device_id: u8,
}

impl DriverConfig {
    pub const DEFAULT_DEVICE_ID: u8 = 0x46;
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            verify_writes: false,
            expected_device_id: Self::DEFAULT_DEVICE_ID,
        }
    }
}

/// Device-wide fault flags from GLOBAL_DIAG0.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct GlobalFaults {
    pub vbat_uv: bool,
    pub vbat_ov: bool,
    pub vio_uv: bool,
    pub vio_ov: bool,
    pub vdd_uv: bool,
    pub vdd_ov: bool,
    pub clock_fault: bool,
    pub spi_watchdog_error: bool,
    pub ot_warning: bool,
    pub ot_error: bool,
    pub por_event: bool,
    pub reset_event: bool,
}

impl GlobalFaults {
    pub fn has_supply_fault(&self) -> bool {
        self.vbat_uv || self.vbat_ov || self.vio_uv || self.vio_ov || self.vdd_uv || self.vdd_ov
    }

    pub fn has_thermal(&self) -> bool {
        self.ot_warning || self.ot_error
    }

    /// Reset events are informational and not counted.
    pub fn any_fault(&self) -> bool {
        self.has_supply_fault() || self.has_thermal() || self.clock_fault || self.spi_watchdog_error
    }
}

impl From<GlobalDiag0> for GlobalFaults {
    fn from(reg: GlobalDiag0) -> Self {
        Self {
            vbat_uv: reg.vbat_uv(),
            vbat_ov: reg.vbat_ov(),
            vio_uv: reg.vio_uv(),
            vio_ov: reg.vio_ov(),
            vdd_uv: reg.vdd_uv(),
            vdd_ov: reg.vdd_ov(),
            clock_fault: reg.clock_fault(),
            spi_watchdog_error: reg.spi_watchdog_error(),
            ot_warning: reg.ot_warning(),
            ot_error: reg.ot_error(),
            por_event: reg.por_event(),
            reset_event: reg.reset_event(),
        }
    }
}

/// Per-channel fault and warning flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ChannelFaults {
    pub overcurrent: bool,
    pub open_load: bool,
    pub short_to_ground: bool,
    pub over_temperature: bool,
    pub ot_warning: bool,
    pub current_regulation_warning: bool,
    pub pwm_regulation_warning: bool,
    pub olsg_warning: bool,
}

impl ChannelFaults {
    pub fn any_fault(&self) -> bool {
        self.overcurrent || self.open_load || self.short_to_ground || self.over_temperature
    }

    pub fn any_warning(&self) -> bool {
        self.ot_warning
            || self.current_regulation_warning
            || self.pwm_regulation_warning
            || self.olsg_warning
    }
}

impl From<ChannelDiag> for ChannelFaults {
    fn from(reg: ChannelDiag) -> Self {
        Self {
            overcurrent: reg.overcurrent(),
            open_load: reg.open_load(),
            short_to_ground: reg.short_to_ground(),
            over_temperature: reg.over_temperature(),
            ot_warning: reg.ot_warning(),
            current_regulation_warning: reg.current_regulation_warning(),
            pwm_regulation_warning: reg.pwm_regulation_warning(),
            olsg_warning: reg.olsg_warning(),
        }
    }
}

/// Snapshot of device-level status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub mode: DeviceMode,
    pub faults: GlobalFaults,
    pub enabled_mask: u8,
    pub vbat_v: f32,
    pub vio_v: f32,
}

impl DeviceStatus {
    pub fn channel_enabled(&self, ch: Channel) -> bool {
        self.enabled_mask & ch.mask() != 0
    }

    pub fn any_fault(&self) -> bool {
        self.faults.any_fault()
    }
}

/// Snapshot of one channel's diagnostics and feedback measurements.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelDiagnostics {
    pub channel: u8,
    pub enabled: bool,
    pub faults: ChannelFaults,
    pub average_current_ma: f32,
    pub min_current_ma: f32,
    pub max_current_ma: f32,
    /// 0.0..=1.0
    pub duty_cycle: f32,
}

/// Merged snapshot of every global and per-channel fault register.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FaultReport {
    pub global: GlobalFaults,
    pub channels: [ChannelFaults; Channel::COUNT],
}

impl FaultReport {
    pub fn any_fault(&self) -> bool {
        self.global.any_fault() || self.channels.iter().any(|c| c.any_fault())
    }

    pub fn faulted_channels(&self) -> Vec<Channel> {
        Channel::all()
            .filter(|ch| self.channels[ch.index() as usize].any_fault())
            .collect()
    }
}
