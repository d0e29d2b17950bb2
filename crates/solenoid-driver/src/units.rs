//! Engineering-unit conversions for register fields.
//!
//! Every function is pure. Conversions into register encodings reject input
//! that cannot be represented within range or within [`TOLERANCE`]; they never
//! wrap and never silently clamp, so a caller can tell "rounded" from "rejected".

use crate::error::{DriverError, Result};
use crate::types::{DitherSettings, PwmPeriod};

/// Internal system clock.
pub const F_SYS_HZ: f64 = 8_000_000.0;
/// Reference clock ticking the dither waveform.
pub const DITHER_REF_CLOCK_HZ: f64 = 50_000.0;

/// Largest 15-bit setpoint code.
pub const SETPOINT_MAX: u16 = 0x7FFF;
pub const FULL_SCALE_SINGLE_MA: f32 = 2000.0;
pub const FULL_SCALE_PARALLEL_MA: f32 = 4000.0;

pub const PWM_MANTISSA_MAX: u8 = 255;
pub const PWM_EXPONENT_MAX: u8 = 7;
pub const PWM_LOW_FREQ_FACTOR: f64 = 8.0;

pub const DITHER_STEP_SIZE_MAX: u16 = 0x0FFF;
pub const DITHER_STEPS_MAX: u8 = 255;
pub const DITHER_FLAT_MAX: u8 = 255;

/// VBAT threshold and feedback scale, volts per LSB.
pub const VBAT_LSB_V: f32 = 0.16208;
/// VIO feedback scale, volts per LSB.
pub const VIO_LSB_V: f32 = 0.02;

/// Largest relative timing error accepted for period and dither frequency.
pub const TOLERANCE: f64 = 0.01;

pub fn full_scale_ma(parallel: bool) -> f32 {
    if parallel {
        FULL_SCALE_PARALLEL_MA
    } else {
        FULL_SCALE_SINGLE_MA
    }
}

/// `code = round(mA * 32767 / full_scale)`; full scale is 2000 mA, or 4000 mA
/// for a parallel pair.
///
/// The nominal 0.061 mA LSB is 2000/32767 rounded, so dividing by 0.061
/// directly drifts from this code as the current grows (1500 mA encodes as
/// 24575, not 24590).
pub fn current_to_setpoint(current_ma: f32, parallel: bool) -> Result<u16> {
    if !current_ma.is_finite() || current_ma < 0.0 {
        return Err(DriverError::InvalidParameter(
            "current must be finite and non-negative",
        ));
    }
    let full_scale = f64::from(full_scale_ma(parallel));
    let ma = f64::from(current_ma);
    if ma > full_scale {
        return Err(DriverError::InvalidParameter("current exceeds full scale"));
    }
    let code = (ma * f64::from(SETPOINT_MAX) / full_scale).round();
    Ok(code as u16)
}

/// `mA = code * full_scale / 32767`. Bit 15 is ignored.
pub fn setpoint_to_current(code: u16, parallel: bool) -> f32 {
    let code = f64::from(code & SETPOINT_MAX);
    (code * f64::from(full_scale_ma(parallel)) / f64::from(SETPOINT_MAX)) as f32
}

/// One setpoint LSB in mA.
pub fn current_lsb_ma(parallel: bool) -> f32 {
    full_scale_ma(parallel) / f32::from(SETPOINT_MAX)
}

fn pwm_scale(exponent: u8, low_freq: bool) -> f64 {
    let mut scale = f64::from(1u32 << exponent);
    if low_freq {
        scale *= PWM_LOW_FREQ_FACTOR;
    }
    scale
}

/// `period = mantissa * 2^exponent / f_sys`, times 8 with `low_freq`.
pub fn pwm_to_micros(period: PwmPeriod) -> f32 {
    let exponent = period.exponent.min(PWM_EXPONENT_MAX);
    let ticks = f64::from(period.mantissa) * pwm_scale(exponent, period.low_freq);
    (ticks * 1e6 / F_SYS_HZ) as f32
}

/// Pick the (mantissa, exponent, low_freq) triple closest to `micros`.
///
/// Ties go to the finer resolution (smaller exponent, normal range first).
/// Representable periods span 0.125 us to 4080 us, or up to 32640 us with
/// the low-frequency range.
pub fn micros_to_pwm(micros: f32) -> Result<PwmPeriod> {
    if !micros.is_finite() || micros <= 0.0 {
        return Err(DriverError::InvalidParameter("PWM period must be positive"));
    }
    let ticks = f64::from(micros) * F_SYS_HZ / 1e6;
    let mut best: Option<(f64, PwmPeriod)> = None;
    for low_freq in [false, true] {
        for exponent in 0..=PWM_EXPONENT_MAX {
            let scale = pwm_scale(exponent, low_freq);
            let mantissa = (ticks / scale).round();
            if mantissa < 1.0 || mantissa > f64::from(PWM_MANTISSA_MAX) {
                continue;
            }
            let err = (mantissa * scale - ticks).abs() / ticks;
            if best.map_or(true, |(e, _)| err < e) {
                best = Some((
                    err,
                    PwmPeriod {
                        mantissa: mantissa as u8,
                        exponent,
                        low_freq,
                    },
                ));
            }
        }
    }
    match best {
        Some((err, period)) if err <= TOLERANCE => Ok(period),
        Some(_) => Err(DriverError::InvalidParameter(
            "PWM period not representable within tolerance",
        )),
        None => Err(DriverError::InvalidParameter("PWM period out of range")),
    }
}

/// `amplitude = num_steps * step_size * full_scale / 32767`
pub fn dither_amplitude_ma(dither: DitherSettings, parallel: bool) -> f32 {
    let steps = f64::from(dither.num_steps) * f64::from(dither.step_size);
    (steps * f64::from(full_scale_ma(parallel)) / f64::from(SETPOINT_MAX)) as f32
}

/// `period = (4 * num_steps + 2 * flat_steps) * t_ref`
pub fn dither_period_us(dither: DitherSettings) -> f32 {
    let ticks = 4.0 * f64::from(dither.num_steps) + 2.0 * f64::from(dither.flat_steps);
    (ticks * 1e6 / DITHER_REF_CLOCK_HZ) as f32
}

/// Dither frequency, or 0 when the waveform has no period.
pub fn dither_frequency_hz(dither: DitherSettings) -> f32 {
    let period = dither_period_us(dither);
    if period > 0.0 {
        1e6 / period
    } else {
        0.0
    }
}

/// Derive (step_size, num_steps, flat_steps) for a dither amplitude and frequency.
///
/// The period is quantised to an even number of reference ticks; the split
/// between ramp steps and flat steps is chosen to best match the amplitude,
/// preferring more ramp steps on ties. A zero amplitude disables dither. A
/// nonzero amplitude that would round to a zero step, or that no split can
/// reach within one LSB or [`TOLERANCE`], is rejected.
pub fn dither_from_amplitude(
    amplitude_ma: f32,
    frequency_hz: f32,
    parallel: bool,
) -> Result<DitherSettings> {
    if !amplitude_ma.is_finite() || amplitude_ma < 0.0 {
        return Err(DriverError::InvalidParameter(
            "dither amplitude must be finite and non-negative",
        ));
    }
    if amplitude_ma == 0.0 {
        return Ok(DitherSettings::default());
    }
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(DriverError::InvalidParameter(
            "dither frequency must be positive",
        ));
    }
    let full_scale = f64::from(full_scale_ma(parallel));
    let amplitude = f64::from(amplitude_ma);
    if amplitude > full_scale {
        return Err(DriverError::InvalidParameter(
            "dither amplitude exceeds full scale",
        ));
    }

    let exact_ticks = DITHER_REF_CLOCK_HZ / f64::from(frequency_hz);
    let total = ((exact_ticks / 2.0).round() * 2.0) as u32;
    if total < 4 {
        return Err(DriverError::InvalidParameter("dither frequency too high"));
    }
    if (f64::from(total) - exact_ticks).abs() / exact_ticks > TOLERANCE {
        return Err(DriverError::InvalidParameter(
            "dither frequency not representable within tolerance",
        ));
    }

    let target_units = amplitude * f64::from(SETPOINT_MAX) / full_scale;
    let max_steps = (total / 4).min(u32::from(DITHER_STEPS_MAX));
    let mut best: Option<(f64, DitherSettings)> = None;
    for num_steps in (1..=max_steps).rev() {
        let flat = (total - 4 * num_steps) / 2;
        if flat > u32::from(DITHER_FLAT_MAX) {
            break;
        }
        let step_size = (target_units / f64::from(num_steps)).round();
        if step_size < 1.0 || step_size > f64::from(DITHER_STEP_SIZE_MAX) {
            continue;
        }
        let err = (step_size * f64::from(num_steps) - target_units).abs();
        if best.map_or(true, |(e, _)| err < e) {
            best = Some((
                err,
                DitherSettings {
                    step_size: step_size as u16,
                    num_steps: num_steps as u8,
                    flat_steps: flat as u8,
                },
            ));
        }
    }
    let (err, dither) = best.ok_or(DriverError::InvalidParameter(
        "dither amplitude/frequency combination out of range",
    ))?;
    // Within one setpoint LSB, or within TOLERANCE of the requested amplitude.
    if err > 1.0 && err / target_units > TOLERANCE {
        return Err(DriverError::InvalidParameter(
            "dither amplitude not representable within tolerance",
        ));
    }
    Ok(dither)
}

/// `code = round(volts / 0.16208)`; codes above 255 are rejected.
pub fn volts_to_vbat_threshold(volts: f32) -> Result<u8> {
    if !volts.is_finite() || volts < 0.0 {
        return Err(DriverError::InvalidParameter(
            "voltage must be finite and non-negative",
        ));
    }
    let code = (f64::from(volts) / f64::from(VBAT_LSB_V)).round();
    if code > f64::from(u8::MAX) {
        return Err(DriverError::InvalidParameter("VBAT threshold above 41.3 V"));
    }
    Ok(code as u8)
}

pub fn vbat_threshold_to_volts(code: u8) -> f32 {
    f32::from(code) * VBAT_LSB_V
}

/// FB_VBAT feedback in volts.
pub fn vbat_feedback_volts(raw: u16) -> f32 {
    f32::from(raw & 0xFF) * VBAT_LSB_V
}

/// FB_VIO feedback in volts.
pub fn vio_feedback_volts(raw: u16) -> f32 {
    f32::from(raw & 0xFF) * VIO_LSB_V
}

/// FB_DC duty cycle as a fraction of full on-time.
pub fn duty_cycle_fraction(raw: u16) -> f32 {
    f32::from(raw) / f32::from(u16::MAX)
}
