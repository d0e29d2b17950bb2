use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use solenoid_driver::checksum::{self, CrcCheck};
use solenoid_driver::{self as sol, frame, registers, units};
use solenoid_driver::{
    ChannelConfig, Driver, DriverConfig, GlobalConfig, ParallelPair, ReplyFrame, SimulatedDevice,
};
use spi_transport::{SerialBridge, SpiClock, Transport};

#[derive(Parser, Debug)]
#[command(
    name = "sol",
    version,
    about = "Six-channel SPI solenoid driver CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Transport backend for device commands
    #[arg(long, value_enum, default_value_t = Backend::Sim, global = true)]
    backend: Backend,

    /// Serial port of the USB-to-SPI bridge
    #[arg(long, default_value = "/dev/ttyACM0", global = true)]
    device: String,

    /// SPI clock used by the bridge
    #[arg(long, value_enum, default_value_t = Clock::M1, global = true)]
    clock: Clock,

    /// Read back every written register
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    verify: bool,

    /// Expected device id (hex)
    #[arg(long, global = true)]
    device_id: Option<String>,

    /// Print snapshots as JSON
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Sim,
    Bridge,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Clock {
    #[value(name = "100k")]
    K100,
    #[value(name = "500k")]
    K500,
    #[value(name = "1m")]
    M1,
    #[value(name = "2m")]
    M2,
    #[value(name = "5m")]
    M5,
}

impl Clock {
    fn into_transport(self) -> SpiClock {
        match self {
            Clock::K100 => SpiClock::K100,
            Clock::K500 => SpiClock::K500,
            Clock::M1 => SpiClock::M1,
            Clock::M2 => SpiClock::M2,
            Clock::M5 => SpiClock::M5,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports that may host an SPI bridge
    List,
    /// Build a command frame
    Encode {
        /// Logical register address (hex)
        address: String,
        /// Data word to write (hex); omit for a read frame
        #[arg(long)]
        write: Option<String>,
    },
    /// Decode a reply word
    Decode {
        /// 32-bit reply word (hex)
        word: String,
    },
    /// Unit conversions
    Convert {
        #[command(subcommand)]
        what: Convert,
    },
    /// Initialize the device and print its status
    Status,
    /// Read and merge every fault register
    Faults,
    /// Channel diagnostics
    Diag {
        /// Channel index 0..=5
        channel: u8,
    },
    /// Raw register read
    Read {
        /// Logical register address (hex)
        address: String,
    },
    /// Raw register write
    Write {
        /// Logical register address (hex)
        address: String,
        /// Value (hex)
        value: String,
    },
    /// Apply a JSON device profile
    Apply {
        #[arg(long)]
        profile: PathBuf,
    },
    /// Enter mission mode, set a channel current and optionally enable it
    SetCurrent {
        /// Channel index 0..=5
        channel: u8,
        /// Target current in mA
        current_ma: f32,
        /// Apply this profile first
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Enable the channel output
        #[arg(long, action = ArgAction::SetTrue)]
        enable: bool,
    },
}

#[derive(Subcommand, Debug)]
enum Convert {
    /// mA to setpoint code
    Current {
        ma: f32,
        #[arg(long, action = ArgAction::SetTrue)]
        parallel: bool,
    },
    /// Setpoint code to mA
    Setpoint {
        code: u16,
        #[arg(long, action = ArgAction::SetTrue)]
        parallel: bool,
    },
    /// PWM period in microseconds to mantissa/exponent
    Period { micros: f32 },
    /// Dither amplitude and frequency to step parameters
    Dither {
        amplitude_ma: f32,
        frequency_hz: f32,
        #[arg(long, action = ArgAction::SetTrue)]
        parallel: bool,
    },
    /// VBAT threshold volts to register code
    Vbat { volts: f32 },
}

/// A device profile as stored on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct DeviceProfile {
    global: GlobalConfig,
    parallel: Vec<ParallelPair>,
    channels: BTreeMap<u8, ChannelConfig>,
    /// Enter mission mode after configuring
    mission: bool,
    /// Channel enable mask applied in mission mode
    enable_mask: u8,
}

type DynDriver = Driver<Box<dyn Transport>>;

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::List => list_ports(),
        Commands::Encode { address, write } => encode(address, write.as_deref()),
        Commands::Decode { word } => decode(word),
        Commands::Convert { what } => convert(what),
        Commands::Status => {
            let mut driver = open_driver(&cli)?;
            let status = driver.get_device_status()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "mode={} enabled=0b{:06b} vbat={:.2}V vio={:.2}V fault={}",
                    status.mode,
                    status.enabled_mask,
                    status.vbat_v,
                    status.vio_v,
                    status.any_fault()
                );
            }
            Ok(())
        }
        Commands::Faults => {
            let mut driver = open_driver(&cli)?;
            let report = driver.get_all_faults()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.any_fault() {
                println!("global: {:?}", report.global);
                for ch in report.faulted_channels() {
                    println!("{ch}: {:?}", report.channels[ch.index() as usize]);
                }
            } else {
                println!("no faults");
            }
            Ok(())
        }
        Commands::Diag { channel } => {
            let mut driver = open_driver(&cli)?;
            let diag = driver.get_channel_diagnostics(*channel)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&diag)?);
            } else {
                println!(
                    "CH{} enabled={} avg={:.1}mA min={:.1}mA max={:.1}mA duty={:.1}% faults={:?}",
                    diag.channel,
                    diag.enabled,
                    diag.average_current_ma,
                    diag.min_current_ma,
                    diag.max_current_ma,
                    diag.duty_cycle * 100.0,
                    diag.faults
                );
            }
            Ok(())
        }
        Commands::Read { address } => {
            let address = parse_address(address)?;
            let mut driver = open_driver(&cli)?;
            let value = driver.read_register(address)?;
            print_register(address, value);
            Ok(())
        }
        Commands::Write { address, value } => {
            let address = parse_address(address)?;
            let value = parse_word(value, 0xFFFF)? as u16;
            let mut driver = open_driver(&cli)?;
            driver.write_register(address, value)?;
            println!("0x{address:03X} <- 0x{value:04X}");
            Ok(())
        }
        Commands::Apply { profile } => {
            let mut driver = open_driver(&cli)?;
            let profile = load_profile(profile)?;
            apply_profile(&mut driver, &profile)?;
            println!(
                "applied: {} channel(s), mode={}",
                profile.channels.len(),
                driver.mode()
            );
            Ok(())
        }
        Commands::SetCurrent {
            channel,
            current_ma,
            profile,
            enable,
        } => {
            let mut driver = open_driver(&cli)?;
            if let Some(path) = profile {
                apply_profile(&mut driver, &load_profile(path)?)?;
            }
            driver.enter_mission_mode()?;
            driver.set_current_setpoint(*channel, *current_ma)?;
            if *enable {
                driver.enable_channel(*channel, true)?;
            }
            let readback = driver.get_current_setpoint(*channel)?;
            println!("CH{channel}: setpoint {readback:.2} mA (requested {current_ma:.2} mA)");
            Ok(())
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn open_transport(cli: &Cli) -> Result<Box<dyn Transport>> {
    match cli.backend {
        Backend::Sim => Ok(Box::new(SimulatedDevice::new())),
        Backend::Bridge => {
            let bridge = SerialBridge::open_with(&cli.device, cli.clock.into_transport())
                .with_context(|| format!("opening SPI bridge on {}", cli.device))?;
            Ok(Box::new(bridge))
        }
    }
}

fn open_driver(cli: &Cli) -> Result<DynDriver> {
    let mut config = DriverConfig {
        verify_writes: cli.verify,
        ..DriverConfig::default()
    };
    if let Some(id) = &cli.device_id {
        config.expected_device_id = parse_word(id, 0xFF)? as u8;
    }
    let transport = open_transport(cli)?;
    let mut driver = Driver::new(transport, config);
    driver
        .init()
        .with_context(|| format!("initializing device on {:?} backend", cli.backend))?;
    info!(backend = ?cli.backend, "device ready");
    Ok(driver)
}

fn load_profile(path: &Path) -> Result<DeviceProfile> {
    let file = File::open(path).with_context(|| format!("opening profile {}", path.display()))?;
    let profile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing profile {}", path.display()))?;
    Ok(profile)
}

fn apply_profile(driver: &mut DynDriver, profile: &DeviceProfile) -> Result<()> {
    driver
        .configure_global(&profile.global)
        .context("global configuration")?;
    for pair in &profile.parallel {
        driver
            .configure_parallel(*pair, true)
            .with_context(|| format!("pairing {pair:?}"))?;
    }
    for (channel, config) in &profile.channels {
        driver
            .configure_channel(*channel, config)
            .with_context(|| format!("configuring channel {channel}"))?;
        debug!(channel, "channel configured from profile");
    }
    if profile.mission {
        driver.enter_mission_mode()?;
        driver
            .enable_channels(profile.enable_mask)
            .context("enabling channels")?;
    }
    Ok(())
}

fn list_ports() -> Result<()> {
    for bus in SerialBridge::list()? {
        println!("{bus}");
    }
    Ok(())
}

fn encode(address: &str, write: Option<&str>) -> Result<()> {
    let address = parse_address(address)?;
    let frame = match write {
        Some(data) => frame::encode_write(address, parse_word(data, 0xFFFF)? as u16)?,
        None => frame::encode_read(address)?,
    };
    println!(
        "{frame}  crc=0x{:02X} field=0x{:02X} {} data=0x{:04X}",
        frame.crc(),
        frame.address_field(),
        if frame.is_write() { "W" } else { "R" },
        frame.data()
    );
    Ok(())
}

fn decode(word: &str) -> Result<()> {
    let raw = parse_word(word, u32::MAX)?;
    let reply = frame::decode_reply(raw)?;
    let crc = match checksum::verify_reply(raw) {
        CrcCheck::Valid => "ok".to_string(),
        CrcCheck::Skipped => "n/a".to_string(),
        CrcCheck::Mismatch { expected, received } => {
            format!("BAD (computed 0x{expected:02X}, received 0x{received:02X})")
        }
    };
    match reply {
        ReplyFrame::SixteenBit {
            status,
            write_echo,
            data,
            ..
        } => println!(
            "16-bit reply: status={status:?} rw={} data=0x{data:04X} crc={crc}",
            u8::from(write_echo)
        ),
        ReplyFrame::TwentyTwoBit { data, .. } => {
            println!("22-bit reply: data=0x{data:06X} crc={crc}")
        }
        ReplyFrame::CriticalFault { checks } => {
            println!("critical fault: {checks} (raw 0x{:02X})", checks.raw())
        }
    }
    Ok(())
}

fn convert(what: &Convert) -> Result<()> {
    match *what {
        Convert::Current { ma, parallel } => {
            let code = units::current_to_setpoint(ma, parallel)?;
            println!(
                "{ma} mA -> 0x{code:04X} ({code}), readback {:.3} mA",
                units::setpoint_to_current(code, parallel)
            );
        }
        Convert::Setpoint { code, parallel } => {
            println!("{code} -> {:.3} mA", units::setpoint_to_current(code, parallel));
        }
        Convert::Period { micros } => {
            let p = sol::PwmPeriod::from_micros(micros)?;
            println!(
                "{micros} us -> mantissa={} exponent={} low_freq={} ({:.3} us)",
                p.mantissa,
                p.exponent,
                p.low_freq,
                p.micros()
            );
        }
        Convert::Dither {
            amplitude_ma,
            frequency_hz,
            parallel,
        } => {
            let d = sol::DitherSettings::from_amplitude(amplitude_ma, frequency_hz, parallel)?;
            println!(
                "step_size={} num_steps={} flat_steps={} -> {:.2} mA @ {:.2} Hz",
                d.step_size,
                d.num_steps,
                d.flat_steps,
                units::dither_amplitude_ma(d, parallel),
                units::dither_frequency_hz(d)
            );
        }
        Convert::Vbat { volts } => {
            let code = units::volts_to_vbat_threshold(volts)?;
            println!(
                "{volts} V -> {code} ({:.3} V)",
                units::vbat_threshold_to_volts(code)
            );
        }
    }
    Ok(())
}

fn print_register(address: u16, value: u32) {
    match registers::lookup(address) {
        Some(info) => {
            let fields = registers::decode_fields(info.descriptor, value)
                .into_iter()
                .map(|(name, v)| format!("{name}={v:#X}"))
                .collect::<Vec<_>>()
                .join(" ");
            let channel = info.channel.map(|c| format!("{c}.")).unwrap_or_default();
            println!(
                "{channel}{} (0x{address:03X}) = 0x{value:04X}  {fields}",
                info.descriptor.name
            );
        }
        None => println!("0x{address:03X} = 0x{value:04X}"),
    }
}

fn parse_word(s: &str, max: u32) -> Result<u32> {
    let t = s.trim();
    let no_prefix = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    let v = u32::from_str_radix(no_prefix, 16)
        .map_err(|e| anyhow::anyhow!("invalid hex value '{t}': {e}"))?;
    if v > max {
        return Err(anyhow::anyhow!("value 0x{v:X} exceeds 0x{max:X}"));
    }
    Ok(v)
}

fn parse_address(s: &str) -> Result<u16> {
    Ok(parse_word(s, u32::from(registers::ADDRESS_MASK))? as u16)
}
