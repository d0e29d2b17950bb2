use crate::{BusInfo, Result, TransferStats, Transport, TransportError};
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::time::Duration;

/// Line-oriented USB-to-SPI bridge over a serial port.
///
/// The bridge firmware speaks a small text protocol modelled on SLCAN:
/// `C\r` closes the bus, `S<n>\r` selects the SPI clock, `O\r` opens it, and
/// `X<8 hex>\r` exchanges one 32-bit word which is answered by `x<8 hex>\r`.
/// A BEL byte (0x07) signals a bridge-side error.
pub struct SerialBridge {
    port_path: String,
    port: Box<dyn SerialPort>,
    clock: SpiClock,
    stats: TransferStats,
}

impl SerialBridge {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with(path, SpiClock::M1)
    }

    pub fn open_with(path: &str, clock: SpiClock) -> Result<Self> {
        let port = serialport::new(path, 115200)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(SerialBridge {
            port_path: path.to_string(),
            port,
            clock,
            stats: TransferStats::default(),
        })
    }

    pub fn list() -> Result<Vec<BusInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            match p.port_type {
                SerialPortType::UsbPort(_u) => {
                    out.push(BusInfo {
                        name: p.port_name,
                        driver: "spi-bridge-usb".to_string(),
                    });
                }
                _ => {
                    // Still include other serial ports; user can pick
                    out.push(BusInfo {
                        name: p.port_name,
                        driver: "serial".to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    fn encode_word(word: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.push(b'X');
        out.extend_from_slice(format!("{word:08X}").as_bytes());
        out.push(b'\r');
        out
    }

    fn parse_reply(line: &[u8]) -> Result<u32> {
        if line.is_empty() {
            return Err(TransportError::BadReply("empty"));
        }
        match line[0] {
            b'x' => {
                if line.len() < 1 + 8 {
                    return Err(TransportError::BadReply("short word"));
                }
                let text = std::str::from_utf8(&line[1..9])
                    .map_err(|_| TransportError::BadReply("utf8"))?;
                u32::from_str_radix(text, 16).map_err(|_| TransportError::BadReply("hex"))
            }
            0x07 => Err(TransportError::Io("bridge reported error".to_string())),
            _ => Err(TransportError::BadReply("unknown header")),
        }
    }

    fn write_cmd(port: &mut dyn SerialPort, cmd: &[u8]) -> Result<()> {
        port.write_all(cmd)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; 32];
        let mut acc: Vec<u8> = Vec::with_capacity(16);
        loop {
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    acc.extend_from_slice(&buf[..n]);
                    if acc.first() == Some(&0x07) {
                        return Ok(acc);
                    }
                    if let Some(pos) = acc.iter().position(|&b| b == b'\r') {
                        let line = acc.drain(..=pos).collect::<Vec<u8>>();
                        let trim = &line[..line.len().saturating_sub(1)];
                        if trim.is_empty() {
                            continue;
                        }
                        return Ok(trim.to_vec());
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    let msg = e.to_string();
                    if msg.contains("Operation timed out") || msg.contains("timed out") {
                        return Err(TransportError::Timeout);
                    }
                    return Err(TransportError::Io(msg));
                }
            }
        }
    }
}

impl Transport for SerialBridge {
    fn init(&mut self) -> Result<()> {
        // Close first so a bridge left open by a previous session accepts the clock change
        let _ = Self::write_cmd(&mut *self.port, b"C\r");
        let cmd = [b'S', self.clock.code(), b'\r'];
        Self::write_cmd(&mut *self.port, &cmd)?;
        Self::write_cmd(&mut *self.port, b"O\r")?;
        tracing::info!(port = %self.port_path, clock = ?self.clock, "spi bridge opened");
        Ok(())
    }

    fn transfer(&mut self, tx: u32) -> Result<u32> {
        let line = Self::encode_word(tx);
        if let Err(e) = Self::write_cmd(&mut *self.port, &line) {
            self.stats.errors += 1;
            return Err(e);
        }
        let reply = self.read_line().and_then(|l| Self::parse_reply(&l));
        match reply {
            Ok(rx) => {
                self.stats.words += 1;
                Ok(rx)
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    fn delay(&mut self, micros: u32) {
        self.stats.delay_us += u64::from(micros);
        std::thread::sleep(Duration::from_micros(u64::from(micros)));
    }
}

/// SPI clock rates supported by the bridge (mapped to `Sx` codes)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpiClock {
    K100, // S0
    K500, // S1
    M1,   // S2
    M2,   // S3
    M5,   // S4
}

impl SpiClock {
    pub fn code(self) -> u8 {
        match self {
            SpiClock::K100 => b'0',
            SpiClock::K500 => b'1',
            SpiClock::M1 => b'2',
            SpiClock::M2 => b'3',
            SpiClock::M5 => b'4',
        }
    }
}
