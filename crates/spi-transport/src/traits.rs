use crate::{Result, TransportError};

/// A minimal blocking, full-duplex 32-bit SPI word exchange.
///
/// Implementations carry no protocol knowledge: they clock a word out MSB first,
/// hand back the word clocked in during the same transaction and provide a
/// blocking delay. Chip-select handling belongs inside `transfer`.
pub trait Transport {
    /// Bring the bus up. Called once by the device driver before any exchange.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Exchange one 32-bit frame.
    fn transfer(&mut self, tx: u32) -> Result<u32>;

    /// Exchange a batch of frames, one chip-select cycle per word.
    fn transfer_many(&mut self, tx: &[u32], rx: &mut [u32]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(TransportError::LengthMismatch {
                tx: tx.len(),
                rx: rx.len(),
            });
        }
        for (out, slot) in tx.iter().zip(rx.iter_mut()) {
            *slot = self.transfer(*out)?;
        }
        Ok(())
    }

    /// Block for at least `micros` microseconds.
    fn delay(&mut self, micros: u32);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn transfer(&mut self, tx: u32) -> Result<u32> {
        (**self).transfer(tx)
    }

    fn transfer_many(&mut self, tx: &[u32], rx: &mut [u32]) -> Result<()> {
        (**self).transfer_many(tx, rx)
    }

    fn delay(&mut self, micros: u32) {
        (**self).delay(micros)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn transfer(&mut self, tx: u32) -> Result<u32> {
        (**self).transfer(tx)
    }

    fn transfer_many(&mut self, tx: &[u32], rx: &mut [u32]) -> Result<()> {
        (**self).transfer_many(tx, rx)
    }

    fn delay(&mut self, micros: u32) {
        (**self).delay(micros)
    }
}
