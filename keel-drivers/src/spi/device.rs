//! `embedded-hal` SPI device adapter
//!
//! Lets external device drivers written against
//! [`embedded_hal::spi::SpiDevice`] run on a shared SPI unit. Each
//! transaction is one selection: chip select is asserted for its whole
//! duration and the unit is released afterwards, even on error.

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiDevice};
use keel_core::DriverError;
use keel_hal::SpiController;

use super::{Spi, SpiDev};

/// One device on a shared unit, as an `embedded-hal` SPI device
pub struct SpiDeviceAdapter<'s, 'a, C, D> {
    spi: &'s Spi<'a, C>,
    dev: SpiDev,
    delay: D,
}

impl<'s, 'a, C: SpiController, D: DelayNs> SpiDeviceAdapter<'s, 'a, C, D> {
    /// `delay` serves [`Operation::DelayNs`] steps inside transactions
    pub fn new(spi: &'s Spi<'a, C>, dev: SpiDev, delay: D) -> Self {
        Self { spi, dev, delay }
    }

    pub fn dev(&self) -> SpiDev {
        self.dev
    }
}

impl<C: SpiController, D: DelayNs> ErrorType for SpiDeviceAdapter<'_, '_, C, D> {
    type Error = DriverError;
}

impl<C: SpiController, D: DelayNs> SpiDevice<u8> for SpiDeviceAdapter<'_, '_, C, D> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), DriverError> {
        let mut sel = self.spi.select(self.dev)?;
        for op in operations {
            match op {
                Operation::Read(buf) => sel.bulk_read8(buf)?,
                Operation::Write(buf) => sel.bulk_write8(buf)?,
                Operation::Transfer(read, write) => sel.bulk_transfer8(read, write)?,
                Operation::TransferInPlace(buf) => sel.bulk_rw8(buf)?,
                Operation::DelayNs(ns) => self.delay.delay_ns(*ns),
            }
        }
        sel.deselect();
        Ok(())
    }
}
