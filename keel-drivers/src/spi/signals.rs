//! SPI signal routing table
//!
//! Read-only hardware topology: which GPIO-matrix signals and which native
//! IO-MUX pins belong to each SPI unit.
//!
//! The ESP32 has 4 SPI units. SPI0 is the flash cache controller and SPI1
//! the flash master; both share the flash pins and are reserved by the
//! platform. SPI2 (HSPI) and SPI3 (VSPI) are the general-purpose ones.

use keel_core::PinId;

use super::interface::SpiResources;
use super::NSPI;

/// Signal connections of one SPI unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiSignalConn {
    /// Unit name
    pub name: &'static str,
    /// GPIO matrix output signals
    pub spiclk_out: u8,
    pub spid_out: u8,
    pub spiq_out: u8,
    /// GPIO matrix input signals
    pub spid_in: u8,
    pub spiq_in: u8,
    /// CS0 GPIO matrix output signal
    pub spics_out: u8,
    /// GPIO numbers of the IO-MUX native pins
    pub spiclk_native: u8,
    pub spid_native: u8,
    pub spiq_native: u8,
    pub spics0_native: u8,
}

impl SpiSignalConn {
    /// Native pins as device resources (MISO = Q, MOSI = D)
    pub fn native_resources(&self) -> SpiResources {
        SpiResources {
            sdi: PinId::from_gpio(self.spiq_native),
            sdo: PinId::from_gpio(self.spid_native),
            sck: PinId::from_gpio(self.spiclk_native),
            cs: PinId::from_gpio(self.spics0_native),
        }
    }
}

/// Signal table, indexed by unit
pub static SPI_SIGNALS: [SpiSignalConn; NSPI] = [
    SpiSignalConn {
        name: "spi0",
        spiclk_out: 0,
        spid_out: 2,
        spiq_out: 1,
        spid_in: 2,
        spiq_in: 1,
        spics_out: 5,
        spiclk_native: 6,
        spid_native: 8,
        spiq_native: 7,
        spics0_native: 11,
    },
    SpiSignalConn {
        name: "spi1",
        spiclk_out: 0,
        spid_out: 2,
        spiq_out: 1,
        spid_in: 2,
        spiq_in: 1,
        spics_out: 5,
        spiclk_native: 6,
        spid_native: 8,
        spiq_native: 7,
        spics0_native: 11,
    },
    SpiSignalConn {
        name: "hspi",
        spiclk_out: 71,
        spid_out: 73,
        spiq_out: 72,
        spid_in: 73,
        spiq_in: 72,
        spics_out: 74,
        spiclk_native: 14,
        spid_native: 13,
        spiq_native: 12,
        spics0_native: 15,
    },
    SpiSignalConn {
        name: "vspi",
        spiclk_out: 63,
        spid_out: 65,
        spiq_out: 64,
        spid_in: 65,
        spiq_in: 64,
        spics_out: 68,
        spiclk_native: 18,
        spid_native: 23,
        spiq_native: 19,
        spics0_native: 5,
    },
];
