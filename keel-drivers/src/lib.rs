//! Concrete Keel drivers
//!
//! - [`spi`]: shared-bus SPI master with lazy reconfiguration, bulk
//!   transfers and an `embedded-hal` device adapter
//! - [`gpio`]: pin claims for plain digital use
//!
//! Both drivers arbitrate pins through one [`keel_core::LockManager`],
//! which the board creates and hands to each driver:
//!
//! ```ignore
//! static LOCKS: LockManager = LockManager::new();
//!
//! let gpio = Gpio::new(&LOCKS);
//! let spi = Spi::new(controller, &LOCKS, PlatformConfig::default());
//! let mut registry: Registry = Registry::with_drivers(&[&gpio, &spi])?;
//! registry.init_all()?;
//! ```

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod gpio;
pub mod spi;

pub use gpio::{Gpio, GPIO_DRIVER};
pub use spi::{Spi, SpiDev, SpiDeviceAdapter, SpiSelection, SPI_DRIVER};
