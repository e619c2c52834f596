//! Driver descriptors
//!
//! Every driver kind is described by one immutable [`Driver`] value that
//! lives for the whole program. Descriptors carry the driver's name, its
//! error-code namespace and its error-message table. Runtime state (pins
//! held, whether `init` ran) is kept by the [`LockManager`] and the
//! [`Registry`], never in the descriptor.
//!
//! [`LockManager`]: crate::lock::LockManager
//! [`Registry`]: registry::Registry

pub mod registry;

use crate::error::DriverError;
use crate::pin::PinId;

pub use registry::{Registry, RegistryError};

/// Numeric driver identifiers
///
/// The id selects the top byte of every exception code the driver raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DriverId {
    Adc = 1,
    Gpio = 2,
    I2c = 3,
    Uart = 4,
    Spi = 5,
    Lora = 6,
    Pwm = 7,
    Wifi = 8,
    Net = 9,
}

impl DriverId {
    /// Conventional short name of the driver kind
    pub fn name(self) -> &'static str {
        match self {
            DriverId::Adc => "adc",
            DriverId::Gpio => "gpio",
            DriverId::I2c => "i2c",
            DriverId::Uart => "uart",
            DriverId::Spi => "spi",
            DriverId::Lora => "lora",
            DriverId::Pwm => "pwm",
            DriverId::Wifi => "wifi",
            DriverId::Net => "net",
        }
    }

    /// Get the id as a byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Base of a driver's exception-code namespace (`id << 24`)
pub const fn exception_base(id: DriverId) -> u32 {
    (id as u32) << 24
}

/// Mask selecting the driver-local part of an exception code
pub const LOCAL_CODE_MASK: u32 = 0x00FF_FFFF;

/// One entry of a driver's error table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverMessage {
    /// Full exception code (`exception_base | local`)
    pub code: u32,
    /// Symbolic constant name, e.g. `SPI_ERR_INVALID_UNIT`
    pub name: &'static str,
    /// Human-readable message
    pub message: &'static str,
}

impl DriverMessage {
    pub const fn new(code: u32, name: &'static str, message: &'static str) -> Self {
        Self {
            code,
            name,
            message,
        }
    }
}

/// Immutable driver descriptor
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Driver {
    /// Short name used for registry lookup (e.g. "spi")
    pub name: &'static str,
    /// Driver identifier
    pub id: DriverId,
    /// Error table, indexed by local exception code
    pub errors: &'static [DriverMessage],
}

impl Driver {
    pub const fn new(name: &'static str, id: DriverId, errors: &'static [DriverMessage]) -> Self {
        Self { name, id, errors }
    }

    /// Base of this driver's exception codes
    pub const fn exception_base(&self) -> u32 {
        exception_base(self.id)
    }

    /// Look up the error-table entry for an exception code
    ///
    /// Codes from another driver's namespace never match.
    pub fn message(&self, code: u32) -> Option<&'static DriverMessage> {
        if code & !LOCAL_CODE_MASK != self.exception_base() {
            return None;
        }
        let index = (code & LOCAL_CODE_MASK) as usize;
        self.errors.get(index).filter(|entry| entry.code == code)
    }
}

// Identity is the id; a descriptor never changes after registration
impl PartialEq for Driver {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Driver {}

/// Driver behavior invoked by the framework
///
/// The descriptor says who a driver is; this trait is what the registry
/// and other drivers can ask it to do.
pub trait DriverOps {
    /// The driver's descriptor
    fn driver(&self) -> &'static Driver;

    /// One-time bring-up, called by [`Registry::init_all`]
    ///
    /// Errors are SETUP errors and abort bring-up.
    fn init(&self) -> Result<(), DriverError>;

    /// Claim physical pins for one of this driver's units
    ///
    /// All pins are claimed or none are. An overlap with a pin held by any
    /// other (driver, unit) is reported as a LOCK error.
    fn lock_resources(&self, unit: u8, pins: &[PinId]) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ERRORS: &[DriverMessage] = &[
        DriverMessage::new(exception_base(DriverId::Uart), "UART_ERR_A", "first"),
        DriverMessage::new(exception_base(DriverId::Uart) | 1, "UART_ERR_B", "second"),
    ];

    static UART: Driver = Driver::new("uart", DriverId::Uart, TEST_ERRORS);

    #[test]
    fn test_exception_base() {
        assert_eq!(exception_base(DriverId::Spi), 0x0500_0000);
        assert_eq!(UART.exception_base(), 4 << 24);
    }

    #[test]
    fn test_message_lookup() {
        let msg = UART.message(UART.exception_base() | 1).unwrap();
        assert_eq!(msg.name, "UART_ERR_B");
        assert_eq!(msg.message, "second");
    }

    #[test]
    fn test_message_lookup_rejects_foreign_namespace() {
        // Same local code, SPI namespace
        assert!(UART.message(exception_base(DriverId::Spi) | 1).is_none());
        assert!(UART.message(UART.exception_base() | 7).is_none());
    }
}
