//! GPIO driver
//!
//! Claims single pins for plain digital use. GPIO owns the pin namespace of
//! the lock table, so a pin claimed here is unavailable to SPI (and the
//! other way round) until it is released.

use heapless::Vec;
use keel_core::driver::exception_base;
use keel_core::{
    Driver, DriverError, DriverId, DriverMessage, DriverOps, DriverUnitLock, LockManager, PinId,
    Resource,
};

/// Packed pin byte does not name a pin
pub const GPIO_ERR_INVALID_PIN: u32 = exception_base(DriverId::Gpio);
/// Pin released by someone who does not hold it
pub const GPIO_ERR_NOT_OWNER: u32 = exception_base(DriverId::Gpio) | 1;
/// More pins in one claim than [`MAX_CLAIM`]
pub const GPIO_ERR_TOO_MANY_PINS: u32 = exception_base(DriverId::Gpio) | 2;

/// Most pins one [`DriverOps::lock_resources`] call can claim
pub const MAX_CLAIM: usize = 32;

pub const GPIO_ERRORS: &[DriverMessage] = &[
    DriverMessage::new(GPIO_ERR_INVALID_PIN, "GPIO_ERR_INVALID_PIN", "invalid pin"),
    DriverMessage::new(GPIO_ERR_NOT_OWNER, "GPIO_ERR_NOT_OWNER", "pin not owned by unit"),
    DriverMessage::new(GPIO_ERR_TOO_MANY_PINS, "GPIO_ERR_TOO_MANY_PINS", "too many pins"),
];

/// GPIO driver descriptor
pub static GPIO_DRIVER: Driver = Driver::new("gpio", DriverId::Gpio, GPIO_ERRORS);

fn decode(unit: u8, pin: u8) -> Result<PinId, DriverError> {
    PinId::from_raw(pin).ok_or_else(|| {
        DriverError::setup(&GPIO_DRIVER, Some(unit), GPIO_ERR_INVALID_PIN, "invalid pin")
    })
}

/// GPIO driver
///
/// A GPIO "unit" is whatever the consumer uses to tell its claims apart,
/// typically one per pin user.
pub struct Gpio<'a> {
    locks: &'a LockManager,
}

impl<'a> Gpio<'a> {
    pub fn new(locks: &'a LockManager) -> Self {
        Self { locks }
    }

    /// Claim a pin, given as its packed `0xPN` byte, for `unit`
    pub fn claim(&self, unit: u8, pin: u8) -> Result<PinId, DriverError> {
        let pin = decode(unit, pin)?;
        self.locks
            .lock_pin(&GPIO_DRIVER, unit, pin)
            .map_err(|conflict| DriverError::lock(&GPIO_DRIVER, conflict))?;
        debug!("gpio{}: claimed {}", unit, pin.raw());
        Ok(pin)
    }

    /// Release a pin held by `unit`
    pub fn release(&self, unit: u8, pin: u8) -> Result<(), DriverError> {
        let pin = decode(unit, pin)?;
        if self.locks.unlock(&GPIO_DRIVER, unit, Resource::pin(pin)) {
            Ok(())
        } else {
            Err(DriverError::operation(
                &GPIO_DRIVER,
                Some(unit),
                GPIO_ERR_NOT_OWNER,
                "pin not owned by unit",
            ))
        }
    }

    /// Current holder of a pin, whichever driver it is
    pub fn owner(&self, pin: u8) -> Result<Option<DriverUnitLock>, DriverError> {
        let pin = decode(0, pin)?;
        Ok(self.locks.owner_of(Resource::pin(pin)))
    }
}

impl DriverOps for Gpio<'_> {
    fn driver(&self) -> &'static Driver {
        &GPIO_DRIVER
    }

    fn init(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn lock_resources(&self, unit: u8, pins: &[PinId]) -> Result<(), DriverError> {
        if pins.len() > MAX_CLAIM {
            return Err(DriverError::setup(
                &GPIO_DRIVER,
                Some(unit),
                GPIO_ERR_TOO_MANY_PINS,
                "too many pins",
            ));
        }
        let resources: Vec<Resource, MAX_CLAIM> = pins.iter().copied().map(Resource::pin).collect();
        self.locks
            .lock_all(&GPIO_DRIVER, unit, &resources)
            .map_err(|conflict| DriverError::lock(&GPIO_DRIVER, conflict))
    }
}
