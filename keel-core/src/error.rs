//! Driver error model
//!
//! Every fallible driver operation returns a [`DriverError`]: which driver
//! and unit failed, and one of three categories:
//!
//! - **Lock**: a physical resource is already owned by another
//!   (driver, unit); carries the full [`UnitLockError`]
//! - **Setup**: initialization or configuration failed
//! - **Operation**: a runtime operation failed (e.g. a transfer timed out)
//!
//! Errors are built once by whoever detects the failure and are never
//! mutated afterwards.

use core::fmt;

use crate::driver::Driver;
use crate::lock::UnitLockError;

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCategory {
    /// Someone needs a resource which is locked
    Lock,
    /// Something failed during setup
    Setup,
    /// Something failed during normal operation
    Operation,
}

/// Category-specific error payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Resource conflict, with both parties
    Lock(UnitLockError),
    /// Setup failure
    Setup {
        /// Exception code (`exception_base | local`)
        code: u32,
        /// Fallback message when the code has no table entry
        msg: &'static str,
    },
    /// Runtime failure
    Operation {
        /// Exception code (`exception_base | local`)
        code: u32,
        /// Fallback message when the code has no table entry
        msg: &'static str,
    },
}

/// Message reported for lock conflicts
const LOCK_MESSAGE: &str = "resource is locked by another driver";

/// A structured, attributable driver error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverError {
    /// Driver that raised the error
    pub driver: &'static Driver,
    /// Driver unit that raised the error, if the error is unit-specific
    pub unit: Option<u8>,
    /// What went wrong
    pub kind: ErrorKind,
}

impl DriverError {
    /// Build a SETUP error
    pub const fn setup(driver: &'static Driver, unit: Option<u8>, code: u32, msg: &'static str) -> Self {
        Self {
            driver,
            unit,
            kind: ErrorKind::Setup { code, msg },
        }
    }

    /// Build an OPERATION error
    pub const fn operation(
        driver: &'static Driver,
        unit: Option<u8>,
        code: u32,
        msg: &'static str,
    ) -> Self {
        Self {
            driver,
            unit,
            kind: ErrorKind::Operation { code, msg },
        }
    }

    /// Wrap a lock conflict raised while `driver` was claiming resources
    ///
    /// The unit is the requester's unit from the conflict.
    pub const fn lock(driver: &'static Driver, conflict: UnitLockError) -> Self {
        Self {
            driver,
            unit: Some(conflict.target_unit),
            kind: ErrorKind::Lock(conflict),
        }
    }

    /// Error category
    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            ErrorKind::Lock(_) => ErrorCategory::Lock,
            ErrorKind::Setup { .. } => ErrorCategory::Setup,
            ErrorKind::Operation { .. } => ErrorCategory::Operation,
        }
    }

    /// Exception code, or `None` for lock conflicts
    pub fn code(&self) -> Option<u32> {
        match self.kind {
            ErrorKind::Lock(_) => None,
            ErrorKind::Setup { code, .. } | ErrorKind::Operation { code, .. } => Some(code),
        }
    }

    /// The lock conflict, if this is a LOCK error
    pub fn lock_conflict(&self) -> Option<&UnitLockError> {
        match &self.kind {
            ErrorKind::Lock(conflict) => Some(conflict),
            _ => None,
        }
    }

    /// Human-readable message
    ///
    /// Resolved through the driver's error table; falls back to the
    /// message given at construction when the table has no entry.
    pub fn err_msg(&self) -> &'static str {
        match self.kind {
            ErrorKind::Lock(_) => LOCK_MESSAGE,
            ErrorKind::Setup { code, msg } | ErrorKind::Operation { code, msg } => self
                .driver
                .message(code)
                .map(|entry| entry.message)
                .unwrap_or(msg),
        }
    }

    /// Name of the driver that raised the error
    pub fn name(&self) -> &'static str {
        self.driver.name
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let ErrorKind::Lock(conflict) = &self.kind {
            return write!(f, "{}", conflict);
        }

        write!(f, "{}", self.driver.name)?;
        if let Some(unit) = self.unit {
            write!(f, "{}", unit)?;
        }
        write!(f, ": {}", self.err_msg())
    }
}

impl embedded_hal::spi::Error for DriverError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::driver::{exception_base, DriverId, DriverMessage};
    use crate::lock::{DriverUnitLock, Resource};
    use crate::pin::PinId;
    use std::string::ToString;

    const PWM_ERR_NO_TIMER: u32 = exception_base(DriverId::Pwm);
    const PWM_ERR_UNLISTED: u32 = exception_base(DriverId::Pwm) | 5;

    static PWM: Driver = Driver::new(
        "pwm",
        DriverId::Pwm,
        &[DriverMessage::new(PWM_ERR_NO_TIMER, "PWM_ERR_NO_TIMER", "no timer available")],
    );
    static ADC: Driver = Driver::new("adc", DriverId::Adc, &[]);

    #[test]
    fn test_setup_error_uses_table_message() {
        let err = DriverError::setup(&PWM, Some(2), PWM_ERR_NO_TIMER, "fallback");
        assert_eq!(err.category(), ErrorCategory::Setup);
        assert_eq!(err.err_msg(), "no timer available");
        assert_eq!(err.name(), "pwm");
        assert_eq!(err.code(), Some(PWM_ERR_NO_TIMER));
        assert_eq!(err.to_string(), "pwm2: no timer available");
    }

    #[test]
    fn test_missing_table_entry_falls_back_to_msg() {
        let err = DriverError::operation(&PWM, None, PWM_ERR_UNLISTED, "duty out of range");
        assert_eq!(err.category(), ErrorCategory::Operation);
        assert_eq!(err.err_msg(), "duty out of range");
        assert_eq!(err.to_string(), "pwm: duty out of range");
    }

    #[test]
    fn test_lock_error_carries_both_parties() {
        let pin = PinId::from_raw(0x21).unwrap();
        let conflict = UnitLockError {
            resource: Resource::pin(pin),
            owner: Some(DriverUnitLock { owner: &ADC, unit: 0 }),
            target_driver: &PWM,
            target_unit: 3,
        };
        let err = DriverError::lock(&PWM, conflict);

        assert_eq!(err.category(), ErrorCategory::Lock);
        assert_eq!(err.unit, Some(3));
        assert_eq!(err.code(), None);
        assert_eq!(err.lock_conflict(), Some(&conflict));
        assert_eq!(err.err_msg(), LOCK_MESSAGE);
        assert_eq!(err.to_string(), "pwm3 cannot lock RB1, used by adc0");
    }
}
