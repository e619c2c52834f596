//! Board-agnostic core of the Keel driver framework
//!
//! This crate contains everything drivers share that does not depend on a
//! specific peripheral:
//!
//! - Driver descriptors, error tables and the ordered driver registry
//! - The resource lock manager arbitrating physical pins between drivers
//! - The LOCK / SETUP / OPERATION error model
//! - Packed pin identifiers
//! - Platform configuration

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod config;
pub mod driver;
pub mod error;
pub mod lock;
pub mod pin;

pub use config::PlatformConfig;
pub use driver::{exception_base, Driver, DriverId, DriverMessage, DriverOps, Registry};
pub use error::{DriverError, ErrorCategory, ErrorKind};
pub use lock::{DriverUnitLock, LockManager, Resource, UnitLockError};
pub use pin::PinId;
