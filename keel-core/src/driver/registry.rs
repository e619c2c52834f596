//! Driver registry
//!
//! An explicit, ordered table of drivers built at process start. Lookup is
//! a linear scan by name; bring-up calls each driver's `init` in
//! registration order and stops at the first failure, since later drivers
//! cannot assume core I/O is sane.

use heapless::Vec;

use super::{Driver, DriverOps};
use crate::error::DriverError;

/// Default registry capacity
pub const MAX_DRIVERS: usize = 16;

/// Registration failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// No free slot
    Full,
    /// A driver with this name is already registered
    Duplicate(&'static str),
}

struct Entry<'a> {
    ops: &'a dyn DriverOps,
    initialized: bool,
}

/// Ordered driver table
pub struct Registry<'a, const N: usize = MAX_DRIVERS> {
    entries: Vec<Entry<'a>, N>,
}

impl<'a, const N: usize> Default for Registry<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> Registry<'a, N> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build a registry from drivers in init order
    pub fn with_drivers(drivers: &[&'a dyn DriverOps]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for ops in drivers {
            registry.register(*ops)?;
        }
        Ok(registry)
    }

    /// Append a driver; registration order is init order
    pub fn register(&mut self, ops: &'a dyn DriverOps) -> Result<(), RegistryError> {
        let driver = ops.driver();
        if self.get(driver.name).is_some() {
            return Err(RegistryError::Duplicate(driver.name));
        }
        self.entries
            .push(Entry {
                ops,
                initialized: false,
            })
            .map_err(|_| RegistryError::Full)?;
        info!("registry: registered {}", driver.name);
        Ok(())
    }

    /// Find a driver descriptor by name
    pub fn get(&self, name: &str) -> Option<&'static Driver> {
        self.entries
            .iter()
            .map(|entry| entry.ops.driver())
            .find(|driver| driver.name == name)
    }

    /// Find a driver's operations by name
    pub fn ops(&self, name: &str) -> Option<&'a dyn DriverOps> {
        self.entries
            .iter()
            .find(|entry| entry.ops.driver().name == name)
            .map(|entry| entry.ops)
    }

    /// Check if a driver's `init` has completed
    pub fn is_initialized(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.initialized && entry.ops.driver().name == name)
    }

    /// Driver descriptors in registration order
    pub fn drivers(&self) -> impl Iterator<Item = &'static Driver> + '_ {
        self.entries.iter().map(|entry| entry.ops.driver())
    }

    /// Number of registered drivers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no driver is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every driver's `init` once, in registration order
    ///
    /// Stops at the first error and returns it; drivers after the failing
    /// one are left uninitialized. Drivers that already completed `init`
    /// are skipped, so calling this again after a fix resumes bring-up.
    pub fn init_all(&mut self) -> Result<(), DriverError> {
        for entry in self.entries.iter_mut() {
            if entry.initialized {
                continue;
            }
            let name = entry.ops.driver().name;
            if let Err(err) = entry.ops.init() {
                error!("registry: {} init failed: {}", name, err.err_msg());
                return Err(err);
            }
            entry.initialized = true;
            info!("registry: {} initialized", name);
        }
        Ok(())
    }
}
