//! Resource lock manager
//!
//! Drivers claim physical resources here before touching any register that
//! would route the resource to them. A resource is keyed by the driver that
//! owns its namespace and an index inside it; pins always live in the GPIO
//! namespace, so a pin is the same resource whether GPIO, SPI or UART asks
//! for it.
//!
//! Ownership is per (driver, unit). Re-locking a resource you already own
//! succeeds; any other (driver, unit), including another unit of the same
//! driver, gets a [`UnitLockError`] naming both parties.
//!
//! The whole table sits behind one mutex so check-then-record is atomic:
//! two threads racing for the same pin produce exactly one winner.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{LinearMap, Vec};

use crate::driver::{Driver, DriverId};
use crate::pin::PinId;

/// Default lock table capacity
pub const MAX_LOCKS: usize = 64;

/// A physical resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Resource {
    /// Driver whose namespace the index belongs to
    pub driver: DriverId,
    /// Index within that namespace (packed pin byte for GPIO)
    pub index: u8,
}

impl Resource {
    /// A resource in a driver's namespace
    pub const fn new(driver: DriverId, index: u8) -> Self {
        Self { driver, index }
    }

    /// A physical pin
    pub const fn pin(pin: PinId) -> Self {
        Self::new(DriverId::Gpio, pin.raw())
    }

    /// The pin, if this resource is one
    pub fn as_pin(&self) -> Option<PinId> {
        match self.driver {
            DriverId::Gpio => PinId::from_raw(self.index),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_pin() {
            Some(pin) => write!(f, "{}", pin),
            None => write!(f, "{}{}", self.driver.name(), self.index),
        }
    }
}

/// Owner of a locked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverUnitLock {
    /// Who owns the lock
    pub owner: &'static Driver,
    /// Unit of the owning driver
    pub unit: u8,
}

impl DriverUnitLock {
    fn is(&self, driver: &Driver, unit: u8) -> bool {
        self.owner == driver && self.unit == unit
    }
}

/// A failed claim
///
/// `owner` is whoever already holds the resource; `target` is the
/// (driver, unit) that asked for it. `owner` is `None` when the claim
/// failed because the lock table is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnitLockError {
    /// The resource that could not be locked
    pub resource: Resource,
    /// Current holder
    pub owner: Option<DriverUnitLock>,
    /// Requesting driver
    pub target_driver: &'static Driver,
    /// Requesting unit
    pub target_unit: u8,
}

impl UnitLockError {
    /// Driver holding the resource
    pub fn owner_driver(&self) -> Option<&'static Driver> {
        self.owner.map(|lock| lock.owner)
    }

    /// Unit holding the resource
    pub fn owner_unit(&self) -> Option<u8> {
        self.owner.map(|lock| lock.unit)
    }
}

impl fmt::Display for UnitLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} cannot lock {}, ",
            self.target_driver.name, self.target_unit, self.resource
        )?;
        match self.owner {
            Some(lock) => write!(f, "used by {}{}", lock.owner.name, lock.unit),
            None => write!(f, "lock table full"),
        }
    }
}

type LockTable<const N: usize> = LinearMap<Resource, DriverUnitLock, N>;

/// Owned, mutex-guarded lock table
pub struct LockManager<const N: usize = MAX_LOCKS> {
    table: Mutex<CriticalSectionRawMutex, RefCell<LockTable<N>>>,
}

impl<const N: usize> Default for LockManager<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LockManager<N> {
    /// Create an empty lock table
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(LinearMap::new())),
        }
    }

    /// Claim unit `target_unit` of `target_driver`'s namespace for
    /// (`owner_driver`, `owner_unit`)
    ///
    /// On conflict the returned error names the existing holder as owner and
    /// the requester (`owner_driver`, `owner_unit`) as target.
    pub fn lock(
        &self,
        owner_driver: &'static Driver,
        owner_unit: u8,
        target_driver: &'static Driver,
        target_unit: u8,
    ) -> Result<(), UnitLockError> {
        self.lock_all(
            owner_driver,
            owner_unit,
            &[Resource::new(target_driver.id, target_unit)],
        )
    }

    /// Claim a single pin
    pub fn lock_pin(&self, owner: &'static Driver, unit: u8, pin: PinId) -> Result<(), UnitLockError> {
        self.lock_all(owner, unit, &[Resource::pin(pin)])
    }

    /// Claim every resource in `resources`, or none of them
    ///
    /// The first conflicting resource (in slice order) is reported.
    pub fn lock_all(
        &self,
        owner: &'static Driver,
        unit: u8,
        resources: &[Resource],
    ) -> Result<(), UnitLockError> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();

            let mut needed = 0;
            for (i, resource) in resources.iter().enumerate() {
                match table.get(resource) {
                    Some(lock) if !lock.is(owner, unit) => {
                        warn!(
                            "lock: {}{} denied {}, held by {}{}",
                            owner.name,
                            unit,
                            resource,
                            lock.owner.name,
                            lock.unit
                        );
                        return Err(UnitLockError {
                            resource: *resource,
                            owner: Some(*lock),
                            target_driver: owner,
                            target_unit: unit,
                        });
                    }
                    Some(_) => {}
                    None if !resources[..i].contains(resource) => needed += 1,
                    None => {}
                }
            }

            if table.len() + needed > N {
                let resource = resources
                    .iter()
                    .find(|r| !table.contains_key(*r))
                    .copied()
                    .unwrap_or(resources[0]);
                warn!("lock: table full, {}{} denied {}", owner.name, unit, resource);
                return Err(UnitLockError {
                    resource,
                    owner: None,
                    target_driver: owner,
                    target_unit: unit,
                });
            }

            for resource in resources {
                if !table.contains_key(resource) {
                    let inserted = table.insert(*resource, DriverUnitLock { owner, unit });
                    debug_assert!(inserted.is_ok(), "capacity checked above");
                    trace!("lock: {}{} holds {}", owner.name, unit, resource);
                }
            }
            Ok(())
        })
    }

    /// Release one resource held by (`owner`, `unit`)
    ///
    /// Returns false if the resource was free or held by someone else.
    pub fn unlock(&self, owner: &'static Driver, unit: u8, resource: Resource) -> bool {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let held = matches!(table.get(&resource), Some(lock) if lock.is(owner, unit));
            if held {
                table.remove(&resource);
            }
            held
        })
    }

    /// Release every resource held by (`owner`, `unit`)
    ///
    /// Returns the number of resources released.
    pub fn unlock_unit(&self, owner: &'static Driver, unit: u8) -> usize {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let held: Vec<Resource, N> = table
                .iter()
                .filter(|(_, lock)| lock.is(owner, unit))
                .map(|(resource, _)| *resource)
                .collect();
            for resource in &held {
                table.remove(resource);
            }
            held.len()
        })
    }

    /// Current holder of a resource
    pub fn owner_of(&self, resource: Resource) -> Option<DriverUnitLock> {
        self.table.lock(|table| table.borrow().get(&resource).copied())
    }

    /// Number of locked resources
    pub fn len(&self) -> usize {
        self.table.lock(|table| table.borrow().len())
    }

    /// Check if no resource is locked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
