//! Shared-bus SPI driver
//!
//! Up to [`NSPI_DEV`] logical devices share each of the [`NSPI`] physical
//! SPI units; a device is addressed by `(unit, device slot)` and
//! distinguished on the wire by its chip-select pin.
//!
//! # Lazy reconfiguration
//!
//! Speed and mode changes only update the in-memory device state and mark
//! it dirty. The controller is reprogrammed by [`Spi::select`], and only if
//! the device is dirty or another device's configuration is loaded. A burst
//! of transfers to one device pays for reconfiguration once.
//!
//! # Bracketing
//!
//! Transfers are methods of [`SpiSelection`], the guard returned by
//! [`Spi::select`]. Chip select is released when the guard is dropped or
//! [`SpiSelection::deselect`] is called. One selection may be open per
//! unit at a time; a second `select` fails with [`SPI_ERR_BUS_BUSY`].
//!
//! # Pin arbitration
//!
//! Pins are claimed through the shared [`LockManager`] before any register
//! write that routes them to the controller: [`Spi::init`] claims the pins
//! of device slot 0, and [`Spi::select`] claims the selected device's pins
//! before configuring the bus or driving chip select.

pub mod device;
pub mod interface;
pub mod signals;
pub mod transfer;

#[cfg(test)]
pub(crate) mod mock;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use keel_core::driver::exception_base;
use keel_core::{
    Driver, DriverError, DriverId, DriverMessage, DriverOps, LockManager, PinId, PlatformConfig,
    Resource,
};
use keel_hal::{HwError, Mode, SpiController};

use self::interface::{SelectError, SpiInterface, SpiResources};
use self::signals::SPI_SIGNALS;

pub use self::device::SpiDeviceAdapter;
pub use self::transfer::SpiSelection;

/// Number of SPI units
pub const NSPI: usize = 4;

/// Number of devices sharing one unit
pub const NSPI_DEV: usize = 4;

/// Most pins one unit can claim: four per device slot
pub const MAX_CLAIM: usize = 4 * NSPI_DEV;

/// Controller could not be brought up
pub const SPI_ERR_CANT_INIT: u32 = exception_base(DriverId::Spi);
/// Mode or word width out of range
pub const SPI_ERR_INVALID_MODE: u32 = exception_base(DriverId::Spi) | 1;
/// Unit index out of range
pub const SPI_ERR_INVALID_UNIT: u32 = exception_base(DriverId::Spi) | 2;
/// Device slot out of range
pub const SPI_ERR_INVALID_DEVICE: u32 = exception_base(DriverId::Spi) | 3;
/// Packed pin byte does not name a pin
pub const SPI_ERR_INVALID_PIN: u32 = exception_base(DriverId::Spi) | 4;
/// Controller never finished shifting
pub const SPI_ERR_TIMEOUT: u32 = exception_base(DriverId::Spi) | 5;
/// Another selection is open on the unit
pub const SPI_ERR_BUS_BUSY: u32 = exception_base(DriverId::Spi) | 6;
/// Unit used before `init`
pub const SPI_ERR_NOT_INIT: u32 = exception_base(DriverId::Spi) | 7;
/// Buffer shorter than the transfer, or too many pins in one claim
pub const SPI_ERR_BUFFER: u32 = exception_base(DriverId::Spi) | 8;

/// SPI error table, indexed by local code
pub const SPI_ERRORS: &[DriverMessage] = &[
    DriverMessage::new(SPI_ERR_CANT_INIT, "SPI_ERR_CANT_INIT", "can't init"),
    DriverMessage::new(SPI_ERR_INVALID_MODE, "SPI_ERR_INVALID_MODE", "invalid mode"),
    DriverMessage::new(SPI_ERR_INVALID_UNIT, "SPI_ERR_INVALID_UNIT", "invalid unit"),
    DriverMessage::new(SPI_ERR_INVALID_DEVICE, "SPI_ERR_INVALID_DEVICE", "invalid device"),
    DriverMessage::new(SPI_ERR_INVALID_PIN, "SPI_ERR_INVALID_PIN", "invalid pin"),
    DriverMessage::new(SPI_ERR_TIMEOUT, "SPI_ERR_TIMEOUT", "transfer timeout"),
    DriverMessage::new(SPI_ERR_BUS_BUSY, "SPI_ERR_BUS_BUSY", "bus is busy"),
    DriverMessage::new(SPI_ERR_NOT_INIT, "SPI_ERR_NOT_INIT", "unit is not initialized"),
    DriverMessage::new(SPI_ERR_BUFFER, "SPI_ERR_BUFFER", "buffer size out of range"),
];

/// SPI driver descriptor
pub static SPI_DRIVER: Driver = Driver::new("spi", DriverId::Spi, SPI_ERRORS);

/// Mode flags for [`Spi::set`], [`Spi::clr`] and [`Spi::clr_and_set`]
pub mod mode {
    /// Clock phase (CPHA)
    pub const CPHA: u32 = 1 << 0;
    /// Clock polarity (CPOL)
    pub const CPOL: u32 = 1 << 1;
    /// CPOL | CPHA, the conventional mode number
    pub const MODE_MASK: u32 = CPOL | CPHA;
    /// Shift least significant bit first
    pub const LSB_FIRST: u32 = 1 << 2;
    /// 16-bit words for `transfer`
    pub const WIDTH16: u32 = 1 << 3;
    /// 32-bit words for `transfer`
    pub const WIDTH32: u32 = 1 << 4;
}

/// A logical SPI device: unit and device slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiDev {
    /// Physical unit (0..NSPI)
    pub unit: u8,
    /// Device slot on the unit (0..NSPI_DEV)
    pub device: u8,
}

impl SpiDev {
    pub const fn new(unit: u8, device: u8) -> Self {
        Self { unit, device }
    }

    /// Device slot 0 of a unit
    pub const fn primary(unit: u8) -> Self {
        Self::new(unit, 0)
    }
}

fn setup_error(unit: u8, code: u32, msg: &'static str) -> DriverError {
    DriverError::setup(&SPI_DRIVER, Some(unit), code, msg)
}

fn operation_error(unit: u8, code: u32, msg: &'static str) -> DriverError {
    DriverError::operation(&SPI_DRIVER, Some(unit), code, msg)
}

fn select_error(unit: u8, err: SelectError) -> DriverError {
    match err {
        SelectError::NotInit => operation_error(unit, SPI_ERR_NOT_INIT, "unit is not initialized"),
        SelectError::Busy => operation_error(unit, SPI_ERR_BUS_BUSY, "bus is busy"),
    }
}

fn check_unit(unit: u8) -> Result<(), DriverError> {
    if (unit as usize) < NSPI {
        Ok(())
    } else {
        Err(setup_error(unit, SPI_ERR_INVALID_UNIT, "invalid unit"))
    }
}

fn check_dev(dev: SpiDev) -> Result<(), DriverError> {
    check_unit(dev.unit)?;
    if (dev.device as usize) < NSPI_DEV {
        Ok(())
    } else {
        Err(setup_error(dev.unit, SPI_ERR_INVALID_DEVICE, "invalid device"))
    }
}

type Shared<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

/// SPI driver over a chip-specific controller
pub struct Spi<'a, C> {
    locks: &'a LockManager,
    config: PlatformConfig,
    units: [Shared<SpiInterface>; NSPI],
    controller: Shared<C>,
}

impl<'a, C: SpiController> Spi<'a, C> {
    /// Create the driver; no hardware is touched until [`init`](Self::init)
    pub fn new(controller: C, locks: &'a LockManager, config: PlatformConfig) -> Self {
        let units = core::array::from_fn(|unit| {
            Mutex::new(RefCell::new(SpiInterface::new(
                config.apb_khz,
                config.spi_default_khz,
                SPI_SIGNALS[unit].native_resources(),
            )))
        });
        Self {
            locks,
            config,
            units,
            controller: Mutex::new(RefCell::new(controller)),
        }
    }

    fn with_unit<R>(&self, unit: u8, f: impl FnOnce(&mut SpiInterface) -> R) -> R {
        self.units[unit as usize].lock(|iface| f(&mut iface.borrow_mut()))
    }

    fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        self.controller.lock(|c| f(&mut c.borrow_mut()))
    }

    /// Platform configuration in use
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Bring up a physical unit
    ///
    /// Out-of-range units fail with [`SPI_ERR_INVALID_UNIT`] before any
    /// hardware access. The pins of device slot 0 are claimed before the
    /// controller is touched; if the controller then fails they stay
    /// claimed until [`unlock_resources`](Self::unlock_resources). Calling
    /// `init` on a unit that is already up is a no-op.
    pub fn init(&self, unit: u8) -> Result<(), DriverError> {
        check_unit(unit)?;
        // The unit stays locked for the whole bring-up so it runs once
        self.with_unit(unit, |iface| {
            if iface.is_initialized() {
                return Ok(());
            }
            if self.config.is_spi_reserved(unit) {
                warn!("spi: unit {} is reserved by the platform", unit);
            }

            let pins: Vec<PinId, 4> = iface.device(0).res.iter().collect();
            self.claim_pins(unit, &pins)?;

            self.with_controller(|c| c.init(unit)).map_err(|err| {
                error!("spi: unit {} bring-up failed: {}", unit, err);
                match err {
                    HwError::Reserved => {
                        setup_error(unit, SPI_ERR_CANT_INIT, "unit is reserved")
                    }
                    HwError::ClockGate | HwError::NoResponse => {
                        setup_error(unit, SPI_ERR_CANT_INIT, "can't init")
                    }
                }
            })?;

            iface.set_initialized();
            info!("spi: {} initialized", SPI_SIGNALS[unit as usize].name);
            Ok(())
        })
    }

    /// Set the chip-select pin of a device from its packed `0xPN` byte
    ///
    /// Only the in-memory assignment changes; the pin is claimed at the
    /// next [`select`](Self::select) or
    /// [`lock_resources`](Self::lock_resources).
    pub fn set_cspin(&self, dev: SpiDev, pin: u8) -> Result<(), DriverError> {
        check_dev(dev)?;
        let cs = PinId::from_raw(pin)
            .ok_or_else(|| setup_error(dev.unit, SPI_ERR_INVALID_PIN, "invalid pin"))?;
        self.with_unit(dev.unit, |iface| iface.set_cs(dev.device, cs));
        Ok(())
    }

    /// Set the clock in kHz; applied at next select
    pub fn set_speed(&self, dev: SpiDev, sck_khz: u32) -> Result<(), DriverError> {
        check_dev(dev)?;
        self.with_unit(dev.unit, |iface| iface.set_speed(dev.device, sck_khz));
        Ok(())
    }

    /// Requested clock in kHz
    pub fn get_speed(&self, dev: SpiDev) -> Result<u32, DriverError> {
        check_dev(dev)?;
        Ok(self.with_unit(dev.unit, |iface| iface.device(dev.device).speed))
    }

    /// Set the SPI mode (0-3); applied at next select
    pub fn set_mode(&self, dev: SpiDev, spi_mode: u8) -> Result<(), DriverError> {
        check_dev(dev)?;
        let spi_mode = Mode::from_u8(spi_mode)
            .ok_or_else(|| setup_error(dev.unit, SPI_ERR_INVALID_MODE, "invalid mode"))?;
        self.clr_and_set(dev, mode::MODE_MASK, spi_mode.as_u8() as u32)
    }

    /// Set mode flags; applied at next select
    pub fn set(&self, dev: SpiDev, bits: u32) -> Result<(), DriverError> {
        self.clr_and_set(dev, 0, bits)
    }

    /// Clear mode flags; applied at next select
    pub fn clr(&self, dev: SpiDev, bits: u32) -> Result<(), DriverError> {
        self.clr_and_set(dev, bits, 0)
    }

    /// Clear then set mode flags; applied at next select
    pub fn clr_and_set(&self, dev: SpiDev, clr: u32, set: u32) -> Result<(), DriverError> {
        check_dev(dev)?;
        self.with_unit(dev.unit, |iface| iface.clr_and_set(dev.device, clr, set));
        Ok(())
    }

    /// Current mode flags
    pub fn get_mode(&self, dev: SpiDev) -> Result<u32, DriverError> {
        check_dev(dev)?;
        Ok(self.with_unit(dev.unit, |iface| iface.device(dev.device).mode))
    }

    /// Force reconfiguration at next select
    pub fn set_dirty(&self, dev: SpiDev) -> Result<(), DriverError> {
        check_dev(dev)?;
        self.with_unit(dev.unit, |iface| iface.set_dirty(dev.device));
        Ok(())
    }

    /// Pins assigned to a device
    pub fn pins(&self, dev: SpiDev) -> Result<SpiResources, DriverError> {
        check_dev(dev)?;
        Ok(self.with_unit(dev.unit, |iface| iface.device(dev.device).res))
    }

    /// Assign all four pins of a device
    ///
    /// Configuration only, like [`set_cspin`](Self::set_cspin).
    pub fn pin_config(&self, dev: SpiDev, res: SpiResources) -> Result<(), DriverError> {
        check_dev(dev)?;
        self.with_unit(dev.unit, |iface| iface.set_resources(dev.device, res));
        Ok(())
    }

    /// Chip-select pin of a device
    pub fn cs_gpio(&self, dev: SpiDev) -> Result<Option<PinId>, DriverError> {
        Ok(self.pins(dev)?.cs)
    }

    /// Raw controller status of a unit
    pub fn status(&self, unit: u8) -> Result<u32, DriverError> {
        check_unit(unit)?;
        Ok(self.controller.lock(|c| c.borrow().status(unit)))
    }

    /// Name of a unit's bus
    pub fn name(&self, unit: u8) -> Result<&'static str, DriverError> {
        check_unit(unit)?;
        Ok(SPI_SIGNALS[unit as usize].name)
    }

    /// Claim every pin assigned to a device for its unit
    ///
    /// All pins are claimed or none are. Devices on the same unit share
    /// ownership, so their common data and clock pins do not conflict.
    pub fn lock_resources(&self, dev: SpiDev) -> Result<(), DriverError> {
        let res = self.pins(dev)?;
        let pins: Vec<PinId, 4> = res.iter().collect();
        self.claim_pins(dev.unit, &pins)
    }

    /// Claim `pins` for `unit`, all or none
    fn claim_pins(&self, unit: u8, pins: &[PinId]) -> Result<(), DriverError> {
        if pins.len() > MAX_CLAIM {
            return Err(setup_error(unit, SPI_ERR_BUFFER, "too many pins"));
        }
        let resources: Vec<Resource, MAX_CLAIM> = pins.iter().copied().map(Resource::pin).collect();
        self.locks
            .lock_all(&SPI_DRIVER, unit, &resources)
            .map_err(|conflict| DriverError::lock(&SPI_DRIVER, conflict))
    }

    /// Release every pin claimed by a unit
    pub fn unlock_resources(&self, unit: u8) -> Result<usize, DriverError> {
        check_unit(unit)?;
        Ok(self.locks.unlock_unit(&SPI_DRIVER, unit))
    }

    /// Open a selection: claim the device's pins, reconfigure if needed,
    /// then assert chip select
    ///
    /// Fails with [`SPI_ERR_NOT_INIT`] before [`init`](Self::init), with
    /// [`SPI_ERR_BUS_BUSY`] while another selection is open on the unit, and
    /// with a LOCK error if another driver or unit holds one of the pins.
    /// Nothing is written to the controller on failure.
    pub fn select(&self, dev: SpiDev) -> Result<SpiSelection<'_, 'a, C>, DriverError> {
        check_dev(dev)?;
        let plan = self.with_unit(dev.unit, |iface| {
            iface.can_select().map_err(|err| select_error(dev.unit, err))?;
            let pins: Vec<PinId, 4> = iface.device(dev.device).res.iter().collect();
            self.claim_pins(dev.unit, &pins)?;
            iface
                .begin_select(dev.device)
                .map_err(|err| select_error(dev.unit, err))
        })?;

        self.with_controller(|c| {
            if let Some(bus) = plan.push {
                debug!(
                    "spi: unit {} device {} divisor {} mode {}",
                    dev.unit,
                    dev.device,
                    bus.divisor,
                    bus.mode
                );
                c.configure(dev.unit, &bus);
            }
            if let Some(cs) = plan.cs {
                c.set_cs(dev.unit, cs.raw(), true);
            }
        });

        Ok(SpiSelection::new(self, dev, plan.cs, plan.bits))
    }

    /// Deassert chip select and close the unit's selection
    fn end_select(&self, dev: SpiDev, cs: Option<PinId>) {
        if let Some(cs) = cs {
            self.with_controller(|c| c.set_cs(dev.unit, cs.raw(), false));
        }
        self.with_unit(dev.unit, |iface| iface.end_select());
    }

    /// Shift one word, polling for completion at most `spi_timeout_polls`
    /// times
    ///
    /// The controller is locked per register access, never across the poll
    /// loop, so other units keep running while this one shifts.
    fn shift(&self, unit: u8, word: u32, bits: u8) -> Result<u32, DriverError> {
        let mask = word_mask(bits);
        self.with_controller(|c| c.start(unit, word & mask, bits));

        let mut remaining = self.config.spi_timeout_polls;
        while self.with_controller(|c| c.is_busy(unit)) {
            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                warn!("spi: unit {} transfer timed out", unit);
                return Err(operation_error(unit, SPI_ERR_TIMEOUT, "transfer timeout"));
            }
            core::hint::spin_loop();
        }
        Ok(self.with_controller(|c| c.read(unit)) & mask)
    }
}

/// Mask of the low `bits` bits of a word
pub(crate) fn word_mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

impl<C: SpiController> DriverOps for Spi<'_, C> {
    fn driver(&self) -> &'static Driver {
        &SPI_DRIVER
    }

    fn init(&self) -> Result<(), DriverError> {
        self.config.validate().map_err(|_| {
            DriverError::setup(
                &SPI_DRIVER,
                None,
                SPI_ERR_CANT_INIT,
                "invalid platform configuration",
            )
        })
    }

    fn lock_resources(&self, unit: u8, pins: &[PinId]) -> Result<(), DriverError> {
        check_unit(unit)?;
        self.claim_pins(unit, pins)
    }
}
