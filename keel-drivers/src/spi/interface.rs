//! SPI interface state
//!
//! In-memory configuration of one physical SPI unit and the devices
//! sharing it. Nothing here touches hardware: configuration changes only
//! mark a device dirty, and [`SpiInterface::begin_select`] decides whether
//! the controller must be reprogrammed before the next transfer.

use keel_core::PinId;
use keel_hal::{BusConfig, Mode};

use super::{mode, NSPI_DEV};

/// Largest APB clock divisor the controller supports (13-bit prescaler
/// times 6-bit counter)
pub const MAX_DIVISOR: u32 = 8192 * 64;

/// Pins used by one SPI device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiResources {
    /// Data in (MISO)
    pub sdi: Option<PinId>,
    /// Data out (MOSI)
    pub sdo: Option<PinId>,
    /// Clock
    pub sck: Option<PinId>,
    /// Chip select
    pub cs: Option<PinId>,
}

impl SpiResources {
    /// Assigned pins, chip select first
    pub fn iter(&self) -> impl Iterator<Item = PinId> {
        [self.cs, self.sck, self.sdo, self.sdi].into_iter().flatten()
    }
}

/// Clock divisor for a requested SPI clock
///
/// Rounds up so the bus never runs faster than requested. A zero request
/// selects the slowest clock.
pub fn divisor_for(apb_khz: u32, sck_khz: u32) -> u32 {
    if sck_khz == 0 {
        return MAX_DIVISOR;
    }
    apb_khz.div_ceil(sck_khz).clamp(1, MAX_DIVISOR)
}

/// Bits per word selected by mode flags
pub fn word_bits(mode_bits: u32) -> u8 {
    if mode_bits & mode::WIDTH32 != 0 {
        32
    } else if mode_bits & mode::WIDTH16 != 0 {
        16
    } else {
        8
    }
}

/// Configuration of one device slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceState {
    /// Requested clock in kHz
    pub speed: u32,
    /// APB clock divisor derived from `speed`
    pub divisor: u32,
    /// Mode flags (see [`mode`])
    pub mode: u32,
    /// Configuration must be pushed at next select
    pub dirty: bool,
    /// Pins used by the device
    pub res: SpiResources,
}

impl DeviceState {
    fn new(apb_khz: u32, speed: u32) -> Self {
        Self {
            speed,
            divisor: divisor_for(apb_khz, speed),
            mode: 0,
            dirty: true,
            res: SpiResources::default(),
        }
    }

    /// Bus configuration the controller needs for this device
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            divisor: self.divisor,
            mode: Mode::from_u8((self.mode & mode::MODE_MASK) as u8).unwrap_or(Mode::Mode0),
            lsb_first: self.mode & mode::LSB_FIRST != 0,
        }
    }
}

/// What [`SpiInterface::begin_select`] decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectPlan {
    /// Configuration to push before asserting chip select
    pub push: Option<BusConfig>,
    /// Chip-select line to assert
    pub cs: Option<PinId>,
    /// Bits per word for `transfer`
    pub bits: u8,
}

/// Reasons a selection cannot start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// Unit was never initialized
    NotInit,
    /// Another selection is open on the unit
    Busy,
}

/// State of one physical SPI unit
#[derive(Debug, Clone)]
pub struct SpiInterface {
    apb_khz: u32,
    devices: [DeviceState; NSPI_DEV],
    /// Device slot whose configuration is live on the controller
    applied: Option<u8>,
    initialized: bool,
    selected: bool,
}

impl SpiInterface {
    /// Fresh interface: every device at `speed`, mode 0, dirty
    pub fn new(apb_khz: u32, speed: u32, native: SpiResources) -> Self {
        let mut devices = [DeviceState::new(apb_khz, speed); NSPI_DEV];
        for dev in devices.iter_mut() {
            dev.res = SpiResources { cs: None, ..native };
        }
        // Only the first device gets the hardware CS0 line
        devices[0].res.cs = native.cs;
        Self {
            apb_khz,
            devices,
            applied: None,
            initialized: false,
            selected: false,
        }
    }

    /// Device slot state
    ///
    /// Callers validate `device < NSPI_DEV`.
    pub fn device(&self, device: u8) -> &DeviceState {
        &self.devices[device as usize]
    }

    fn device_mut(&mut self, device: u8) -> &mut DeviceState {
        &mut self.devices[device as usize]
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Set the clock; takes effect at next select
    pub fn set_speed(&mut self, device: u8, sck_khz: u32) {
        let apb_khz = self.apb_khz;
        let dev = self.device_mut(device);
        dev.speed = sck_khz;
        dev.divisor = divisor_for(apb_khz, sck_khz);
        dev.dirty = true;
    }

    /// Clear then set mode flags; takes effect at next select
    pub fn clr_and_set(&mut self, device: u8, clr: u32, set: u32) {
        let dev = self.device_mut(device);
        dev.mode = (dev.mode & !clr) | set;
        dev.dirty = true;
    }

    pub fn set_dirty(&mut self, device: u8) {
        self.device_mut(device).dirty = true;
    }

    pub fn set_resources(&mut self, device: u8, res: SpiResources) {
        self.device_mut(device).res = res;
    }

    pub fn set_cs(&mut self, device: u8, cs: PinId) {
        self.device_mut(device).res.cs = Some(cs);
    }

    /// Whether a selection could be opened now
    pub fn can_select(&self) -> Result<(), SelectError> {
        if !self.initialized {
            Err(SelectError::NotInit)
        } else if self.selected {
            Err(SelectError::Busy)
        } else {
            Ok(())
        }
    }

    /// Open a selection of `device`
    ///
    /// The controller needs reprogramming if the device is dirty or if the
    /// configuration on the controller belongs to another device slot.
    /// Either way the device is clean afterwards.
    pub fn begin_select(&mut self, device: u8) -> Result<SelectPlan, SelectError> {
        self.can_select()?;
        self.selected = true;

        let stale = self.applied != Some(device);
        let dev = self.device_mut(device);
        let push = (dev.dirty || stale).then(|| dev.bus_config());
        dev.dirty = false;
        let plan = SelectPlan {
            push,
            cs: dev.res.cs,
            bits: word_bits(dev.mode),
        };
        self.applied = Some(device);
        Ok(plan)
    }

    /// Close the open selection
    pub fn end_select(&mut self) {
        self.selected = false;
    }
}
