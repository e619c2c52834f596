//! SPI controller abstractions
//!
//! Provides the register-level operations a chip-specific HAL must offer
//! for the shared-bus SPI driver. Everything above a single shifted word
//! (chip-select bracketing, bulk transfers, lazy reconfiguration) lives in
//! the driver, not here.

/// Errors reported by controller bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwError {
    /// Peripheral clock could not be enabled
    ClockGate,
    /// Controller is owned by the platform (flash cache, boot ROM)
    Reserved,
    /// Controller did not come out of reset
    NoResponse,
}

/// SPI controller (master mode)
///
/// One implementation drives every physical unit; calls are addressed by
/// unit index. The shift engine is started with [`start`](Self::start),
/// polled with [`is_busy`](Self::is_busy) and drained with
/// [`read`](Self::read), so that the caller owns the timeout policy.
pub trait SpiController {
    /// Bring a physical unit out of reset and into master mode
    fn init(&mut self, unit: u8) -> Result<(), HwError>;

    /// Apply clock divisor and frame format to a unit
    fn configure(&mut self, unit: u8, config: &BusConfig);

    /// Start shifting `bits` bits of `word` out, in the controller's
    /// native shift order
    ///
    /// The controller clocks in the same number of bits at the same time.
    fn start(&mut self, unit: u8, word: u32, bits: u8);

    /// Check if the shift started by [`start`](Self::start) is still running
    fn is_busy(&mut self, unit: u8) -> bool;

    /// Word clocked in by the last completed shift
    fn read(&mut self, unit: u8) -> u32;

    /// Drive a chip-select line
    ///
    /// `pin` is the packed pin identifier; `asserted` means the device is
    /// selected (line low for active-low devices).
    fn set_cs(&mut self, unit: u8, pin: u8, asserted: bool);

    /// Raw status register of a unit
    fn status(&self, unit: u8) -> u32;
}

/// Bus configuration pushed to a controller at select time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// APB clock divisor (1 = APB clock)
    pub divisor: u32,
    /// Clock polarity and phase
    pub mode: Mode,
    /// Shift least significant bit first
    pub lsb_first: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            divisor: 80, // 1 MHz from an 80 MHz APB
            mode: Mode::Mode0,
            lsb_first: false,
        }
    }
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl Mode {
    /// Mode from its conventional number (0-3)
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Mode::Mode0),
            1 => Some(Mode::Mode1),
            2 => Some(Mode::Mode2),
            3 => Some(Mode::Mode3),
            _ => None,
        }
    }

    /// Conventional mode number (CPOL << 1 | CPHA)
    pub fn as_u8(self) -> u8 {
        match self {
            Mode::Mode0 => 0,
            Mode::Mode1 => 1,
            Mode::Mode2 => 2,
            Mode::Mode3 => 3,
        }
    }
}
