//! Packed pin identifiers
//!
//! A physical pin is named by one byte, `0xPN`: the high nibble is the port
//! index `1..=0xA` (ports A..K, there is no port I) and the low nibble is the
//! pin number `0..=0xF`. The encoding is shared with board configuration
//! files, so it must stay bit-exact.

use core::fmt;

/// Number of ports addressable by the encoding
pub const NUM_PORTS: u8 = 10;

/// Pins per port
pub const PINS_PER_PORT: u8 = 16;

/// Port letters, indexed by `port - 1`
const PORT_LETTERS: [char; NUM_PORTS as usize] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K'];

/// A physical pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PinId(u8);

impl PinId {
    /// Create a pin from a port index (1 = A .. 10 = K) and pin number
    pub const fn new(port: u8, pin: u8) -> Option<Self> {
        if port == 0 || port > NUM_PORTS || pin >= PINS_PER_PORT {
            return None;
        }
        Some(Self((port << 4) | pin))
    }

    /// Decode a packed `0xPN` byte
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Self::new(raw >> 4, raw & 0x0F)
    }

    /// Map a flat GPIO number onto the port/pin encoding
    ///
    /// GPIO 0..15 land on port A, 16..31 on port B, and so on.
    pub const fn from_gpio(gpio: u8) -> Option<Self> {
        Self::new(gpio / PINS_PER_PORT + 1, gpio % PINS_PER_PORT)
    }

    /// The packed byte
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Port index (1 = A)
    pub const fn port(self) -> u8 {
        self.0 >> 4
    }

    /// Pin number within the port
    pub const fn number(self) -> u8 {
        self.0 & 0x0F
    }

    /// Flat GPIO number
    pub const fn gpio(self) -> u8 {
        (self.port() - 1) * PINS_PER_PORT + self.number()
    }

    /// Port letter (A..K)
    pub fn port_letter(self) -> char {
        PORT_LETTERS[(self.port() - 1) as usize]
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}{}", self.port_letter(), self.number())
    }
}
