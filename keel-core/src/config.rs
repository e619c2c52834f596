//! Platform configuration
//!
//! Board-level constants the drivers need at runtime. Stored as postcard
//! binary data when the `serde` feature is enabled.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration validation and storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// APB clock is zero
    ZeroClock,
    /// Default SPI speed is zero
    ZeroSpeed,
    /// Transfer timeout is zero polls
    ZeroTimeout,
    /// Stored blob could not be decoded
    Decode,
    /// Buffer too small to encode into
    Encode,
}

/// Runtime platform constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlatformConfig {
    /// APB (peripheral bus) clock in kHz
    pub apb_khz: u32,
    /// SPI clock used until a device sets its own, in kHz
    pub spi_default_khz: u32,
    /// Busy-flag polls before a transfer is declared timed out
    pub spi_timeout_polls: u32,
    /// Word clocked out by bulk reads
    pub spi_fill: u32,
    /// Bit mask of SPI units owned by the platform (bit n = unit n)
    pub spi_reserved_units: u8,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            apb_khz: 80_000,
            spi_default_khz: 1_000,
            spi_timeout_polls: 100_000,
            spi_fill: 0xFFFF_FFFF,
            // SPI0 is the flash cache controller, SPI1 the flash master
            spi_reserved_units: 0b0011,
        }
    }
}

impl PlatformConfig {
    /// Check if an SPI unit is reserved by the platform
    pub fn is_spi_reserved(&self, unit: u8) -> bool {
        unit < 8 && self.spi_reserved_units & (1 << unit) != 0
    }

    /// Reject values the drivers cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.apb_khz == 0 {
            return Err(ConfigError::ZeroClock);
        }
        if self.spi_default_khz == 0 {
            return Err(ConfigError::ZeroSpeed);
        }
        if self.spi_timeout_polls == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Decode and validate a stored configuration blob
    #[cfg(feature = "serde")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into `buf`, returning the used part
    #[cfg(feature = "serde")]
    pub fn to_bytes<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Encode)
    }
}
