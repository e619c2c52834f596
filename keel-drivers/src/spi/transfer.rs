//! Transfers on an open selection
//!
//! Every shift polls the controller's busy flag a bounded number of times,
//! so a wedged controller surfaces as [`SPI_ERR_TIMEOUT`] instead of a hang.
//!
//! [`SPI_ERR_TIMEOUT`]: super::SPI_ERR_TIMEOUT

use core::fmt;

use keel_core::{DriverError, PinId};
use keel_hal::SpiController;

use super::{operation_error, Spi, SpiDev, SPI_ERR_BUFFER, SPI_ERR_INVALID_MODE};

/// Word sizes usable in bulk transfers
trait Word: Copy {
    const BITS: u8;

    fn to_word(self) -> u32;
    fn from_word(word: u32) -> Self;
    fn swapped(self) -> Self;
}

impl Word for u8 {
    const BITS: u8 = 8;

    fn to_word(self) -> u32 {
        self as u32
    }

    fn from_word(word: u32) -> Self {
        word as u8
    }

    fn swapped(self) -> Self {
        self
    }
}

impl Word for u16 {
    const BITS: u8 = 16;

    fn to_word(self) -> u32 {
        self as u32
    }

    fn from_word(word: u32) -> Self {
        word as u16
    }

    fn swapped(self) -> Self {
        self.swap_bytes()
    }
}

impl Word for u32 {
    const BITS: u8 = 32;

    fn to_word(self) -> u32 {
        self
    }

    fn from_word(word: u32) -> Self {
        word
    }

    fn swapped(self) -> Self {
        self.swap_bytes()
    }
}

/// An open selection of one SPI device
///
/// Chip select stays asserted while this value lives. Dropping it, or
/// calling [`deselect`](Self::deselect), deasserts chip select and frees the
/// unit for the next selection.
pub struct SpiSelection<'s, 'a, C: SpiController> {
    spi: &'s Spi<'a, C>,
    dev: SpiDev,
    cs: Option<PinId>,
    bits: u8,
}

impl<C: SpiController> fmt::Debug for SpiSelection<'_, '_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiSelection")
            .field("dev", &self.dev)
            .field("cs", &self.cs)
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl<'s, 'a, C: SpiController> SpiSelection<'s, 'a, C> {
    pub(super) fn new(spi: &'s Spi<'a, C>, dev: SpiDev, cs: Option<PinId>, bits: u8) -> Self {
        Self { spi, dev, cs, bits }
    }

    /// Selected device
    pub fn dev(&self) -> SpiDev {
        self.dev
    }

    /// Width of [`transfer`](Self::transfer) words, from the mode flags
    pub fn word_bits(&self) -> u8 {
        self.bits
    }

    /// Deassert chip select and release the unit
    pub fn deselect(self) {}

    fn shift(&mut self, word: u32, bits: u8) -> Result<u32, DriverError> {
        self.spi.shift(self.dev.unit, word, bits)
    }

    /// Shift one word of the configured width, returning the word read back
    pub fn transfer(&mut self, word: u32) -> Result<u32, DriverError> {
        self.shift(word, self.bits)
    }

    fn write_words<W: Word>(&mut self, words: &[W], swap: bool) -> Result<(), DriverError> {
        for &word in words {
            let word = if swap { word.swapped() } else { word };
            self.shift(word.to_word(), W::BITS)?;
        }
        Ok(())
    }

    fn read_words<W: Word>(&mut self, words: &mut [W], swap: bool) -> Result<(), DriverError> {
        let fill = self.spi.config.spi_fill;
        for slot in words.iter_mut() {
            let word = W::from_word(self.shift(fill, W::BITS)?);
            *slot = if swap { word.swapped() } else { word };
        }
        Ok(())
    }

    fn rw_words<W: Word>(&mut self, words: &mut [W], swap: bool) -> Result<(), DriverError> {
        for slot in words.iter_mut() {
            let out = if swap { slot.swapped() } else { *slot };
            let word = W::from_word(self.shift(out.to_word(), W::BITS)?);
            *slot = if swap { word.swapped() } else { word };
        }
        Ok(())
    }

    pub fn bulk_write8(&mut self, words: &[u8]) -> Result<(), DriverError> {
        self.write_words(words, false)
    }

    pub fn bulk_write16(&mut self, words: &[u16]) -> Result<(), DriverError> {
        self.write_words(words, false)
    }

    pub fn bulk_write32(&mut self, words: &[u32]) -> Result<(), DriverError> {
        self.write_words(words, false)
    }

    /// Same wire bytes as [`bulk_write8`](Self::bulk_write8)
    pub fn bulk_write8_be(&mut self, words: &[u8]) -> Result<(), DriverError> {
        self.write_words(words, true)
    }

    /// Write 16-bit words with their bytes swapped
    pub fn bulk_write16_be(&mut self, words: &[u16]) -> Result<(), DriverError> {
        self.write_words(words, true)
    }

    /// Write 32-bit words with their bytes swapped
    pub fn bulk_write32_be(&mut self, words: &[u32]) -> Result<(), DriverError> {
        self.write_words(words, true)
    }

    /// Read bytes, clocking out the fill word
    pub fn bulk_read8(&mut self, words: &mut [u8]) -> Result<(), DriverError> {
        self.read_words(words, false)
    }

    pub fn bulk_read16(&mut self, words: &mut [u16]) -> Result<(), DriverError> {
        self.read_words(words, false)
    }

    pub fn bulk_read32(&mut self, words: &mut [u32]) -> Result<(), DriverError> {
        self.read_words(words, false)
    }

    pub fn bulk_read8_be(&mut self, words: &mut [u8]) -> Result<(), DriverError> {
        self.read_words(words, true)
    }

    pub fn bulk_read16_be(&mut self, words: &mut [u16]) -> Result<(), DriverError> {
        self.read_words(words, true)
    }

    pub fn bulk_read32_be(&mut self, words: &mut [u32]) -> Result<(), DriverError> {
        self.read_words(words, true)
    }

    /// Exchange bytes in place
    pub fn bulk_rw8(&mut self, words: &mut [u8]) -> Result<(), DriverError> {
        self.rw_words(words, false)
    }

    pub fn bulk_rw16(&mut self, words: &mut [u16]) -> Result<(), DriverError> {
        self.rw_words(words, false)
    }

    pub fn bulk_rw32(&mut self, words: &mut [u32]) -> Result<(), DriverError> {
        self.rw_words(words, false)
    }

    pub fn bulk_rw8_be(&mut self, words: &mut [u8]) -> Result<(), DriverError> {
        self.rw_words(words, true)
    }

    pub fn bulk_rw16_be(&mut self, words: &mut [u16]) -> Result<(), DriverError> {
        self.rw_words(words, true)
    }

    pub fn bulk_rw32_be(&mut self, words: &mut [u32]) -> Result<(), DriverError> {
        self.rw_words(words, true)
    }

    /// Exchange bytes between two buffers of possibly different length
    ///
    /// Runs for the longer buffer: the fill word is sent past the end of
    /// `write`, and bytes past the end of `read` are discarded.
    pub fn bulk_transfer8(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), DriverError> {
        let fill = self.spi.config.spi_fill;
        for i in 0..read.len().max(write.len()) {
            let out = write.get(i).map(|b| *b as u32).unwrap_or(fill);
            let word = self.shift(out, 8)?;
            if let Some(slot) = read.get_mut(i) {
                *slot = word as u8;
            }
        }
        Ok(())
    }

    /// Shift `len` words of `word_bits` bits (1 to 32)
    ///
    /// Each word occupies `ceil(word_bits / 8)` little-endian bytes in `out`
    /// and `inp`. Without `out` the fill word is sent; without `inp` the
    /// words read back are discarded. Bits above `word_bits` are ignored on
    /// the way out and cleared on the way in.
    pub fn master_op(
        &mut self,
        word_bits: u8,
        len: usize,
        out: Option<&[u8]>,
        mut inp: Option<&mut [u8]>,
    ) -> Result<(), DriverError> {
        let unit = self.dev.unit;
        if !(1..=32).contains(&word_bits) {
            return Err(operation_error(unit, SPI_ERR_INVALID_MODE, "invalid word width"));
        }

        let stride = (word_bits as usize).div_ceil(8);
        let needed = len.checked_mul(stride).unwrap_or(usize::MAX);
        let short = |buf: Option<usize>| buf.is_some_and(|n| n < needed);
        if short(out.map(<[u8]>::len)) || short(inp.as_deref().map(<[u8]>::len)) {
            return Err(operation_error(unit, SPI_ERR_BUFFER, "buffer too short"));
        }

        let fill = self.spi.config.spi_fill;
        for i in 0..len {
            let span = i * stride..(i + 1) * stride;
            let word = match out {
                Some(out) => out[span.clone()]
                    .iter()
                    .rev()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32),
                None => fill,
            };
            let word = self.shift(word, word_bits)?;
            if let Some(inp) = inp.as_deref_mut() {
                for (k, slot) in inp[span].iter_mut().enumerate() {
                    *slot = (word >> (8 * k)) as u8;
                }
            }
        }
        Ok(())
    }
}

impl<C: SpiController> Drop for SpiSelection<'_, '_, C> {
    fn drop(&mut self) {
        self.spi.end_select(self.dev, self.cs);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::super::mock::Loopback;
    use super::super::{mode, SPI_ERR_BUS_BUSY, SPI_ERR_TIMEOUT};
    use super::*;
    use keel_core::{ErrorCategory, LockManager, PlatformConfig};
    use proptest::prelude::*;
    use std::vec;
    use std::vec::Vec;

    const DEV: SpiDev = SpiDev::primary(2);

    fn ready(locks: &LockManager, hw: Loopback) -> Spi<'_, Loopback> {
        let spi = Spi::new(hw, locks, PlatformConfig::default());
        spi.init(DEV.unit).unwrap();
        spi
    }

    fn sent(spi: &Spi<'_, Loopback>) -> Vec<(u32, u8)> {
        spi.with_controller(|c| c.sent.clone())
    }

    #[test]
    fn test_transfer_width_follows_mode() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());

        let mut sel = spi.select(DEV).unwrap();
        assert_eq!(sel.word_bits(), 8);
        // High bits do not reach the wire
        assert_eq!(sel.transfer(0x1A5), Ok(0xA5));
        sel.deselect();

        spi.set(DEV, mode::WIDTH16).unwrap();
        let mut sel = spi.select(DEV).unwrap();
        assert_eq!(sel.transfer(0xBEEF), Ok(0xBEEF));
        drop(sel);

        spi.clr_and_set(DEV, mode::WIDTH16, mode::WIDTH32).unwrap();
        let mut sel = spi.select(DEV).unwrap();
        assert_eq!(sel.transfer(0xDEAD_BEEF), Ok(0xDEAD_BEEF));
        drop(sel);

        assert_eq!(sent(&spi), vec![(0xA5, 8), (0xBEEF, 16), (0xDEAD_BEEF, 32)]);
    }

    #[test]
    fn test_read_sends_fill_word() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let mut sel = spi.select(DEV).unwrap();

        let mut bytes = [0u8; 3];
        sel.bulk_read8(&mut bytes).unwrap();
        assert_eq!(bytes, [0xFF; 3]);

        let mut halves = [0u16; 2];
        sel.bulk_read16(&mut halves).unwrap();
        assert_eq!(halves, [0xFFFF; 2]);
        drop(sel);

        let words = spi.with_controller(|c| c.words());
        assert_eq!(words, vec![0xFF, 0xFF, 0xFF, 0xFFFF, 0xFFFF]);
    }

    #[test]
    fn test_reads_use_configured_fill() {
        let locks = LockManager::new();
        let config = PlatformConfig {
            spi_fill: 0x1122_3344,
            ..PlatformConfig::default()
        };
        let spi = Spi::new(Loopback::new(), &locks, config);
        spi.init(DEV.unit).unwrap();
        let mut sel = spi.select(DEV).unwrap();

        let mut bytes = [0u8; 1];
        sel.bulk_read8_be(&mut bytes).unwrap();
        assert_eq!(bytes, [0x44]);

        let mut halves = [0u16; 1];
        sel.bulk_read16(&mut halves).unwrap();
        assert_eq!(halves, [0x3344]);
        sel.bulk_read16_be(&mut halves).unwrap();
        assert_eq!(halves, [0x4433]);

        let mut words = [0u32; 1];
        sel.bulk_read32(&mut words).unwrap();
        assert_eq!(words, [0x1122_3344]);
        sel.bulk_read32_be(&mut words).unwrap();
        assert_eq!(words, [0x4433_2211]);
        drop(sel);

        // The fill goes out unswapped, cut to the word width
        assert_eq!(
            sent(&spi),
            vec![
                (0x44, 8),
                (0x3344, 16),
                (0x3344, 16),
                (0x1122_3344, 32),
                (0x1122_3344, 32)
            ]
        );
    }

    #[test]
    fn test_big_endian_swaps_on_the_wire() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let mut sel = spi.select(DEV).unwrap();

        sel.bulk_write16_be(&[0x1234]).unwrap();
        sel.bulk_write32_be(&[0x1122_3344]).unwrap();
        sel.bulk_write16(&[0x1234]).unwrap();
        sel.bulk_write8_be(&[0x12]).unwrap();
        drop(sel);

        assert_eq!(
            sent(&spi),
            vec![(0x3412, 16), (0x4433_2211, 32), (0x1234, 16), (0x12, 8)]
        );
    }

    #[test]
    fn test_bulk_transfer8_uneven_buffers() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let mut sel = spi.select(DEV).unwrap();

        let mut read = [0u8; 4];
        sel.bulk_transfer8(&mut read, &[1, 2]).unwrap();
        assert_eq!(read, [1, 2, 0xFF, 0xFF]);

        let mut read = [0u8; 1];
        sel.bulk_transfer8(&mut read, &[7, 8, 9]).unwrap();
        assert_eq!(read, [7]);
    }

    #[test]
    fn test_master_op_packs_little_endian() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let mut sel = spi.select(DEV).unwrap();

        // 12-bit words in 2 bytes each; the top nibble of the second is junk
        let out = [0x34, 0x02, 0xCD, 0xFB];
        let mut inp = [0u8; 4];
        sel.master_op(12, 2, Some(&out), Some(&mut inp)).unwrap();
        assert_eq!(inp, [0x34, 0x02, 0xCD, 0x0B]);
        drop(sel);

        assert_eq!(sent(&spi), vec![(0x234, 12), (0xBCD, 12)]);
    }

    #[test]
    fn test_master_op_without_buffers() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let mut sel = spi.select(DEV).unwrap();

        let mut inp = [0u8; 3];
        sel.master_op(20, 1, None, Some(&mut inp)).unwrap();
        assert_eq!(inp, [0xFF, 0xFF, 0x0F]);

        sel.master_op(1, 3, Some(&[1, 0, 1]), None).unwrap();
        drop(sel);

        let words = spi.with_controller(|c| c.words());
        assert_eq!(words, vec![0xF_FFFF, 1, 0, 1]);
    }

    #[test]
    fn test_master_op_rejects_bad_arguments() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let mut sel = spi.select(DEV).unwrap();

        let err = sel.master_op(0, 1, None, None).unwrap_err();
        assert_eq!(err.code(), Some(SPI_ERR_INVALID_MODE));
        let err = sel.master_op(33, 1, None, None).unwrap_err();
        assert_eq!(err.code(), Some(SPI_ERR_INVALID_MODE));

        let mut inp = [0u8; 5];
        let err = sel.master_op(24, 2, None, Some(&mut inp)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Operation);
        assert_eq!(err.code(), Some(SPI_ERR_BUFFER));
        drop(sel);

        // Nothing was shifted
        assert!(sent(&spi).is_empty());
    }

    #[test]
    fn test_slow_controller_completes() {
        let locks = LockManager::new();
        let mut hw = Loopback::new();
        hw.busy_polls = 50;
        let spi = ready(&locks, hw);

        let mut sel = spi.select(DEV).unwrap();
        let mut words = [0xAAAA_5555u32, 7];
        sel.bulk_rw32(&mut words).unwrap();
        assert_eq!(words, [0xAAAA_5555, 7]);
    }

    #[test]
    fn test_stuck_controller_times_out() {
        let locks = LockManager::new();
        let mut hw = Loopback::new();
        hw.stuck = true;
        let config = PlatformConfig {
            spi_timeout_polls: 10,
            ..PlatformConfig::default()
        };
        let spi = Spi::new(hw, &locks, config);
        spi.init(DEV.unit).unwrap();

        let mut sel = spi.select(DEV).unwrap();
        let err = sel.bulk_write8(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Operation);
        assert_eq!(err.code(), Some(SPI_ERR_TIMEOUT));
        assert_eq!(err.unit, Some(DEV.unit));
        drop(sel);

        // Gave up on the first word
        assert_eq!(sent(&spi).len(), 1);
        assert_eq!(spi.status(DEV.unit), Ok(1));
        // The selection was still released
        assert!(spi.select(DEV).is_ok());
    }

    #[test]
    fn test_units_shift_concurrently() {
        let locks = LockManager::new();
        let mut hw = Loopback::new();
        // Unit 2 cannot finish until unit 3 has started a word
        hw.hold_until_start = Some((2, 3));
        let config = PlatformConfig {
            spi_timeout_polls: 10_000_000,
            ..PlatformConfig::default()
        };
        let spi = Spi::new(hw, &locks, config);
        spi.init(2).unwrap();
        spi.init(3).unwrap();

        std::thread::scope(|s| {
            let held = s.spawn(|| {
                let mut sel = spi.select(SpiDev::primary(2))?;
                sel.transfer(0xA5)
            });
            while spi.with_controller(|c| c.sent.is_empty()) {
                std::thread::yield_now();
            }

            let mut sel = spi.select(SpiDev::primary(3)).unwrap();
            assert_eq!(sel.transfer(0x5A), Ok(0x5A));
            drop(sel);
            assert_eq!(held.join().unwrap(), Ok(0xA5));
        });
    }

    #[test]
    fn test_selection_debug() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        let sel = spi.select(DEV).unwrap();
        let text = std::format!("{:?}", sel);
        assert!(text.starts_with("SpiSelection"));
        assert!(text.contains("bits: 8"));

        // unwrap_err needs the guard type to be Debug
        let err = spi.select(DEV).unwrap_err();
        assert_eq!(err.code(), Some(SPI_ERR_BUS_BUSY));
    }

    #[test]
    fn test_drop_deasserts_chip_select() {
        let locks = LockManager::new();
        let spi = ready(&locks, Loopback::new());
        {
            let _sel = spi.select(DEV).unwrap();
            assert!(spi.with_controller(|c| c.cs_asserted(0x1F)));
        }
        assert!(!spi.with_controller(|c| c.cs_asserted(0x1F)));
    }

    proptest! {
        #[test]
        fn prop_loopback_rw8(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let locks = LockManager::new();
            let spi = ready(&locks, Loopback::new());
            let mut sel = spi.select(DEV).unwrap();
            let mut buf = data.clone();
            sel.bulk_rw8(&mut buf).unwrap();
            prop_assert_eq!(buf, data);
        }

        #[test]
        fn prop_loopback_rw16(data in prop::collection::vec(any::<u16>(), 0..32)) {
            let locks = LockManager::new();
            let spi = ready(&locks, Loopback::new());
            let mut sel = spi.select(DEV).unwrap();
            let mut buf = data.clone();
            sel.bulk_rw16(&mut buf).unwrap();
            prop_assert_eq!(&buf, &data);
            drop(sel);

            let wire: Vec<(u32, u8)> = data.iter().map(|&w| (u32::from(w), 16)).collect();
            prop_assert_eq!(sent(&spi), wire);
        }

        #[test]
        fn prop_loopback_rw32(data in prop::collection::vec(any::<u32>(), 0..16)) {
            let locks = LockManager::new();
            let spi = ready(&locks, Loopback::new());
            let mut sel = spi.select(DEV).unwrap();
            let mut buf = data.clone();
            sel.bulk_rw32(&mut buf).unwrap();
            prop_assert_eq!(&buf, &data);
            drop(sel);

            let wire: Vec<(u32, u8)> = data.iter().map(|&w| (w, 32)).collect();
            prop_assert_eq!(sent(&spi), wire);
        }

        #[test]
        fn prop_loopback_rw16_be(data in prop::collection::vec(any::<u16>(), 0..32)) {
            let locks = LockManager::new();
            let spi = ready(&locks, Loopback::new());
            let mut sel = spi.select(DEV).unwrap();
            let mut buf = data.clone();
            sel.bulk_rw16_be(&mut buf).unwrap();
            prop_assert_eq!(&buf, &data);
            drop(sel);

            let wire: Vec<u32> = data.iter().map(|w| w.swap_bytes() as u32).collect();
            prop_assert_eq!(spi.with_controller(|c| c.words()), wire);
        }

        #[test]
        fn prop_loopback_rw32_be(data in prop::collection::vec(any::<u32>(), 0..16)) {
            let locks = LockManager::new();
            let spi = ready(&locks, Loopback::new());
            let mut sel = spi.select(DEV).unwrap();
            let mut buf = data.clone();
            sel.bulk_rw32_be(&mut buf).unwrap();
            prop_assert_eq!(&buf, &data);
            drop(sel);

            let wire: Vec<u32> = data.iter().map(|w| w.swap_bytes()).collect();
            prop_assert_eq!(spi.with_controller(|c| c.words()), wire);
        }

        #[test]
        fn prop_master_op_masks_high_bits(bits in 1u8..=32, word in any::<u32>()) {
            let locks = LockManager::new();
            let spi = ready(&locks, Loopback::new());
            let mut sel = spi.select(DEV).unwrap();
            let mut inp = [0u8; 4];
            sel.master_op(bits, 1, Some(&word.to_le_bytes()), Some(&mut inp)).unwrap();

            let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
            let stride = (bits as usize).div_ceil(8);
            let mut expected = [0u8; 4];
            expected[..stride].copy_from_slice(&(word & mask).to_le_bytes()[..stride]);
            prop_assert_eq!(inp, expected);
        }
    }
}
