//! Loopback controller for host tests

extern crate std;

use std::vec::Vec;

use keel_hal::{BusConfig, HwError, SpiController};

use super::NSPI;

/// Controller with MISO wired to MOSI
///
/// Every shifted word reads back unchanged. `busy_polls` makes each shift
/// report busy that many times before completing; `stuck` never completes.
/// With `hold_until_start = Some((held, other))`, unit `held` reports busy
/// until unit `other` starts a word.
#[derive(Debug, Default)]
pub struct Loopback {
    pub init_calls: u32,
    pub fail_init: Option<HwError>,
    pub configured: Vec<(u8, BusConfig)>,
    pub sent: Vec<(u32, u8)>,
    pub cs_log: Vec<(u8, bool)>,
    pub busy_polls: u32,
    pub stuck: bool,
    pub hold_until_start: Option<(u8, u8)>,
    remaining: [u32; NSPI],
    last: [u32; NSPI],
    started: [bool; NSPI],
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level driven on a chip-select pin
    pub fn cs_asserted(&self, pin: u8) -> bool {
        self.cs_log
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, asserted)| *asserted)
            .unwrap_or(false)
    }

    /// Words shifted out, without their widths
    pub fn words(&self) -> Vec<u32> {
        self.sent.iter().map(|(word, _)| *word).collect()
    }
}

impl SpiController for Loopback {
    fn init(&mut self, _unit: u8) -> Result<(), HwError> {
        self.init_calls += 1;
        match self.fail_init {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn configure(&mut self, unit: u8, config: &BusConfig) {
        self.configured.push((unit, *config));
    }

    fn start(&mut self, unit: u8, word: u32, bits: u8) {
        let unit = unit as usize;
        self.sent.push((word, bits));
        self.last[unit] = word;
        self.remaining[unit] = self.busy_polls;
        self.started[unit] = true;
    }

    fn is_busy(&mut self, unit: u8) -> bool {
        if self.stuck {
            return true;
        }
        if let Some((held, other)) = self.hold_until_start {
            if held == unit && !self.started[other as usize] {
                return true;
            }
        }
        let remaining = &mut self.remaining[unit as usize];
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }

    fn read(&mut self, unit: u8) -> u32 {
        self.last[unit as usize]
    }

    fn set_cs(&mut self, _unit: u8, pin: u8, asserted: bool) {
        self.cs_log.push((pin, asserted));
    }

    fn status(&self, _unit: u8) -> u32 {
        u32::from(self.stuck)
    }
}
