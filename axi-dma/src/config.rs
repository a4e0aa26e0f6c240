// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Run configuration

use std::mem::size_of;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::regs::AxiDmaRegs;

/// Physical base of the AXI DMA register block.
pub const DEFAULT_DMA_BASE: u64 = 0xA000_0000;
/// Size of the register window.
pub const DEFAULT_MAP_SIZE: usize = 0x1_0000;
pub const DEFAULT_TEST_SIZE: usize = 4096;
/// Empirically tuned; roughly a few milliseconds on a Cortex-A53.
pub const DEFAULT_POLL_ITERATIONS: u32 = 100_000;
pub const DEFAULT_LENGTH_WIDTH: u8 = 26;

/// How long the status poll loop may spin before declaring a timeout.
/// Both variants busy-wait; neither sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBudget {
    /// Fixed number of status reads per channel
    Iterations(u32),
    /// Monotonic clock deadline measured from the first poll
    Deadline(Duration),
}

impl PollBudget {
    pub fn is_zero(&self) -> bool {
        match *self {
            PollBudget::Iterations(n) => n == 0,
            PollBudget::Deadline(d) => d.is_zero(),
        }
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        PollBudget::Iterations(DEFAULT_POLL_ITERATIONS)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dma_base: u64,
    pub map_size: usize,
    /// Bytes per buffer
    pub test_size: usize,
    pub poll: PollBudget,
    /// Delay after writing the soft reset bit
    pub reset_settle: Duration,
    /// Width of the LENGTH register ("Width of Buffer Length Register")
    pub length_width: u8,
    pub pattern_base: u32,
    pub fill_word: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dma_base: DEFAULT_DMA_BASE,
            map_size: DEFAULT_MAP_SIZE,
            test_size: DEFAULT_TEST_SIZE,
            poll: PollBudget::default(),
            reset_settle: Duration::from_millis(1),
            length_width: DEFAULT_LENGTH_WIDTH,
            pattern_base: 0xAA00_0000,
            fill_word: 0xDEAD_BEEF,
        }
    }
}

impl Config {
    /// Largest transfer the LENGTH register can encode.
    pub fn max_transfer(&self) -> usize {
        (1usize << self.length_width.min(26)) - 1
    }

    pub fn validate(&self) -> Result<()> {
        let page = crate::page_size();

        if !(8..=26).contains(&self.length_width) {
            return Err(Error::Config(format!(
                "length register width {} outside 8..=26",
                self.length_width
            )));
        }
        if self.test_size == 0 || self.test_size % page != 0 {
            return Err(Error::Config(format!(
                "test size {} is not a non-zero multiple of the page size {}",
                self.test_size, page
            )));
        }
        if self.test_size > self.max_transfer() {
            return Err(Error::Config(format!(
                "test size {} exceeds {}-bit length register",
                self.test_size, self.length_width
            )));
        }
        if self.map_size < size_of::<AxiDmaRegs>() {
            return Err(Error::Config(format!(
                "register window {:#x} smaller than register block {:#x}",
                self.map_size,
                size_of::<AxiDmaRegs>()
            )));
        }
        if self.dma_base % page as u64 != 0 {
            return Err(Error::Config(format!(
                "DMA base {:#x} is not page aligned",
                self.dma_base
            )));
        }
        if self.poll.is_zero() {
            return Err(Error::Config("poll budget is zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.dma_base, 0xA000_0000);
        assert_eq!(config.map_size, 65536);
        assert_eq!(config.poll, PollBudget::Iterations(100_000));
        assert_eq!(config.max_transfer(), 0x3FF_FFFF);
    }

    #[test]
    fn test_rejects_bad_values() {
        let page = crate::page_size();
        let cases = [
            Config {
                test_size: page + 4,
                ..Config::default()
            },
            Config {
                test_size: 0,
                ..Config::default()
            },
            Config {
                map_size: 0x20,
                ..Config::default()
            },
            Config {
                dma_base: 0xA000_0004,
                ..Config::default()
            },
            Config {
                poll: PollBudget::Iterations(0),
                ..Config::default()
            },
            Config {
                length_width: 30,
                ..Config::default()
            },
        ];
        for config in cases.iter() {
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{:?} accepted",
                config
            );
        }
    }

    #[test]
    fn test_length_width_limits_test_size() {
        let page = crate::page_size();
        let config = Config {
            length_width: 8,
            test_size: page,
            ..Config::default()
        };
        assert_eq!(config.max_transfer(), 255);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
