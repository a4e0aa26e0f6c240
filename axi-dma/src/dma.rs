// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Direct register mode transfers
//!
//! Sequence per run: soft reset, set RS on both channels, program address
//! and LENGTH (the LENGTH write starts the channel), then busy-poll DMASR
//! until both channels are idle, either reports an error, or the budget is
//! spent.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::config::PollBudget;
use crate::error::{Error, Result};
use crate::io::Io;
use crate::pagemap::PhysAddr;
use crate::regs::{AxiDmaRegs, ChannelRegs, DmaCr, DmaSr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Memory to stream (transmit)
    Mm2s,
    /// Stream to memory (receive)
    S2mm,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Mm2s => "MM2S",
            Channel::S2mm => "S2MM",
        }
    }
}

/// Terminal state of one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success { polls: u64 },
    HardwareError { tx: DmaSr, rx: DmaSr, polls: u64 },
    Timeout { polls: u64 },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success { .. })
    }

    /// Converts a failed outcome into the matching error.
    pub fn into_result(self) -> Result<u64> {
        match self {
            TransferOutcome::Success { polls } => Ok(polls),
            TransferOutcome::HardwareError { tx, rx, .. } => Err(Error::Hardware {
                tx: tx.bits(),
                rx: rx.bits(),
            }),
            TransferOutcome::Timeout { polls } => Err(Error::Timeout { polls }),
        }
    }
}

/// Spins on `read_status` (returning MM2S and S2MM DMASR) until a terminal
/// state is observed.
///
/// Error bits take precedence over idle bits within one read. With
/// `PollBudget::Iterations(k)` at most `k` reads are made.
pub fn poll_completion<F>(budget: PollBudget, mut read_status: F) -> TransferOutcome
where
    F: FnMut() -> (DmaSr, DmaSr),
{
    let (limit, deadline) = match budget {
        PollBudget::Iterations(n) => (Some(u64::from(n)), None),
        PollBudget::Deadline(d) => (None, Some(Instant::now() + d)),
    };

    let mut polls = 0u64;
    loop {
        if limit.is_some_and(|limit| polls >= limit) {
            return TransferOutcome::Timeout { polls };
        }
        if polls > 0 && deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return TransferOutcome::Timeout { polls };
        }

        let (tx, rx) = read_status();
        polls += 1;
        trace!("poll {}: MM2S {:#010x} S2MM {:#010x}", polls, tx.bits(), rx.bits());

        if tx.has_error() || rx.has_error() {
            return TransferOutcome::HardwareError { tx, rx, polls };
        }
        if tx.is_idle() && rx.is_idle() {
            return TransferOutcome::Success { polls };
        }

        std::hint::spin_loop();
    }
}

/// AXI DMA engine over a mapped register block.
pub struct AxiDma<'a> {
    regs: &'a mut AxiDmaRegs,
    max_transfer: usize,
}

impl<'a> AxiDma<'a> {
    /// `length_width` is the configured width of the LENGTH register.
    pub fn new(regs: &'a mut AxiDmaRegs, length_width: u8) -> Self {
        Self {
            regs,
            max_transfer: (1usize << length_width.min(26)) - 1,
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelRegs {
        match channel {
            Channel::Mm2s => &self.regs.mm2s,
            Channel::S2mm => &self.regs.s2mm,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelRegs {
        match channel {
            Channel::Mm2s => &mut self.regs.mm2s,
            Channel::S2mm => &mut self.regs.s2mm,
        }
    }

    /// Raw access to the register block.
    pub fn registers_mut(&mut self) -> &mut AxiDmaRegs {
        self.regs
    }

    /// Soft-resets both channels and waits `settle`.
    pub fn reset(&mut self, settle: Duration) {
        debug!("resetting DMA");
        self.regs.mm2s.set_control(DmaCr::RESET);
        self.regs.s2mm.set_control(DmaCr::RESET);
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }

    /// Sets the run bit on both channels.
    pub fn arm(&mut self) {
        self.regs.mm2s.set_control(DmaCr::RS);
        self.regs.s2mm.set_control(DmaCr::RS);
    }

    /// Programs the buffer address and triggers `channel` by writing LENGTH.
    ///
    /// The channel must already be running (see [`AxiDma::arm`]).
    pub fn start(&mut self, channel: Channel, addr: PhysAddr, len: usize) -> Result<()> {
        if len == 0 || len > self.max_transfer {
            return Err(Error::Config(format!(
                "{} transfer of {} bytes outside 1..={}",
                channel.name(),
                len,
                self.max_transfer
            )));
        }

        let regs = self.channel_mut(channel);
        if !regs.control().contains(DmaCr::RS) {
            warn!("{} started while not running", channel.name());
        }
        regs.set_address(addr.as_u64());
        crate::barrier();
        regs.length.write(len as u32);

        debug!("{} started: {} bytes at {}", channel.name(), len, addr);
        Ok(())
    }

    /// Current status of (MM2S, S2MM).
    pub fn status(&self) -> (DmaSr, DmaSr) {
        (self.regs.mm2s.status(), self.regs.s2mm.status())
    }

    pub fn poll(&self, budget: PollBudget) -> TransferOutcome {
        poll_completion(budget, || self.status())
    }

    /// Full run: reset, arm, start S2MM into `dst`, start MM2S from `src`,
    /// then poll. Length is validated before any register is touched.
    ///
    /// Unless the outcome is `Success`, both channels are soft-reset again
    /// before returning, so neither is left running.
    pub fn transfer(
        &mut self,
        src: PhysAddr,
        dst: PhysAddr,
        len: usize,
        settle: Duration,
        budget: PollBudget,
    ) -> Result<TransferOutcome> {
        if len == 0 || len > self.max_transfer {
            return Err(Error::Config(format!(
                "transfer of {} bytes outside 1..={}",
                len, self.max_transfer
            )));
        }

        self.reset(settle);
        self.arm();
        self.start(Channel::S2mm, dst, len)?;
        self.start(Channel::Mm2s, src, len)?;
        info!("DMA running (64-bit address mode)");

        let outcome = self.poll(budget);
        self.dump();
        if !outcome.is_success() {
            // The engine may still own the buffers; stop it before they are freed.
            warn!("stopping DMA after unsuccessful transfer");
            self.reset(settle);
        }
        Ok(outcome)
    }

    /// Logs both channels' control and status registers.
    pub fn dump(&self) {
        for channel in [Channel::Mm2s, Channel::S2mm] {
            let regs = self.channel(channel);
            debug!(
                "{}: DMACR {:?} DMASR {:?} addr {:#x}",
                channel.name(),
                regs.control(),
                regs.status(),
                regs.address()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sr(bits: u32) -> DmaSr {
        DmaSr::from_bits_retain(bits)
    }

    #[test]
    fn test_timeout_reads_exactly_budget() {
        let reads = Cell::new(0u64);
        let outcome = poll_completion(PollBudget::Iterations(1000), || {
            reads.set(reads.get() + 1);
            (sr(0), sr(DmaSr::IDLE.bits()))
        });
        assert_eq!(outcome, TransferOutcome::Timeout { polls: 1000 });
        assert_eq!(reads.get(), 1000);
    }

    #[test]
    fn test_success_declared_on_observing_read() {
        let reads = Cell::new(0u64);
        let outcome = poll_completion(PollBudget::Iterations(50), || {
            reads.set(reads.get() + 1);
            if reads.get() < 7 {
                (sr(0), sr(0))
            } else {
                (sr(0x02), sr(0x02))
            }
        });
        assert_eq!(outcome, TransferOutcome::Success { polls: 7 });
        assert_eq!(reads.get(), 7);
    }

    #[test]
    fn test_receive_error_before_idle_is_hardware_error() {
        let mut calls = 0;
        let outcome = poll_completion(PollBudget::Iterations(100), || {
            calls += 1;
            if calls < 3 {
                (sr(0), sr(0))
            } else {
                (sr(0), sr(0x70))
            }
        });
        match outcome {
            TransferOutcome::HardwareError { tx, rx, polls } => {
                assert_eq!(tx.bits(), 0);
                assert_eq!(rx.bits(), 0x70);
                assert_eq!(polls, 3);
            }
            other => panic!("expected hardware error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_wins_over_idle_in_same_read() {
        let outcome = poll_completion(PollBudget::Iterations(10), || (sr(0x02), sr(0x22)));
        assert!(matches!(outcome, TransferOutcome::HardwareError { polls: 1, .. }));
    }

    #[test]
    fn test_deadline_budget_times_out_without_sleeping() {
        let started = Instant::now();
        let outcome = poll_completion(PollBudget::Deadline(Duration::from_millis(5)), || {
            (sr(0), sr(0))
        });
        assert!(matches!(outcome, TransferOutcome::Timeout { polls } if polls >= 1));
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut once = AxiDmaRegs::default();
        AxiDma::new(&mut once, 26).reset(Duration::ZERO);

        let mut twice = AxiDmaRegs::default();
        {
            let mut dma = AxiDma::new(&mut twice, 26);
            dma.reset(Duration::ZERO);
            dma.reset(Duration::ZERO);
        }

        assert_eq!(once.mm2s.control(), twice.mm2s.control());
        assert_eq!(once.s2mm.control(), twice.s2mm.control());
        assert_eq!(twice.mm2s.control(), DmaCr::RESET);
    }

    #[test]
    fn test_start_programs_split_address_then_length() {
        let mut regs = AxiDmaRegs::default();
        let mut dma = AxiDma::new(&mut regs, 26);
        dma.arm();
        dma.start(Channel::S2mm, PhysAddr(0x8_0010_2000), 4096).unwrap();

        assert_eq!(regs.s2mm.control(), DmaCr::RS);
        assert_eq!(regs.s2mm.addr.read(), 0x0010_2000);
        assert_eq!(regs.s2mm.addr_msb.read(), 0x8);
        assert_eq!(regs.s2mm.length.read(), 4096);
        assert_eq!(regs.mm2s.length.read(), 0);
    }

    #[test]
    fn test_oversized_transfer_touches_no_register() {
        let mut regs = AxiDmaRegs::default();
        {
            let mut dma = AxiDma::new(&mut regs, 14);
            let err = dma
                .transfer(
                    PhysAddr(0x1000),
                    PhysAddr(0x2000),
                    1 << 14,
                    Duration::ZERO,
                    PollBudget::Iterations(1),
                )
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
        }
        assert_eq!(regs.mm2s.dmacr.read(), 0);
        assert_eq!(regs.s2mm.dmacr.read(), 0);
        assert_eq!(regs.s2mm.length.read(), 0);
    }

    #[test]
    fn test_timeout_leaves_channels_stopped() {
        let mut regs = AxiDmaRegs::default();
        let outcome = AxiDma::new(&mut regs, 26)
            .transfer(
                PhysAddr(0x8_0000_1000),
                PhysAddr(0x8_0000_3000),
                4096,
                Duration::ZERO,
                PollBudget::Iterations(4),
            )
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Timeout { polls: 4 });
        for channel in [&regs.mm2s, &regs.s2mm] {
            assert!(!channel.control().contains(DmaCr::RS));
            assert!(channel.control().contains(DmaCr::RESET));
        }
    }

    #[test]
    fn test_hardware_error_leaves_channels_stopped() {
        let mut regs = AxiDmaRegs::default();
        regs.s2mm.dmasr.write((DmaSr::DMA_SLV_ERR | DmaSr::HALTED).bits());
        let outcome = AxiDma::new(&mut regs, 26)
            .transfer(
                PhysAddr(0x1000),
                PhysAddr(0x2000),
                4096,
                Duration::ZERO,
                PollBudget::Iterations(4),
            )
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::HardwareError { polls: 1, .. }));
        assert!(!regs.mm2s.control().contains(DmaCr::RS));
        assert!(!regs.s2mm.control().contains(DmaCr::RS));
    }

    #[test]
    fn test_success_keeps_channels_running() {
        let mut regs = AxiDmaRegs::default();
        regs.mm2s.dmasr.write(DmaSr::IDLE.bits());
        regs.s2mm.dmasr.write(DmaSr::IDLE.bits());
        let outcome = AxiDma::new(&mut regs, 26)
            .transfer(
                PhysAddr(0x1000),
                PhysAddr(0x2000),
                4096,
                Duration::ZERO,
                PollBudget::Iterations(4),
            )
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(regs.s2mm.control(), DmaCr::RS);
    }

    #[test]
    fn test_outcome_maps_to_distinct_errors() {
        let hw = TransferOutcome::HardwareError {
            tx: sr(0x01),
            rx: sr(0x4021),
            polls: 4,
        };
        assert!(matches!(
            hw.into_result(),
            Err(Error::Hardware { tx: 0x01, rx: 0x4021 })
        ));
        assert!(matches!(
            TransferOutcome::Timeout { polls: 9 }.into_result(),
            Err(Error::Timeout { polls: 9 })
        ));
        assert_eq!(TransferOutcome::Success { polls: 2 }.into_result().unwrap(), 2);
    }
}
