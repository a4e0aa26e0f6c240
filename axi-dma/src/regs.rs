// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! AXI DMA register block (direct register mode, 64-bit addressing)
//!
//! The block holds two identical channel groups: MM2S (memory to stream,
//! "transmit") at 0x00 and S2MM (stream to memory, "receive") at 0x30.
//! Offsets below are fixed by the IP core and must not change.

use core::mem::{offset_of, size_of};

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::io::{Io, Mmio};

/// Byte offsets of the registers this crate touches.
pub mod offsets {
    pub const MM2S_DMACR: usize = 0x00;
    pub const MM2S_DMASR: usize = 0x04;
    pub const MM2S_SA: usize = 0x18;
    pub const MM2S_SA_MSB: usize = 0x1C;
    pub const MM2S_LENGTH: usize = 0x28;

    pub const S2MM_DMACR: usize = 0x30;
    pub const S2MM_DMASR: usize = 0x34;
    pub const S2MM_DA: usize = 0x48;
    pub const S2MM_DA_MSB: usize = 0x4C;
    pub const S2MM_LENGTH: usize = 0x58;

    /// Size of one channel group.
    pub const CHANNEL_STRIDE: usize = 0x30;
}

bitflags! {
    /// DMACR, channel control register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaCr: u32 {
        /// Run/stop
        const RS = 1 << 0;
        /// Soft reset, self-clearing; resets both channels
        const RESET = 1 << 2;
        const KEYHOLE = 1 << 3;
        const CYCLIC = 1 << 4;
        const IOC_IRQ_EN = 1 << 12;
        const DLY_IRQ_EN = 1 << 13;
        const ERR_IRQ_EN = 1 << 14;
    }
}

bitflags! {
    /// DMASR, channel status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaSr: u32 {
        const HALTED = 1 << 0;
        /// Programmed transfer finished
        const IDLE = 1 << 1;
        const SG_INCLD = 1 << 3;
        const DMA_INT_ERR = 1 << 4;
        const DMA_SLV_ERR = 1 << 5;
        const DMA_DEC_ERR = 1 << 6;
        const SG_INT_ERR = 1 << 8;
        const SG_SLV_ERR = 1 << 9;
        const SG_DEC_ERR = 1 << 10;
        const IOC_IRQ = 1 << 12;
        const DLY_IRQ = 1 << 13;
        const ERR_IRQ = 1 << 14;
    }
}

impl DmaSr {
    /// Error class reported by a direct register mode transfer (bits 4..=6).
    pub const ERROR_MASK: DmaSr = DmaSr::DMA_INT_ERR
        .union(DmaSr::DMA_SLV_ERR)
        .union(DmaSr::DMA_DEC_ERR);

    pub fn is_idle(self) -> bool {
        self.contains(DmaSr::IDLE)
    }

    pub fn has_error(self) -> bool {
        self.intersects(DmaSr::ERROR_MASK)
    }

    /// Human-readable names of the error bits that are set.
    pub fn error_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(DmaSr::DMA_INT_ERR) {
            names.push("internal");
        }
        if self.contains(DmaSr::DMA_SLV_ERR) {
            names.push("slave");
        }
        if self.contains(DmaSr::DMA_DEC_ERR) {
            names.push("decode");
        }
        names
    }

    /// Raw word in hex, followed by the error names if any are set,
    /// e.g. `0x00000041 (decode)`.
    pub fn describe(self) -> String {
        let names = self.error_names();
        if names.is_empty() {
            format!("0x{:08X}", self.bits())
        } else {
            format!("0x{:08X} ({})", self.bits(), names.join(", "))
        }
    }
}

/// One channel group. Layout is identical for MM2S and S2MM; only the
/// meaning of the address pair differs (source vs. destination).
#[repr(C)]
#[derive(Default)]
pub struct ChannelRegs {
    pub dmacr: Mmio<u32>,
    pub dmasr: Mmio<u32>,
    curdesc: Mmio<u32>,
    curdesc_msb: Mmio<u32>,
    taildesc: Mmio<u32>,
    taildesc_msb: Mmio<u32>,
    /// Bits 0..=31 of the buffer address
    pub addr: Mmio<u32>,
    /// Bits 32..=63 of the buffer address
    pub addr_msb: Mmio<u32>,
    _rsvd0: Mmio<u32>,
    _rsvd1: Mmio<u32>,
    /// Writing starts the transfer
    pub length: Mmio<u32>,
    _rsvd2: Mmio<u32>,
}

impl ChannelRegs {
    pub fn control(&self) -> DmaCr {
        DmaCr::from_bits_retain(self.dmacr.read())
    }

    pub fn set_control(&mut self, cr: DmaCr) {
        self.dmacr.write(cr.bits());
    }

    pub fn status(&self) -> DmaSr {
        DmaSr::from_bits_retain(self.dmasr.read())
    }

    /// Writes both halves of a 64-bit bus address, low word first.
    pub fn set_address(&mut self, addr: u64) {
        self.addr.write((addr & 0xFFFF_FFFF) as u32);
        self.addr_msb.write((addr >> 32) as u32);
    }

    pub fn address(&self) -> u64 {
        (u64::from(self.addr_msb.read()) << 32) | u64::from(self.addr.read())
    }
}

/// The full register block as mapped at the DMA base address.
#[repr(C)]
#[derive(Default)]
pub struct AxiDmaRegs {
    pub mm2s: ChannelRegs,
    pub s2mm: ChannelRegs,
}

const_assert_eq!(size_of::<ChannelRegs>(), offsets::CHANNEL_STRIDE);
const_assert_eq!(offset_of!(AxiDmaRegs, mm2s) + offset_of!(ChannelRegs, dmacr), offsets::MM2S_DMACR);
const_assert_eq!(offset_of!(AxiDmaRegs, mm2s) + offset_of!(ChannelRegs, dmasr), offsets::MM2S_DMASR);
const_assert_eq!(offset_of!(AxiDmaRegs, mm2s) + offset_of!(ChannelRegs, addr), offsets::MM2S_SA);
const_assert_eq!(offset_of!(AxiDmaRegs, mm2s) + offset_of!(ChannelRegs, addr_msb), offsets::MM2S_SA_MSB);
const_assert_eq!(offset_of!(AxiDmaRegs, mm2s) + offset_of!(ChannelRegs, length), offsets::MM2S_LENGTH);
const_assert_eq!(offset_of!(AxiDmaRegs, s2mm) + offset_of!(ChannelRegs, dmacr), offsets::S2MM_DMACR);
const_assert_eq!(offset_of!(AxiDmaRegs, s2mm) + offset_of!(ChannelRegs, dmasr), offsets::S2MM_DMASR);
const_assert_eq!(offset_of!(AxiDmaRegs, s2mm) + offset_of!(ChannelRegs, addr), offsets::S2MM_DA);
const_assert_eq!(offset_of!(AxiDmaRegs, s2mm) + offset_of!(ChannelRegs, addr_msb), offsets::S2MM_DA_MSB);
const_assert_eq!(offset_of!(AxiDmaRegs, s2mm) + offset_of!(ChannelRegs, length), offsets::S2MM_LENGTH);

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_word(regs: &AxiDmaRegs, offset: usize) -> u32 {
        let base = regs as *const AxiDmaRegs as *const u8;
        // SAFETY: offset is inside the block and 4-byte aligned.
        unsafe { core::ptr::read_volatile(base.add(offset) as *const u32) }
    }

    #[test]
    fn test_address_split_round_trip() {
        let mut regs = AxiDmaRegs::default();
        for &addr in &[
            0u64,
            0xFFFF_FFFF,
            0x1_0000_0000,
            0x8_7654_3000,
            0xDEAD_BEEF_CAFE_F00D,
            u64::MAX,
        ] {
            regs.s2mm.set_address(addr);
            assert_eq!(regs.s2mm.addr.read(), (addr & 0xFFFF_FFFF) as u32);
            assert_eq!(regs.s2mm.addr_msb.read(), (addr >> 32) as u32);
            assert_eq!(regs.s2mm.address(), addr);
        }
    }

    #[test]
    fn test_named_fields_hit_hardware_offsets() {
        let mut regs = AxiDmaRegs::default();
        regs.mm2s.set_address(0x0000_0008_1234_5000);
        regs.mm2s.length.write(4096);
        regs.s2mm.set_control(DmaCr::RS);
        regs.s2mm.set_address(0x0000_0009_0000_1000);
        regs.s2mm.length.write(512);

        assert_eq!(raw_word(&regs, offsets::MM2S_SA), 0x1234_5000);
        assert_eq!(raw_word(&regs, offsets::MM2S_SA_MSB), 0x8);
        assert_eq!(raw_word(&regs, offsets::MM2S_LENGTH), 4096);
        assert_eq!(raw_word(&regs, offsets::S2MM_DMACR), 1);
        assert_eq!(raw_word(&regs, offsets::S2MM_DA), 0x0000_1000);
        assert_eq!(raw_word(&regs, offsets::S2MM_DA_MSB), 0x9);
        assert_eq!(raw_word(&regs, offsets::S2MM_LENGTH), 512);
    }

    #[test]
    fn test_error_mask_is_bits_4_to_6() {
        assert_eq!(DmaSr::ERROR_MASK.bits(), 0x70);
        assert!(DmaSr::from_bits_retain(0x10).has_error());
        assert!(!DmaSr::from_bits_retain(0x0102).has_error());
        assert_eq!(
            DmaSr::from_bits_retain(0x60).error_names(),
            vec!["slave", "decode"]
        );
    }

    #[test]
    fn test_describe_names_error_class() {
        assert_eq!(DmaSr::from_bits_retain(0x41).describe(), "0x00000041 (decode)");
        assert_eq!(
            DmaSr::from_bits_retain(0x31).describe(),
            "0x00000031 (internal, slave)"
        );
        assert_eq!(DmaSr::IDLE.describe(), "0x00000002");
    }
}
