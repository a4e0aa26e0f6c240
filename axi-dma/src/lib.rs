// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! AXI DMA exerciser
//!
//! Drives a Xilinx AXI DMA engine in direct register mode from user space:
//! two page-locked buffers are resolved to physical addresses, re-mapped
//! uncached through `/dev/mem`, copied MM2S -> stream -> S2MM by the engine
//! and compared afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  selftest::run                                                  │
//! └──────┬──────────────┬───────────────┬───────────────┬──────────┘
//!        │              │               │               │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//! │ LockedBuf  │ │ PhysResolver│ │ DevMem      │ │ AxiDma      │
//! │ (mlock)    │ │ (pagemap)   │ │ (O_SYNC map)│ │ (regs/poll) │
//! └────────────┘ └─────────────┘ └──────┬──────┘ └──────┬──────┘
//!                                       │               │
//! ┌─────────────────────────────────────▼───────────────▼──────────┐
//! │  DDR (uncached windows)        AXI DMA register block          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod config;
pub mod devmem;
pub mod dma;
pub mod error;
pub mod io;
pub mod pagemap;
pub mod regs;
pub mod selftest;
pub mod verify;

pub use self::buffer::LockedBuffer;
pub use self::config::{Config, PollBudget};
pub use self::devmem::{DevMem, PhysMapping};
pub use self::dma::{AxiDma, Channel, TransferOutcome};
pub use self::error::{Error, ResolveError, Result};
pub use self::io::{Io, Mmio};
pub use self::pagemap::{PagemapEntry, PhysAddr, PhysResolver};
pub use self::regs::{AxiDmaRegs, ChannelRegs, DmaCr, DmaSr};
pub use self::selftest::Report;
pub use self::verify::{Mismatch, VerifyReport, WordBuffer};

/// Size of a page on the running system.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Orders all prior memory accesses before any later device access.
///
/// Issued between filling a buffer and writing the LENGTH register that
/// hands it to the engine.
#[inline(always)]
pub fn barrier() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: dmb only orders memory accesses.
    unsafe {
        core::arch::asm!("dmb sy", options(nostack, preserves_flags));
    }
    #[cfg(target_arch = "arm")]
    // SAFETY: dmb only orders memory accesses.
    unsafe {
        core::arch::asm!("dmb", options(nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}
