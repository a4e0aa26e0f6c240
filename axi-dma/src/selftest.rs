// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! One complete loopback run
//!
//! Requires an MM2S -> S2MM stream loopback in the programmable logic.

use std::io::{self, Read, Seek};

use log::{error, info};

use crate::buffer::LockedBuffer;
use crate::config::Config;
use crate::devmem::DevMem;
use crate::dma::AxiDma;
use crate::error::{Error, Result};
use crate::pagemap::{PhysAddr, PhysResolver};
use crate::regs::AxiDmaRegs;
use crate::verify::{self, VerifyReport, WordBuffer};

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct Report {
    pub src_phys: PhysAddr,
    pub dst_phys: PhysAddr,
    pub bytes: usize,
    pub polls: u64,
    pub verify: VerifyReport,
}

/// Resolves both buffers, source first. Fails on the first address that
/// cannot be resolved.
pub fn resolve_pair<S: Read + Seek>(
    resolver: &mut PhysResolver<S>,
    src_virt: usize,
    dst_virt: usize,
) -> Result<(PhysAddr, PhysAddr)> {
    let src = resolver
        .resolve(src_virt)
        .map_err(|reason| Error::Resolution {
            virt: src_virt,
            reason,
        })?;
    let dst = resolver
        .resolve(dst_virt)
        .map_err(|reason| Error::Resolution {
            virt: dst_virt,
            reason,
        })?;
    Ok((src, dst))
}

/// Fills the windows, runs the transfer and verifies the result.
///
/// `src` and `dst` must be the uncached views of `src_phys` and `dst_phys`.
pub fn execute<S, D>(
    config: &Config,
    dma: &mut AxiDma<'_>,
    src: &mut S,
    dst: &mut D,
    src_phys: PhysAddr,
    dst_phys: PhysAddr,
) -> Result<Report>
where
    S: WordBuffer + ?Sized,
    D: WordBuffer + ?Sized,
{
    let words = config.test_size / 4;
    verify::fill_pattern(src, config.pattern_base);
    verify::fill(dst, config.fill_word);

    let outcome = dma.transfer(
        src_phys,
        dst_phys,
        config.test_size,
        config.reset_settle,
        config.poll,
    )?;
    let polls = outcome.into_result().map_err(|err| {
        error!("{}", err);
        err
    })?;
    info!("transfer complete after {} polls", polls);

    let verify = verify::compare(&*src, &*dst, words).into_result()?;
    Ok(Report {
        src_phys,
        dst_phys,
        bytes: config.test_size,
        polls,
        verify,
    })
}

/// Runs the exerciser against the real hardware.
///
/// Every mapping, lock and handle acquired here is released on return,
/// whichever way the run ends.
pub fn run(config: &Config) -> Result<Report> {
    config.validate()?;

    let mem = DevMem::open()?;
    let mut reg_window = mem.map(config.dma_base, config.map_size)?;
    // SAFETY: AxiDmaRegs mirrors the AXI DMA register layout and consists
    // of 32-bit volatile cells only.
    let regs = unsafe { reg_window.as_mut::<AxiDmaRegs>() }.ok_or_else(|| Error::Mapping {
        phys: config.dma_base,
        len: config.map_size,
        source: io::Error::new(io::ErrorKind::InvalidInput, "register window unusable"),
    })?;
    info!("AXI DMA registers at {:#x}", config.dma_base);

    let src = LockedBuffer::new(config.test_size)?;
    let dst = LockedBuffer::new(config.test_size)?;

    let mut resolver = PhysResolver::open_self().map_err(|reason| Error::Resolution {
        virt: src.virt_addr(),
        reason,
    })?;
    let (src_phys, dst_phys) = resolve_pair(&mut resolver, src.virt_addr(), dst.virt_addr())?;
    info!("Phys Src: {}", src_phys);
    info!("Phys Dst: {}", dst_phys);

    let mut src_window = mem.map(src_phys.as_u64(), config.test_size)?;
    let mut dst_window = mem.map(dst_phys.as_u64(), config.test_size)?;

    let mut dma = AxiDma::new(regs, config.length_width);
    execute(
        config,
        &mut dma,
        &mut src_window,
        &mut dst_window,
        src_phys,
        dst_phys,
    )
}
