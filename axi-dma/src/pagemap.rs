// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Virtual to physical translation through `/proc/self/pagemap`
//!
//! The page map holds one native-endian 64-bit entry per virtual page.
//! Bit 63 marks the page as resident and bits 0..=54 hold its frame number.

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use log::{trace, warn};

use crate::error::ResolveError;

pub const PAGEMAP_PATH: &str = "/proc/self/pagemap";

/// Size of one page map entry in bytes.
const ENTRY_SIZE: u64 = 8;

/// Address as seen by a bus master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// One decoded page map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagemapEntry(pub u64);

impl PagemapEntry {
    const PRESENT: u64 = 1 << 63;
    const SWAPPED: u64 = 1 << 62;
    const FILE_SHARED: u64 = 1 << 61;
    const PFN_MASK: u64 = (1 << 55) - 1;

    pub fn present(self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    pub fn swapped(self) -> bool {
        self.0 & Self::SWAPPED != 0
    }

    pub fn file_shared(self) -> bool {
        self.0 & Self::FILE_SHARED != 0
    }

    /// Page frame number. Meaningless unless `present()`.
    pub fn pfn(self) -> u64 {
        self.0 & Self::PFN_MASK
    }
}

/// Resolves virtual addresses of this process through a page map source.
pub struct PhysResolver<S> {
    source: S,
    page_size: usize,
}

impl PhysResolver<File> {
    /// Opens the calling process' page map read-only.
    pub fn open_self() -> Result<Self, ResolveError> {
        let file = File::open(PAGEMAP_PATH).map_err(ResolveError::Open)?;
        Ok(Self::with_source(file, crate::page_size()))
    }
}

impl<S: Read + Seek> PhysResolver<S> {
    pub fn with_source(source: S, page_size: usize) -> Self {
        Self { source, page_size }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reads the raw entry covering `virt`.
    pub fn entry(&mut self, virt: usize) -> Result<PagemapEntry, ResolveError> {
        let page_index = (virt / self.page_size) as u64;
        self.source
            .seek(SeekFrom::Start(page_index * ENTRY_SIZE))
            .map_err(ResolveError::Read)?;

        let mut buf = [0u8; ENTRY_SIZE as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => return Err(ResolveError::ShortRead(filled)),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ResolveError::Read(err)),
            }
        }

        Ok(PagemapEntry(u64::from_ne_bytes(buf)))
    }

    /// Translates `virt` to the physical address backing it.
    ///
    /// Only valid while the page stays resident; callers lock the page
    /// first.
    pub fn resolve(&mut self, virt: usize) -> Result<PhysAddr, ResolveError> {
        let entry = self.entry(virt)?;
        trace!("pagemap[{:#x}] = {:#018x}", virt, entry.0);

        if !entry.present() {
            return Err(ResolveError::NotPresent {
                swapped: entry.swapped(),
            });
        }
        if entry.file_shared() {
            warn!("page at {:#x} is file-backed or shared", virt);
        }
        let pfn = entry.pfn();
        if pfn == 0 {
            return Err(ResolveError::FrameHidden);
        }

        let offset = (virt % self.page_size) as u64;
        Ok(PhysAddr(pfn * self.page_size as u64 + offset))
    }
}

/// One-shot translation of a single address of the calling process.
pub fn virt_to_phys(virt: usize) -> Result<PhysAddr, ResolveError> {
    PhysResolver::open_self()?.resolve(virt)
}
