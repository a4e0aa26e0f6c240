// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Error types for the exerciser

use std::io;

use crate::regs::DmaSr;
use crate::verify::VerifyReport;

/// Result type used throughout the crate
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Why a virtual address could not be turned into a physical one.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("cannot open page map: {0}")]
    Open(#[source] io::Error),
    #[error("cannot read page map entry: {0}")]
    Read(#[source] io::Error),
    #[error("short page map read ({0} of 8 bytes)")]
    ShortRead(usize),
    #[error("page is not resident{}", swap_note(.swapped))]
    NotPresent { swapped: bool },
    #[error("frame number hidden by the kernel (missing CAP_SYS_ADMIN?)")]
    FrameHidden,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot open {path}: {source}")]
    Privilege {
        path: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("cannot allocate {size} bytes aligned to {align}")]
    Allocation { size: usize, align: usize },
    #[error("cannot lock {size} bytes at {addr:#x} into RAM: {source}")]
    Lock {
        addr: usize,
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("cannot resolve physical address of {virt:#x}: {reason}")]
    Resolution {
        virt: usize,
        #[source]
        reason: ResolveError,
    },
    #[error("cannot map {len:#x} bytes at physical {phys:#x}: {source}")]
    Mapping {
        phys: u64,
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error(
        "DMA hardware error (MM2S DMASR {}, S2MM DMASR {})",
        status_word(.tx),
        status_word(.rx)
    )]
    Hardware { tx: u32, rx: u32 },
    #[error("DMA did not complete after {polls} status polls")]
    Timeout { polls: u64 },
    #[error("{} of {} words differ after transfer", .0.mismatches, .0.words)]
    Verification(VerifyReport),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn swap_note(swapped: &bool) -> &'static str {
    if *swapped {
        " (swapped out)"
    } else {
        " (never faulted in)"
    }
}

fn status_word(bits: &u32) -> String {
    DmaSr::from_bits_retain(*bits).describe()
}

impl Error {
    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Privilege { .. } => 2,
            Error::Allocation { .. } | Error::Lock { .. } => 3,
            Error::Resolution { .. } => 4,
            Error::Mapping { .. } => 5,
            Error::Hardware { .. } => 6,
            Error::Timeout { .. } => 7,
            Error::Verification(_) => 8,
            Error::Config(_) => 9,
            Error::Io(_) => 10,
        }
    }
}
