// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Uncached physical memory windows through `/dev/mem`
//!
//! Opening the device with `O_SYNC` makes the kernel map the pages
//! non-cacheable, so stores are visible to the DMA master immediately and
//! loads never return a stale line from the buffer's cached alias.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::{align_of, size_of};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::verify::WordBuffer;

pub const DEV_MEM_PATH: &str = "/dev/mem";

/// Handle on the privileged memory device. Mappings created from it stay
/// valid after the handle is dropped.
pub struct DevMem {
    file: File,
}

impl DevMem {
    pub fn open() -> Result<Self> {
        Self::open_path(DEV_MEM_PATH).map_err(|source| Error::Privilege {
            path: DEV_MEM_PATH,
            source,
        })
    }

    /// Opens any file that supports `mmap` at physical offsets.
    pub fn open_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)?;
        Ok(Self { file })
    }

    /// Maps `len` bytes starting at physical address `phys`.
    ///
    /// `phys` need not be page aligned; the window is widened to page
    /// boundaries internally.
    pub fn map(&self, phys: u64, len: usize) -> Result<PhysMapping> {
        let mapping_err = |source| Error::Mapping { phys, len, source };
        if len == 0 {
            return Err(mapping_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty mapping",
            )));
        }

        let page = crate::page_size() as u64;
        let aligned = phys & !(page - 1);
        let offset = (phys - aligned) as usize;
        let map_len = offset + len;

        let file_offset = libc::off_t::try_from(aligned).map_err(|_| {
            mapping_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "physical address exceeds off_t",
            ))
        })?;

        // SAFETY: fresh mapping chosen by the kernel; nothing aliases it yet.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                file_offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(mapping_err(io::Error::last_os_error()));
        }
        let base = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| mapping_err(io::Error::from(io::ErrorKind::AddrNotAvailable)))?;

        debug!(
            "mapped phys {:#x}+{:#x} at {:p}",
            phys,
            len,
            base.as_ptr()
        );

        Ok(PhysMapping {
            base,
            map_len,
            offset,
            len,
            phys,
        })
    }
}

/// One uncached window onto physical memory, unmapped on drop.
pub struct PhysMapping {
    base: NonNull<u8>,
    map_len: usize,
    offset: usize,
    len: usize,
    phys: u64,
}

impl PhysMapping {
    pub fn phys(&self) -> u64 {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First byte of the requested range.
    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: offset < map_len.
        unsafe { self.base.as_ptr().add(self.offset) }
    }

    fn word_ptr(&self, index: usize) -> *mut u32 {
        assert!(
            (index + 1) * 4 <= self.len,
            "word {} outside {:#x}-byte window",
            index,
            self.len
        );
        // SAFETY: bounds checked above.
        unsafe { self.as_ptr().add(index * 4).cast::<u32>() }
    }

    pub fn read_u32(&self, index: usize) -> u32 {
        // SAFETY: in bounds; device or RAM memory is always readable.
        unsafe { ptr::read_volatile(self.word_ptr(index)) }
    }

    pub fn write_u32(&mut self, index: usize, value: u32) {
        // SAFETY: in bounds and the mapping is writable.
        unsafe { ptr::write_volatile(self.word_ptr(index), value) }
    }

    /// Views the start of the window as a register block.
    ///
    /// # Safety
    ///
    /// `T` must be a layout of volatile cells matching the device at
    /// `phys()`; every bit pattern must be valid for it.
    pub unsafe fn as_mut<T>(&mut self) -> Option<&mut T> {
        let ptr = self.as_ptr();
        if size_of::<T>() > self.len || (ptr as usize) % align_of::<T>() != 0 {
            return None;
        }
        Some(&mut *ptr.cast::<T>())
    }
}

impl WordBuffer for PhysMapping {
    fn word_count(&self) -> usize {
        self.len / 4
    }

    fn read_word(&self, index: usize) -> u32 {
        self.read_u32(index)
    }

    fn write_word(&mut self, index: usize, value: u32) {
        self.write_u32(index, value)
    }
}

impl Drop for PhysMapping {
    fn drop(&mut self) {
        // SAFETY: exactly the range returned by mmap in `DevMem::map`.
        let ret = unsafe { libc::munmap(self.base.as_ptr().cast(), self.map_len) };
        if ret != 0 {
            warn!(
                "munmap of phys {:#x} failed: {}",
                self.phys,
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// Backing file standing in for physical memory.
    struct Scratch(PathBuf);

    impl Scratch {
        fn new(name: &str, len: u64) -> Self {
            let path = std::env::temp_dir().join(format!(
                "axi-dma-{}-{}",
                name,
                std::process::id()
            ));
            let file = File::create(&path).unwrap();
            file.set_len(len).unwrap();
            Scratch(path)
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_unaligned_window_hits_right_bytes() {
        let page = crate::page_size();
        let scratch = Scratch::new("unaligned", 2 * page as u64);
        let mem = DevMem::open_path(&scratch.0).unwrap();

        {
            let mut window = mem.map(page as u64 + 0x10, 8).unwrap();
            assert_eq!(window.word_count(), 2);
            window.write_u32(0, 0xAA00_0001);
            window.write_u32(1, 0xDEAD_BEEF);
            assert_eq!(window.read_u32(1), 0xDEAD_BEEF);
        }

        let bytes = fs::read(&scratch.0).unwrap();
        let at = page + 0x10;
        assert_eq!(&bytes[at..at + 4], &0xAA00_0001u32.to_ne_bytes());
        assert_eq!(&bytes[at + 4..at + 8], &0xDEAD_BEEFu32.to_ne_bytes());
    }

    #[test]
    fn test_two_windows_alias_same_bytes() {
        let page = crate::page_size();
        let scratch = Scratch::new("alias", page as u64);
        let mem = DevMem::open_path(&scratch.0).unwrap();

        let mut a = mem.map(0, page).unwrap();
        let b = mem.map(0, page).unwrap();
        drop(mem);

        a.write_u32(3, 0x1234_5678);
        assert_eq!(b.read_u32(3), 0x1234_5678);
    }

    #[test]
    fn test_empty_mapping_is_rejected() {
        let scratch = Scratch::new("empty", 4096);
        let mem = DevMem::open_path(&scratch.0).unwrap();
        assert!(matches!(mem.map(0, 0), Err(Error::Mapping { len: 0, .. })));
    }

    #[test]
    #[should_panic]
    fn test_out_of_window_word_panics() {
        let scratch = Scratch::new("bounds", 4096);
        let mem = DevMem::open_path(&scratch.0).unwrap();
        let window = mem.map(0, 16).unwrap();
        window.read_u32(4);
    }
}
