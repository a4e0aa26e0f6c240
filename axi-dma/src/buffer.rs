// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Page-aligned, page-locked DMA buffers
//!
//! A `LockedBuffer` only owns the physical frames. It exposes
//! no slice of its cached mapping: after setup every access to the data goes
//! through the uncached window obtained from [`crate::DevMem::map`], which
//! aliases the same frames.

use std::alloc::{self, Layout};
use std::io;
use std::ptr::{self, NonNull};

use log::{debug, warn};

use crate::error::{Error, Result};

pub struct LockedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    locked: bool,
}

impl LockedBuffer {
    /// Allocates `size` bytes aligned to the page size and locks them into
    /// RAM. `size` must be a non-zero multiple of the page size.
    pub fn new(size: usize) -> Result<Self> {
        let page = crate::page_size();
        if size == 0 || size % page != 0 {
            return Err(Error::Allocation { size, align: page });
        }

        let layout =
            Layout::from_size_align(size, page).map_err(|_| Error::Allocation { size, align: page })?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::Allocation { size, align: page })?;

        let mut buffer = Self {
            ptr,
            layout,
            locked: false,
        };
        buffer.touch(page);
        buffer.lock()?;

        debug!("locked {} bytes at {:#x}", size, buffer.virt_addr());
        Ok(buffer)
    }

    /// Faults every page in so the page map has an entry for it.
    fn touch(&mut self, page: usize) {
        for offset in (0..self.layout.size()).step_by(page) {
            // SAFETY: offset is inside the allocation.
            unsafe { ptr::write_volatile(self.ptr.as_ptr().add(offset), 0) };
        }
    }

    fn lock(&mut self) -> Result<()> {
        // SAFETY: the range is a live allocation owned by self.
        let ret = unsafe { libc::mlock(self.ptr.as_ptr().cast(), self.layout.size()) };
        if ret != 0 {
            return Err(Error::Lock {
                addr: self.virt_addr(),
                size: self.layout.size(),
                source: io::Error::last_os_error(),
            });
        }
        self.locked = true;
        Ok(())
    }

    /// Start of the cached mapping, for physical address resolution only.
    pub fn virt_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for LockedBuffer {
    fn drop(&mut self) {
        if self.locked {
            // SAFETY: same range that was locked in `lock`.
            let ret = unsafe { libc::munlock(self.ptr.as_ptr().cast(), self.layout.size()) };
            if ret != 0 {
                warn!(
                    "munlock({:#x}) failed: {}",
                    self.virt_addr(),
                    io::Error::last_os_error()
                );
            }
        }
        // SAFETY: allocated in `new` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_page_multiple() {
        let page = crate::page_size();
        for size in [0, 1, page - 4, page + 4] {
            match LockedBuffer::new(size) {
                Err(Error::Allocation { size: s, align }) => {
                    assert_eq!(s, size);
                    assert_eq!(align, page);
                }
                Err(err) => panic!("unexpected error for {}: {}", size, err),
                Ok(_) => panic!("size {} accepted", size),
            }
        }
    }

    #[test]
    fn test_allocation_is_page_aligned_and_locked() {
        let page = crate::page_size();
        match LockedBuffer::new(2 * page) {
            Ok(buffer) => {
                assert_eq!(buffer.virt_addr() % page, 0);
                assert_eq!(buffer.len(), 2 * page);
                assert!(buffer.is_locked());
            }
            // RLIMIT_MEMLOCK can be zero in restricted sandboxes.
            Err(Error::Lock { size, .. }) => assert_eq!(size, 2 * page),
            Err(err) => panic!("unexpected error: {}", err),
        }
    }
}
