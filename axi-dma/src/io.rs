// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Volatile register cells

use core::mem::MaybeUninit;
use core::ops::{BitAnd, BitOr, Not};
use core::ptr;

/// A readable and writable hardware cell.
pub trait Io {
    type Value: Copy
        + PartialEq
        + BitAnd<Output = Self::Value>
        + BitOr<Output = Self::Value>
        + Not<Output = Self::Value>;

    fn read(&self) -> Self::Value;
    fn write(&mut self, value: Self::Value);

    /// Returns true if every bit in `flags` is set.
    #[inline(always)]
    fn readf(&self, flags: Self::Value) -> bool {
        (self.read() & flags) == flags
    }

    /// Read-modify-write of `flags`.
    #[inline(always)]
    fn writef(&mut self, flags: Self::Value, value: bool) {
        let tmp = if value {
            self.read() | flags
        } else {
            self.read() & !flags
        };
        self.write(tmp);
    }
}

/// Memory-mapped register. Every access is a single volatile load or store.
#[repr(transparent)]
pub struct Mmio<T> {
    value: MaybeUninit<T>,
}

impl<T> Mmio<T> {
    /// Creates a cell holding `value`, for register blocks that live in
    /// ordinary memory.
    pub const fn new(value: T) -> Self {
        Self {
            value: MaybeUninit::new(value),
        }
    }
}

impl<T: Default> Default for Mmio<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Io for Mmio<T>
where
    T: Copy + PartialEq + BitAnd<Output = T> + BitOr<Output = T> + Not<Output = T>,
{
    type Value = T;

    #[inline(always)]
    fn read(&self) -> T {
        // SAFETY: the cell is always initialised, either by `new` or by the
        // device behind the mapping.
        unsafe { ptr::read_volatile(self.value.as_ptr()) }
    }

    #[inline(always)]
    fn write(&mut self, value: T) {
        // SAFETY: see `read`.
        unsafe { ptr::write_volatile(self.value.as_mut_ptr(), value) }
    }
}
