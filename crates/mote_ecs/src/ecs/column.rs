//! # Erased Column
//!
//! One runtime archetype column: a raw byte buffer holding values of a single
//! component type described by a [`ComponentInfo`]. Growth allocates a buffer
//! twice the size, moves every element over and frees the old buffer.

// SAFETY: This module manages raw allocations. Every element in `0..len` is
// initialized; slots in `len..capacity` are not.
#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::{self, NonNull};

use super::component::ComponentInfo;
use crate::error::{EcsError, EcsResult};

/// A growable, type-erased array of one component type.
pub struct ErasedColumn {
    info: ComponentInfo,
    data: NonNull<u8>,
    len: usize,
    capacity: usize,
}

impl ErasedColumn {
    /// Creates a column with room for `capacity` values (at least 1).
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if the buffer cannot be allocated.
    pub fn with_capacity(info: ComponentInfo, capacity: usize) -> EcsResult<Self> {
        let mut column = Self {
            info,
            data: dangling(&info),
            len: 0,
            capacity: if info.size() == 0 { usize::MAX } else { 0 },
        };
        column.grow_to(capacity.max(1))?;
        Ok(column)
    }

    /// Number of stored values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Values that fit before the next growth.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Base pointer of the buffer.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Pointer to slot `row`.
    ///
    /// # Safety
    ///
    /// `row` must be `<= capacity`.
    #[inline]
    #[must_use]
    pub unsafe fn slot(&self, row: usize) -> *mut u8 {
        // SAFETY: In bounds of the allocation per the caller.
        unsafe { self.data.as_ptr().add(row * self.info.size()) }
    }

    /// Grows the buffer to hold at least `capacity` values.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if the new buffer cannot be allocated;
    /// the column is unchanged in that case.
    pub fn grow_to(&mut self, capacity: usize) -> EcsResult<()> {
        if capacity <= self.capacity {
            return Ok(());
        }

        let new_layout = array_layout(&self.info, capacity)?;
        // SAFETY: Non-zero size: zero-sized types never reach this point since
        // their capacity is `usize::MAX`.
        let new_ptr = unsafe { alloc(new_layout) };
        let new_ptr = NonNull::new(new_ptr).ok_or(EcsError::OutOfMemory {
            bytes: new_layout.size(),
        })?;

        if self.capacity > 0 {
            // SAFETY: Both buffers hold at least `len` slots and do not overlap.
            // Moving is bitwise; the old slots are freed without dropping.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.data.as_ptr(),
                    new_ptr.as_ptr(),
                    self.len * self.info.size(),
                );
                dealloc(self.data.as_ptr(), array_layout(&self.info, self.capacity)?);
            }
        }

        self.data = new_ptr;
        self.capacity = capacity;
        Ok(())
    }

    /// Doubles the capacity if the next push would not fit.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if growing fails.
    pub fn reserve_one(&mut self) -> EcsResult<()> {
        if self.len < self.capacity {
            return Ok(());
        }
        self.grow_to(self.capacity.saturating_mul(2).max(1))
    }

    /// Appends a value moved out of `src`.
    ///
    /// # Safety
    ///
    /// `src` points to an initialized value of this column's type whose
    /// ownership moves into the column. [`ErasedColumn::reserve_one`] must have
    /// succeeded since the last push.
    pub unsafe fn push_moved(&mut self, src: *const u8) {
        debug_assert!(self.len < self.capacity, "push without reserve");
        // SAFETY: Slot `len` is within capacity and uninitialized.
        unsafe {
            ptr::copy_nonoverlapping(src, self.slot(self.len), self.info.size());
        }
        self.len += 1;
    }

    /// Drops the value at `row` and moves the value at `src` into its place.
    ///
    /// # Safety
    ///
    /// `row < len`; `src` as in [`ErasedColumn::push_moved`].
    pub unsafe fn replace_moved(&mut self, row: usize, src: *const u8) {
        debug_assert!(row < self.len, "replace out of bounds");
        // SAFETY: The slot is initialized; after dropping it is overwritten.
        unsafe {
            let slot = self.slot(row);
            self.info.drop_in_place(slot);
            ptr::copy_nonoverlapping(src, slot, self.info.size());
        }
    }

    /// Drops the value at `row` in place, leaving the slot uninitialized.
    ///
    /// # Safety
    ///
    /// `row < len`. The slot must be refilled or forgotten with
    /// [`ErasedColumn::swap_remove_forget`] before the column is used again.
    pub unsafe fn drop_at(&mut self, row: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe { self.info.drop_in_place(self.slot(row)) };
    }

    /// Drops the value at `row` and moves the last value into its place.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) {
        assert!(row < self.len, "swap_remove out of bounds");
        // SAFETY: `row` is initialized; it is dropped once and then refilled
        // (or forgotten if it was the last slot).
        unsafe {
            self.drop_at(row);
            self.swap_remove_forget(row);
        }
    }

    /// Moves the last value into `row` without dropping `row`.
    ///
    /// # Safety
    ///
    /// `row < len` and its value has already been moved out or dropped.
    pub unsafe fn swap_remove_forget(&mut self, row: usize) {
        debug_assert!(row < self.len, "swap_remove out of bounds");
        let last = self.len - 1;
        if row != last {
            // SAFETY: Distinct in-bounds slots; the last one is vacated.
            unsafe {
                ptr::copy_nonoverlapping(self.slot(last), self.slot(row), self.info.size());
            }
        }
        self.len = last;
    }

    /// Drops every value.
    pub fn clear(&mut self) {
        let len = self.len;
        self.len = 0;
        if self.info.needs_drop() {
            for row in 0..len {
                // SAFETY: Rows below the old length are initialized and no
                // longer reachable through `len`.
                unsafe { self.info.drop_in_place(self.slot(row)) };
            }
        }
    }
}

impl Drop for ErasedColumn {
    fn drop(&mut self) {
        self.clear();
        if self.info.size() > 0 && self.capacity > 0 {
            if let Ok(layout) = array_layout(&self.info, self.capacity) {
                // SAFETY: We allocated this buffer with this layout.
                unsafe { dealloc(self.data.as_ptr(), layout) };
            }
        }
    }
}

/// Layout of `capacity` consecutive values.
fn array_layout(info: &ComponentInfo, capacity: usize) -> EcsResult<Layout> {
    let bytes = info
        .size()
        .checked_mul(capacity)
        .ok_or(EcsError::OutOfMemory { bytes: usize::MAX })?;
    Layout::from_size_align(bytes, info.align()).map_err(|_| EcsError::OutOfMemory { bytes })
}

/// Aligned, non-null pointer for a buffer that owns no allocation yet.
fn dangling(info: &ComponentInfo) -> NonNull<u8> {
    NonNull::new(ptr::null_mut::<u8>().wrapping_add(info.align())).unwrap_or(NonNull::dangling())
}
