//! System allocator implementation
//!
//! Wraps the platform allocator (`std::alloc::System`) behind the
//! [`Allocator`] strategy trait. It is the default parent for
//! [`ChildAllocator`](super::ChildAllocator) categories.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::System;

use super::instance::InstanceAllocator;
use super::traits::{Allocator, validate_layout};
use crate::error::{AllocError, AllocResult, MemoryResult};

/// Wrapper for the system's default allocator
///
/// # Thread Safety
/// The system allocator is inherently thread-safe as it uses the platform's
/// default memory management which handles concurrent allocations properly.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    allocated: AtomicUsize,
}

impl SystemAllocator {
    /// Creates a new `SystemAllocator`
    #[inline]
    pub const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
        }
    }
}

// SAFETY: every block comes from `System` with the caller's layout, and
// `System` is thread-safe.
unsafe impl Allocator for SystemAllocator {
    #[inline]
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        validate_layout(layout)?;

        if layout.size() == 0 {
            // Zero-sized requests get a well-aligned dangling pointer.
            let ptr = NonNull::new(core::ptr::without_provenance_mut::<u8>(layout.align()))
                .unwrap_or(NonNull::dangling());
            return Ok(NonNull::slice_from_raw_parts(ptr, 0));
        }

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { System.alloc(layout) };

        let block = NonNull::new(ptr)
            .map(|ptr| NonNull::slice_from_raw_parts(ptr, layout.size()))
            .ok_or_else(|| AllocError::allocation_failed_with_layout(layout))?;
        self.allocated.fetch_add(layout.size(), Ordering::Relaxed);
        Ok(block)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        // SAFETY: caller guarantees ptr came from `allocate` with this layout.
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
        self.allocated.fetch_sub(layout.size(), Ordering::Relaxed);
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        validate_layout(new_layout)?;

        // System realloc keeps the alignment, so only use it when it matches.
        if old_layout.align() == new_layout.align()
            && old_layout.size() > 0
            && new_layout.size() > 0
        {
            // SAFETY: ptr is live with old_layout; the new size is non-zero.
            let new_ptr = unsafe { System.realloc(ptr.as_ptr(), old_layout, new_layout.size()) };
            let block = NonNull::new(new_ptr)
                .map(|ptr| NonNull::slice_from_raw_parts(ptr, new_layout.size()))
                .ok_or_else(|| AllocError::allocation_failed_with_layout(new_layout))?;
            self.allocated.fetch_add(new_layout.size(), Ordering::Relaxed);
            self.allocated.fetch_sub(old_layout.size(), Ordering::Relaxed);
            return Ok(block);
        }

        // SAFETY: fall back to allocate + copy + free; contract forwarded.
        let new_ptr = unsafe { self.allocate(new_layout)? };
        let copy_size = old_layout.size().min(new_layout.size());
        if copy_size > 0 {
            // SAFETY: both blocks are live, distinct and at least copy_size long.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    ptr.as_ptr(),
                    new_ptr.as_ptr().cast::<u8>(),
                    copy_size,
                );
            }
        }
        // SAFETY: ptr is still live with old_layout.
        unsafe { self.deallocate(ptr, old_layout) };
        Ok(new_ptr)
    }

    fn num_allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl InstanceAllocator for SystemAllocator {
    const NAME: &'static str = "SystemAllocator";
    const DESCRIPTION: &'static str = "Generic, platform-backed allocator for all memory types";
    type Descriptor = ();

    fn from_descriptor(_descriptor: &Self::Descriptor) -> MemoryResult<Self> {
        Ok(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_reallocate_preserve_contents() {
        let alloc = SystemAllocator::new();
        let layout = Layout::from_size_align(16, 8).unwrap();
        let grown = Layout::from_size_align(64, 8).unwrap();

        unsafe {
            let block = alloc.allocate(layout).unwrap();
            let ptr = block.cast::<u8>();
            ptr.as_ptr().write_bytes(0xAB, 16);

            let moved = alloc.reallocate(ptr, layout, grown).unwrap();
            let moved = moved.cast::<u8>();
            assert_eq!(*moved.as_ptr().add(15), 0xAB);
            assert_eq!(alloc.num_allocated_bytes(), 64);
            alloc.deallocate(moved, grown);
        }
        assert_eq!(alloc.num_allocated_bytes(), 0);
    }

    #[test]
    fn zero_sized_allocation_is_aligned() {
        let alloc = SystemAllocator::new();
        let layout = Layout::from_size_align(0, 64).unwrap();
        let block = unsafe { alloc.allocate(layout).unwrap() };
        assert_eq!(block.cast::<u8>().as_ptr() as usize % 64, 0);
        unsafe { alloc.deallocate(block.cast(), layout) };
    }

    #[test]
    fn stricter_alignment_falls_back_to_copy() {
        let alloc = SystemAllocator::new();
        let old = Layout::from_size_align(32, 8).unwrap();
        let new = Layout::from_size_align(32, 256).unwrap();

        unsafe {
            let ptr = alloc.allocate(old).unwrap().cast::<u8>();
            ptr.as_ptr().write_bytes(7, 32);
            let moved = alloc.reallocate(ptr, old, new).unwrap().cast::<u8>();
            assert_eq!(moved.as_ptr() as usize % 256, 0);
            assert_eq!(*moved.as_ptr(), 7);
            assert_eq!(alloc.num_allocated_bytes(), 32);
            alloc.deallocate(moved, new);
        }
        assert_eq!(alloc.num_allocated_bytes(), 0);
    }
}
