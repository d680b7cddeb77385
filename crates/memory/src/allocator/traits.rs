//! Allocation strategy trait
//!
//! A strategy only knows how to hand out and take back memory. Naming,
//! lifecycle, registration and profiling live in
//! [`AllocatorBase`](super::AllocatorBase), which composes any strategy.
//!
//! # Safety
//!
//! `Allocator` is an unsafe trait: implementors promise that
//! - returned pointers are valid for reads and writes of the requested size
//!   and aligned to the requested alignment,
//! - a block is never handed out twice while live,
//! - all methods are safe to call concurrently from several threads
//!   (the trait requires `Send + Sync`).

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::error::{AllocError, AllocResult};

/// Validate a layout before it reaches a strategy
#[inline]
pub(crate) fn validate_layout(layout: Layout) -> AllocResult<()> {
    if !layout.align().is_power_of_two() {
        return Err(AllocError::invalid_alignment(layout.align()));
    }

    if layout.size() > isize::MAX as usize - (layout.align() - 1) {
        return Err(AllocError::size_overflow("layout padding"));
    }

    Ok(())
}

/// Where an allocation request originates, for profiling and diagnostics.
///
/// Build one with [`allocation_site!`](crate::allocation_site) to capture
/// the current file and line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationSite<'a> {
    /// Free-form allocation name (usually the type or subsystem)
    pub name: Option<&'a str>,
    /// Source file of the request
    pub file_name: Option<&'a str>,
    /// Source line of the request
    pub line: u32,
}

impl<'a> AllocationSite<'a> {
    /// Site carrying only a name
    pub const fn named(name: &'a str) -> Self {
        Self {
            name: Some(name),
            file_name: None,
            line: 0,
        }
    }
}

/// Allocation strategy: allocate, deallocate and resize
///
/// # Safety Requirements
///
/// Implementors must ensure that:
/// - Returned pointers are valid for the requested size
/// - Memory is properly aligned according to the layout
/// - Deallocation only occurs for previously allocated pointers
/// - Every method is thread-safe
pub unsafe trait Allocator: Send + Sync {
    /// Allocates memory with the given layout
    ///
    /// # Safety
    /// - Memory content is uninitialized and must be initialized before use
    /// - The block must be released with [`Allocator::deallocate`] using the
    ///   same layout
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Deallocates memory at the given pointer with the specified layout
    ///
    /// # Safety
    /// - `ptr` must have been allocated by this allocator
    /// - `layout` must match the original allocation layout exactly
    /// - After this call, `ptr` becomes invalid and must not be used
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Moves an allocation to a block of `new_layout`, preserving contents
    ///
    /// The default implementation allocates, copies `min(old, new)` bytes
    /// and frees the old block.
    ///
    /// # Safety
    /// - `ptr` must have been allocated by this allocator with `old_layout`
    /// - On success `ptr` is invalid; on failure it stays valid
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        validate_layout(new_layout)?;

        if old_layout == new_layout {
            return Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()));
        }

        // SAFETY: new_layout validated above; contract forwarded from caller.
        let new_ptr = unsafe { self.allocate(new_layout)? };

        let copy_size = old_layout.size().min(new_layout.size());
        // SAFETY: both blocks are live, distinct and at least `copy_size` long.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr().cast::<u8>(), copy_size);
            self.deallocate(ptr, old_layout);
        }
        Ok(new_ptr)
    }

    /// Attempts to resize a block in place
    ///
    /// Returns the new usable size when the block now holds `new_size`
    /// bytes, or `layout.size()` when it could not be resized. The pointer
    /// never moves.
    ///
    /// # Safety
    /// - `ptr` must have been allocated by this allocator with `layout`
    /// - On success the caller must use `Layout::from_size_align(new_size,
    ///   layout.align())` for later calls
    unsafe fn resize(&self, _ptr: NonNull<u8>, layout: Layout, _new_size: usize) -> usize {
        layout.size()
    }

    /// Bytes currently handed out by this strategy, when it tracks them
    fn num_allocated_bytes(&self) -> usize {
        0
    }

    /// Bytes the strategy has reserved from the system, when known
    fn capacity(&self) -> usize {
        0
    }

    /// Largest single allocation this strategy can satisfy
    fn max_allocation_size(&self) -> usize {
        isize::MAX as usize
    }

    /// Release cached memory back to the system
    fn garbage_collect(&self) {}
}

// SAFETY: forwards every call to the referenced allocator.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        unsafe { (**self).allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        unsafe { (**self).reallocate(ptr, old_layout, new_layout) }
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, layout: Layout, new_size: usize) -> usize {
        unsafe { (**self).resize(ptr, layout, new_size) }
    }

    fn num_allocated_bytes(&self) -> usize {
        (**self).num_allocated_bytes()
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn max_allocation_size(&self) -> usize {
        (**self).max_allocation_size()
    }

    fn garbage_collect(&self) {
        (**self).garbage_collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_layouts() {
        assert!(validate_layout(Layout::new::<u64>()).is_ok());
        assert!(validate_layout(Layout::from_size_align(0, 4096).unwrap()).is_ok());
    }

    #[test]
    fn named_site_has_no_location() {
        let site = AllocationSite::named("scratch");
        assert_eq!(site.name, Some("scratch"));
        assert_eq!(site.file_name, None);
        assert_eq!(site.line, 0);
    }
}
