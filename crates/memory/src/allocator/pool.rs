//! Fixed-block pool allocator
//!
//! Pages are requested from the system and carved into equally sized
//! blocks. Freed blocks go on a free list and are reused first. An optional
//! page budget makes the pool fail (and so reach the out-of-memory hook)
//! instead of growing without bound.
//!
//! # Safety
//!
//! - Every block handed out lies inside a page owned by `PoolState::pages`
//! - Pages are only released by `garbage_collect` when no block is live,
//!   and by `Drop`
//! - All state is behind a `parking_lot::Mutex`

use core::alloc::Layout;
use core::ptr::NonNull;
use std::alloc::{GlobalAlloc, System};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::instance::InstanceAllocator;
use super::traits::Allocator;
use crate::error::{AllocError, AllocResult, MemoryError, MemoryResult};

/// Pool construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDescriptor {
    /// Largest request a block can serve
    pub block_size: usize,
    /// Alignment of every block
    pub block_align: usize,
    /// Blocks carved out of each page
    pub blocks_per_page: usize,
    /// Maximum number of pages, `None` for unbounded growth
    pub max_pages: Option<usize>,
}

impl Default for PoolDescriptor {
    fn default() -> Self {
        Self {
            block_size: 256,
            block_align: 16,
            blocks_per_page: 64,
            max_pages: None,
        }
    }
}

impl PoolDescriptor {
    /// Validate the descriptor
    pub fn validate(&self) -> MemoryResult<()> {
        if self.block_size == 0 {
            return Err(MemoryError::invalid_config("block_size cannot be zero"));
        }
        if !self.block_align.is_power_of_two() {
            return Err(MemoryError::invalid_config("block_align must be a power of two"));
        }
        if self.blocks_per_page == 0 {
            return Err(MemoryError::invalid_config("blocks_per_page cannot be zero"));
        }
        if self.max_pages == Some(0) {
            return Err(MemoryError::invalid_config("max_pages cannot be zero"));
        }
        Ok(())
    }
}

struct PoolState {
    free: Vec<NonNull<u8>>,
    pages: Vec<NonNull<u8>>,
    live_blocks: usize,
}

// SAFETY: the raw pointers refer to pages owned by the pool; they are only
// touched while the surrounding mutex is held.
unsafe impl Send for PoolState {}

/// Allocator handing out fixed-size blocks from system pages
pub struct PoolAllocator {
    descriptor: PoolDescriptor,
    stride: usize,
    page_layout: Layout,
    state: Mutex<PoolState>,
}

impl core::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PoolAllocator")
            .field("descriptor", &self.descriptor)
            .field("pages", &state.pages.len())
            .field("live_blocks", &state.live_blocks)
            .finish()
    }
}

impl PoolAllocator {
    /// Create a pool from a validated descriptor
    pub fn new(descriptor: PoolDescriptor) -> MemoryResult<Self> {
        descriptor.validate()?;

        let stride = descriptor
            .block_size
            .checked_next_multiple_of(descriptor.block_align)
            .ok_or_else(|| MemoryError::size_overflow("pool stride"))?;
        let page_size = stride
            .checked_mul(descriptor.blocks_per_page)
            .ok_or_else(|| MemoryError::size_overflow("pool page size"))?;
        let page_layout = Layout::from_size_align(page_size, descriptor.block_align)
            .map_err(|_| MemoryError::invalid_layout("pool page layout"))?;

        Ok(Self {
            descriptor,
            stride,
            page_layout,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                pages: Vec::new(),
                live_blocks: 0,
            }),
        })
    }

    /// Descriptor the pool was built from
    pub fn descriptor(&self) -> &PoolDescriptor {
        &self.descriptor
    }

    /// Number of pages currently held
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Number of blocks currently handed out
    pub fn live_blocks(&self) -> usize {
        self.state.lock().live_blocks
    }

    fn grow(&self, state: &mut PoolState) -> AllocResult<()> {
        if let Some(max_pages) = self.descriptor.max_pages
            && state.pages.len() >= max_pages
        {
            return Err(AllocError::pool_exhausted(
                "PoolAllocator",
                max_pages * self.descriptor.blocks_per_page,
            ));
        }

        // SAFETY: page_layout has non-zero size (validated descriptor).
        let page = NonNull::new(unsafe { System.alloc(self.page_layout) })
            .ok_or_else(|| AllocError::allocation_failed_with_layout(self.page_layout))?;

        state.free.reserve(self.descriptor.blocks_per_page);
        // Push in reverse so blocks are handed out in address order.
        for index in (0..self.descriptor.blocks_per_page).rev() {
            // SAFETY: index * stride stays inside the page.
            state.free.push(unsafe { page.add(index * self.stride) });
        }
        state.pages.push(page);
        trace!(pages = state.pages.len(), "pool grew by one page");
        Ok(())
    }

    fn release_pages(&self, state: &mut PoolState) {
        state.free.clear();
        for page in state.pages.drain(..) {
            // SAFETY: every page was allocated with page_layout in `grow`.
            unsafe { System.dealloc(page.as_ptr(), self.page_layout) };
        }
    }
}

// SAFETY: blocks are disjoint slices of pages owned by the pool, aligned to
// block_align, and all bookkeeping is serialized by the mutex.
unsafe impl Allocator for PoolAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.align() > self.descriptor.block_align {
            return Err(AllocError::invalid_alignment(layout.align()));
        }
        if layout.size() > self.descriptor.block_size {
            return Err(AllocError::allocation_too_large(
                layout.size(),
                self.descriptor.block_size,
            ));
        }

        let mut state = self.state.lock();
        if state.free.is_empty() {
            self.grow(&mut state)?;
        }
        let block = state
            .free
            .pop()
            .ok_or_else(|| AllocError::allocation_failed_with_layout(layout))?;
        state.live_blocks += 1;

        Ok(NonNull::slice_from_raw_parts(block, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        let mut state = self.state.lock();
        debug_assert!(
            state.pages.iter().any(|page| {
                let start = page.as_ptr() as usize;
                (start..start + self.page_layout.size()).contains(&(ptr.as_ptr() as usize))
            }),
            "pointer does not belong to this pool"
        );
        state.free.push(ptr);
        state.live_blocks -= 1;
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        _old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // Every block has the same capacity, so a fitting request stays put.
        if new_layout.size() <= self.descriptor.block_size
            && new_layout.align() <= self.descriptor.block_align
        {
            return Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()));
        }
        if new_layout.align() > self.descriptor.block_align {
            return Err(AllocError::invalid_alignment(new_layout.align()));
        }
        Err(AllocError::allocation_too_large(
            new_layout.size(),
            self.descriptor.block_size,
        ))
    }

    unsafe fn resize(&self, _ptr: NonNull<u8>, layout: Layout, new_size: usize) -> usize {
        if new_size <= self.descriptor.block_size {
            new_size
        } else {
            layout.size()
        }
    }

    fn num_allocated_bytes(&self) -> usize {
        self.state.lock().live_blocks * self.stride
    }

    fn capacity(&self) -> usize {
        self.state.lock().pages.len() * self.page_layout.size()
    }

    fn max_allocation_size(&self) -> usize {
        self.descriptor.block_size
    }

    fn garbage_collect(&self) {
        let mut state = self.state.lock();
        if state.live_blocks == 0 && !state.pages.is_empty() {
            debug!(pages = state.pages.len(), "pool released idle pages");
            self.release_pages(&mut state);
        }
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let mut state = core::mem::replace(
            state,
            PoolState {
                free: Vec::new(),
                pages: Vec::new(),
                live_blocks: 0,
            },
        );
        self.release_pages(&mut state);
    }
}

impl InstanceAllocator for PoolAllocator {
    const NAME: &'static str = "PoolAllocator";
    const DESCRIPTION: &'static str = "Fixed-block pool allocator for small, frequent allocations";
    type Descriptor = PoolDescriptor;

    fn from_descriptor(descriptor: &Self::Descriptor) -> MemoryResult<Self> {
        Self::new(descriptor.clone())
    }
}
