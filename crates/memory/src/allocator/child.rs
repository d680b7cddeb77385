//! Child allocators: named categories served by a parent instance
//!
//! A child owns no memory. Every request goes to the parent's
//! [`AllocatorBase`], so the parent's profiling and out-of-memory handling
//! apply, while the child keeps its own byte count for diagnostics.
//!
//! ```
//! use kiln_memory::allocator::{AllocatorInstance, ChildAllocator, ChildCategory, SystemAllocator};
//!
//! pub enum Meshes {}
//!
//! impl ChildCategory for Meshes {
//!     const NAME: &'static str = "MeshAllocator";
//!     const DESCRIPTION: &'static str = "Vertex and index buffers";
//! }
//!
//! pub type MeshAllocator = ChildAllocator<SystemAllocator, Meshes>;
//!
//! let meshes = AllocatorInstance::<MeshAllocator>::get().unwrap();
//! assert_eq!(meshes.name(), "MeshAllocator");
//! ```

use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::base::AllocatorBase;
use super::instance::{AllocatorInstance, InstanceAllocator};
use super::traits::{AllocationSite, Allocator};
use crate::error::{AllocResult, MemoryResult};

/// Names a child allocator category
pub trait ChildCategory: 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
}

/// Allocator forwarding to the [`AllocatorInstance`] of `P`
pub struct ChildAllocator<P: InstanceAllocator, C> {
    parent: Arc<AllocatorBase<P>>,
    allocated: AtomicUsize,
    _category: PhantomData<fn() -> C>,
}

impl<P: InstanceAllocator, C: ChildCategory> ChildAllocator<P, C> {
    /// Child of the parent instance, creating the parent if needed
    pub fn new() -> MemoryResult<Self> {
        Ok(Self::with_parent(AllocatorInstance::<P>::get()?))
    }

    /// Child of an explicit parent allocator
    pub fn with_parent(parent: Arc<AllocatorBase<P>>) -> Self {
        Self {
            parent,
            allocated: AtomicUsize::new(0),
            _category: PhantomData,
        }
    }

    pub fn parent(&self) -> &Arc<AllocatorBase<P>> {
        &self.parent
    }

    fn site() -> AllocationSite<'static> {
        AllocationSite::named(C::NAME)
    }
}

impl<P: InstanceAllocator, C> fmt::Debug for ChildAllocator<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildAllocator")
            .field("parent", &self.parent.name())
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .finish()
    }
}

// SAFETY: every block comes from the parent allocator and is returned to it
// with the same layout.
unsafe impl<P: InstanceAllocator, C: ChildCategory> Allocator for ChildAllocator<P, C> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: contract forwarded from the caller.
        let block = unsafe { self.parent.allocate(layout, 0, &Self::site())? };
        self.allocated.fetch_add(layout.size(), Ordering::Relaxed);
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: contract forwarded from the caller.
        unsafe { self.parent.deallocate(ptr, layout) };
        self.allocated.fetch_sub(layout.size(), Ordering::Relaxed);
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: contract forwarded from the caller.
        let block = unsafe {
            self.parent
                .reallocate(ptr, old_layout, new_layout, 0, &Self::site())?
        };
        self.allocated.fetch_add(new_layout.size(), Ordering::Relaxed);
        self.allocated.fetch_sub(old_layout.size(), Ordering::Relaxed);
        Ok(block)
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, layout: Layout, new_size: usize) -> usize {
        // SAFETY: contract forwarded from the caller.
        let size = unsafe { self.parent.resize(ptr, layout, new_size) };
        self.allocated.fetch_add(size, Ordering::Relaxed);
        self.allocated.fetch_sub(layout.size(), Ordering::Relaxed);
        size
    }

    fn num_allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    fn max_allocation_size(&self) -> usize {
        self.parent.strategy().max_allocation_size()
    }

    fn garbage_collect(&self) {
        self.parent.garbage_collect();
    }
}

impl<P: InstanceAllocator, C: ChildCategory> InstanceAllocator for ChildAllocator<P, C> {
    const NAME: &'static str = C::NAME;
    const DESCRIPTION: &'static str = C::DESCRIPTION;
    type Descriptor = ();

    fn from_descriptor(_descriptor: &Self::Descriptor) -> MemoryResult<Self> {
        Self::new()
    }
}
