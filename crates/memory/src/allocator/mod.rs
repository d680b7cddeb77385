//! Allocators, their lifecycle and the process-wide registry
//!
//! - [`Allocator`]: the allocation strategy (system, pool, child)
//! - [`AllocatorBase`]: lifecycle, registration and profiling around a strategy
//! - [`AllocatorManager`]: registry of live allocators and the out-of-memory listener
//! - [`AllocatorInstance`]: at most one allocator per strategy type

mod base;
mod child;
mod instance;
mod manager;
mod pool;
mod stats;
mod system;
mod traits;

pub use base::{AllocatorBase, AllocatorBaseBuilder, LifecycleState};
pub use child::{ChildAllocator, ChildCategory};
pub use instance::{AllocatorInstance, InstanceAllocator};
pub use manager::{
    AllocatorId, AllocatorInfo, AllocatorManager, ManagedAllocator, OutOfMemoryEvent,
    OutOfMemoryListener,
};
pub use pool::{PoolAllocator, PoolDescriptor};
pub use stats::{AllocatorStats, AtomicAllocatorStats};
pub use system::SystemAllocator;
pub use traits::{AllocationSite, Allocator};
