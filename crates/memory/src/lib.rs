//! # kiln-memory
//!
//! Allocator lifecycle, registration and profiling for the Kiln engine.
//!
//! Every allocator is an allocation strategy wrapped in an
//! [`AllocatorBase`](allocator::AllocatorBase) that adds a name, a
//! `Constructed -> Ready -> Destroyed` lifecycle, registration with the
//! process-wide [`AllocatorManager`](allocator::AllocatorManager), profiling
//! hooks and out-of-memory delegation.
//!
//! ## Quick Start
//!
//! ```rust
//! use kiln_memory::prelude::*;
//!
//! let manager = AllocatorManager::instance();
//! manager.set_out_of_memory_listener(|event| {
//!     eprintln!("{} ran out of memory ({} bytes)", event.allocator.name(), event.byte_size);
//! });
//!
//! let pool = AllocatorInstance::<PoolAllocator>::create()?;
//! let layout = core::alloc::Layout::from_size_align(48, 8).unwrap();
//! let block = unsafe { pool.allocate(layout, 0, &allocation_site!("quick-start"))? };
//! unsafe { pool.deallocate(block.cast(), layout) };
//!
//! AllocatorInstance::<PoolAllocator>::destroy()?;
//! # Ok::<(), kiln_memory::MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `pool` (default): [`InstancePool`](pool::InstancePool) object recycling
//!
//! ## Contract violations
//!
//! Destroying a ready allocator, registering twice and unregistering an
//! unknown allocator are programmer errors. They are logged through
//! `tracing` and panic in debug builds; release builds log and continue
//! without corrupting the registry.

#![cfg_attr(docsrs, feature(doc_cfg))]
// Strategies hand out raw memory.
#![allow(unsafe_code)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Precision loss in usize -> f64 casts is acceptable for stats
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::return_self_not_must_use)]

mod macros;

pub mod allocator;
pub mod config;
pub mod error;
#[cfg(feature = "pool")]
#[cfg_attr(docsrs, doc(cfg(feature = "pool")))]
pub mod pool;
pub mod records;

pub use crate::config::ManagerConfig;
pub use crate::error::{MemoryError, MemoryResult, Result};

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::allocation_site;
    pub use crate::allocator::{
        AllocationSite, Allocator, AllocatorBase, AllocatorId, AllocatorInstance,
        AllocatorManager, AllocatorStats, ChildAllocator, ChildCategory, InstanceAllocator,
        LifecycleState, ManagedAllocator, OutOfMemoryEvent, PoolAllocator, PoolDescriptor,
        SystemAllocator,
    };
    pub use crate::config::ManagerConfig;
    pub use crate::error::{MemoryError, MemoryResult};
    #[cfg(feature = "pool")]
    pub use crate::pool::{InstancePool, InstancePoolManager};
    pub use crate::records::{AllocationRecords, RecordMode, RecordsSink};
}
