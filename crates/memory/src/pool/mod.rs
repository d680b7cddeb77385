//! Object recycling on top of the active allocator
//!
//! Unlike the allocators in [`crate::allocator`], these pools never hand out
//! raw memory. They keep constructed objects around and reset them between
//! uses.

mod instance_pool;
mod manager;

pub use instance_pool::{DEFAULT_MAX_FREE, InstancePool};
pub use manager::InstancePoolManager;
