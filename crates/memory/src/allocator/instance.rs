//! One allocator per strategy type
//!
//! [`AllocatorInstance<S>`] owns at most one `AllocatorBase<S>` per process,
//! keyed by the strategy's `TypeId`. Creating it runs `post_create`,
//! destroying it runs `pre_destroy`; [`AllocatorInstance::get`] creates it
//! lazily on first use.

use core::any::{Any, TypeId};
use core::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::base::AllocatorBase;
use super::manager::AllocatorManager;
use super::traits::Allocator;
use crate::error::{MemoryError, MemoryResult};

/// A strategy that can be owned by [`AllocatorInstance`]
pub trait InstanceAllocator: Allocator + Sized + 'static {
    /// Allocator name reported to the manager
    const NAME: &'static str;
    /// Human-readable description
    const DESCRIPTION: &'static str;
    /// Construction parameters; `Default` is used for lazy creation
    type Descriptor: Default;

    /// Build the strategy
    fn from_descriptor(descriptor: &Self::Descriptor) -> MemoryResult<Self>;
}

type InstanceMap = DashMap<TypeId, Arc<dyn Any + Send + Sync>>;

static INSTANCES: LazyLock<InstanceMap> = LazyLock::new(DashMap::new);

/// Process-wide owner of the single allocator for strategy `S`
///
/// # Examples
/// ```
/// use kiln_memory::allocator::{AllocatorInstance, PoolAllocator, PoolDescriptor};
///
/// let pool = AllocatorInstance::<PoolAllocator>::create_with(&PoolDescriptor {
///     block_size: 64,
///     ..PoolDescriptor::default()
/// })
/// .unwrap();
/// assert!(AllocatorInstance::<PoolAllocator>::is_ready());
/// assert_eq!(pool.strategy().descriptor().block_size, 64);
///
/// AllocatorInstance::<PoolAllocator>::destroy().unwrap();
/// assert!(!pool.is_ready());
/// ```
pub struct AllocatorInstance<S>(PhantomData<fn() -> S>);

impl<S: InstanceAllocator> AllocatorInstance<S> {
    fn downcast(entry: &Arc<dyn Any + Send + Sync>) -> Option<Arc<AllocatorBase<S>>> {
        Arc::clone(entry).downcast::<AllocatorBase<S>>().ok()
    }

    fn build(
        manager: &'static AllocatorManager,
        descriptor: &S::Descriptor,
    ) -> MemoryResult<Arc<AllocatorBase<S>>> {
        // Built before touching the map: a child strategy looks up its
        // parent instance here.
        let strategy = S::from_descriptor(descriptor)?;
        let allocator = AllocatorBase::builder(S::NAME, strategy)
            .description(S::DESCRIPTION)
            .manager(manager)
            .build();
        allocator.post_create();
        Ok(allocator)
    }

    /// Create the allocator with the default descriptor
    pub fn create() -> MemoryResult<Arc<AllocatorBase<S>>> {
        Self::create_with(&S::Descriptor::default())
    }

    /// Create the allocator, registering with the process-wide manager
    pub fn create_with(descriptor: &S::Descriptor) -> MemoryResult<Arc<AllocatorBase<S>>> {
        Self::create_in(AllocatorManager::global(), descriptor)
    }

    /// Create the allocator, registering with `manager`
    ///
    /// Fails with [`MemoryError::InvalidState`] when the instance exists.
    pub fn create_in(
        manager: &'static AllocatorManager,
        descriptor: &S::Descriptor,
    ) -> MemoryResult<Arc<AllocatorBase<S>>> {
        let already_created =
            || MemoryError::invalid_state(&format!("allocator '{}' already created", S::NAME));

        if INSTANCES.contains_key(&TypeId::of::<S>()) {
            return Err(already_created());
        }

        let allocator = Self::build(manager, descriptor)?;
        match INSTANCES.entry(TypeId::of::<S>()) {
            Entry::Occupied(_) => {
                allocator.pre_destroy();
                Err(already_created())
            }
            Entry::Vacant(slot) => {
                slot.insert(allocator.clone());
                debug!(allocator = S::NAME, "allocator instance created");
                Ok(allocator)
            }
        }
    }

    /// The allocator, created lazily with the default descriptor
    pub fn get() -> MemoryResult<Arc<AllocatorBase<S>>> {
        Self::get_in(AllocatorManager::global())
    }

    /// The allocator, created lazily against `manager`
    pub fn get_in(manager: &'static AllocatorManager) -> MemoryResult<Arc<AllocatorBase<S>>> {
        if let Some(existing) = Self::try_get() {
            return Ok(existing);
        }

        let allocator = Self::build(manager, &S::Descriptor::default())?;
        allocator.set_lazily_created(true);

        let winner = match INSTANCES.entry(TypeId::of::<S>()) {
            Entry::Occupied(entry) => Self::downcast(entry.get()),
            Entry::Vacant(slot) => {
                slot.insert(allocator.clone());
                debug!(allocator = S::NAME, "allocator instance created lazily");
                return Ok(allocator);
            }
        };

        // Another thread won the race.
        allocator.pre_destroy();
        winner.ok_or_else(|| {
            MemoryError::invalid_state(&format!("allocator '{}' has a mismatched instance", S::NAME))
        })
    }

    /// The allocator if it exists
    pub fn try_get() -> Option<Arc<AllocatorBase<S>>> {
        INSTANCES
            .get(&TypeId::of::<S>())
            .and_then(|entry| Self::downcast(entry.value()))
    }

    /// Whether the allocator exists and is ready
    pub fn is_ready() -> bool {
        Self::try_get().is_some_and(|allocator| allocator.is_ready())
    }

    /// Run `pre_destroy` and release the instance
    ///
    /// Outstanding `Arc` handles keep the object alive in the `Destroyed`
    /// state. Fails with [`MemoryError::NotFound`] when no instance exists.
    pub fn destroy() -> MemoryResult<()> {
        let (_, entry) = INSTANCES.remove(&TypeId::of::<S>()).ok_or_else(|| {
            MemoryError::not_found(&format!("allocator '{}' was never created", S::NAME))
        })?;

        if let Some(allocator) = Self::downcast(&entry) {
            allocator.pre_destroy();
        }
        debug!(allocator = S::NAME, "allocator instance destroyed");
        Ok(())
    }
}
