//! Named registry of instance pools
//!
//! Pools are shared: every caller asking for the same name gets the same
//! `Arc<InstancePool<T>>`. Asking for a name with a different element type
//! is an error rather than a silent second pool.

use core::any::{Any, TypeId, type_name};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::instance_pool::InstancePool;
use crate::error::{MemoryError, MemoryResult};

struct PoolEntry {
    type_id: TypeId,
    type_name: &'static str,
    pool: Arc<dyn Any + Send + Sync>,
}

/// Registry of [`InstancePool`]s keyed by name
#[derive(Default)]
pub struct InstancePoolManager {
    pools: DashMap<String, PoolEntry>,
}

impl InstancePoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn downcast<T: Send + 'static>(name: &str, entry: &PoolEntry) -> MemoryResult<Arc<InstancePool<T>>> {
        if entry.type_id != TypeId::of::<T>() {
            return Err(MemoryError::invalid_operation(&format!(
                "pool '{name}' holds {}, not {}",
                entry.type_name,
                type_name::<T>()
            )));
        }
        Arc::clone(&entry.pool)
            .downcast::<InstancePool<T>>()
            .map_err(|_| MemoryError::invalid_operation(&format!("pool '{name}' has a mismatched type")))
    }

    /// Register `pool` under its name
    ///
    /// Fails with [`MemoryError::InvalidState`] when the name is taken.
    pub fn register_pool<T: Send + 'static>(&self, pool: InstancePool<T>) -> MemoryResult<Arc<InstancePool<T>>> {
        let name = pool.name().to_owned();
        match self.pools.entry(name) {
            Entry::Occupied(entry) => Err(MemoryError::invalid_state(&format!(
                "pool '{}' already exists",
                entry.key()
            ))),
            Entry::Vacant(slot) => {
                let pool = Arc::new(pool);
                debug!(pool = %slot.key(), element = type_name::<T>(), "instance pool created");
                slot.insert(PoolEntry {
                    type_id: TypeId::of::<T>(),
                    type_name: type_name::<T>(),
                    pool: pool.clone(),
                });
                Ok(pool)
            }
        }
    }

    /// Create and register a pool with a reset callback
    pub fn create_pool<T, F, R>(&self, name: &str, factory: F, reset: R) -> MemoryResult<Arc<InstancePool<T>>>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.register_pool(InstancePool::new(name, factory).with_reset(reset))
    }

    /// The pool registered under `name`
    ///
    /// Fails with [`MemoryError::NotFound`] for an unknown name and
    /// [`MemoryError::InvalidOperation`] when the element type differs.
    pub fn get_pool<T: Send + 'static>(&self, name: &str) -> MemoryResult<Arc<InstancePool<T>>> {
        let entry = self
            .pools
            .get(name)
            .ok_or_else(|| MemoryError::not_found(&format!("pool '{name}'")))?;
        Self::downcast(name, entry.value())
    }

    /// The pool registered under `name`, created with `factory` if missing
    pub fn get_or_create_pool<T, F>(&self, name: &str, factory: F) -> MemoryResult<Arc<InstancePool<T>>>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let entry = self.pools.entry(name.to_owned()).or_insert_with(|| {
            debug!(pool = name, element = type_name::<T>(), "instance pool created");
            PoolEntry {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                pool: Arc::new(InstancePool::new(name, factory)),
            }
        });
        Self::downcast(name, entry.value())
    }

    /// Remove the pool named `name`; outstanding handles keep it alive
    pub fn remove_pool(&self, name: &str) -> bool {
        self.pools.remove(name).is_some()
    }

    /// Number of registered pools
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Registered pool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }
}

impl core::fmt::Debug for InstancePoolManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstancePoolManager")
            .field("pools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn pools_are_shared_by_name() {
        let manager = InstancePoolManager::new();
        let created = manager
            .create_pool("rows", Vec::<u32>::new, Vec::clear)
            .unwrap();
        let fetched = manager.get_pool::<Vec<u32>>("rows").unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(manager.names(), vec!["rows".to_owned()]);
    }

    #[rstest]
    #[case::missing("labels", "MEM:NOT_FOUND")]
    #[case::wrong_type("rows", "MEM:INVALID_OP")]
    fn lookup_failures(#[case] name: &str, #[case] code: &str) {
        let manager = InstancePoolManager::new();
        manager.create_pool("rows", Vec::<u32>::new, Vec::clear).unwrap();

        let err = manager.get_pool::<String>(name).unwrap_err();
        assert_eq!(err.code(), code);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let manager = InstancePoolManager::new();
        manager.create_pool("rows", String::new, String::clear).unwrap();
        let err = manager
            .create_pool("rows", String::new, String::clear)
            .unwrap_err();
        assert_eq!(err.code(), "MEM:LIFECYCLE:STATE");
    }

    #[test]
    fn get_or_create_reuses_existing_pool() {
        let manager = InstancePoolManager::new();
        let first = manager.get_or_create_pool("ids", || 0u64).unwrap();
        let second = manager.get_or_create_pool("ids", || 1u64).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.get_instance(), 0);

        assert!(manager.remove_pool("ids"));
        assert!(manager.is_empty());
    }
}
