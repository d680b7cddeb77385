//! Recycling pool of boxed instances
//!
//! `get_instance` hands out a recycled object when one is available and
//! builds a fresh one otherwise. `recycle_instance` runs the reset callback
//! and keeps the object for the next caller, up to `max_free` objects.
//!
//! # Example
//! ```
//! use kiln_memory::pool::InstancePool;
//!
//! let pool = InstancePool::new("buffers", || Vec::<u8>::with_capacity(1024))
//!     .with_reset(Vec::clear);
//!
//! let mut buffer = pool.get_instance();
//! buffer.extend_from_slice(b"payload");
//! pool.recycle_instance(buffer);
//!
//! let buffer = pool.get_instance();
//! assert!(buffer.is_empty());
//! assert!(buffer.capacity() >= 1024);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

/// Default number of idle instances a pool keeps
pub const DEFAULT_MAX_FREE: usize = 64;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Thread-safe pool recycling `Box<T>` instances
pub struct InstancePool<T> {
    name: String,
    free: Mutex<Vec<Box<T>>>,
    factory: Factory<T>,
    reset: Reset<T>,
    max_free: usize,
    created: AtomicUsize,
    reused: AtomicUsize,
    discarded: AtomicUsize,
}

impl<T: Send + 'static> InstancePool<T> {
    /// Create an empty pool building instances with `factory`
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            free: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            reset: Box::new(|_| {}),
            max_free: DEFAULT_MAX_FREE,
            created: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Callback run on every recycled instance
    #[must_use]
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Box::new(reset);
        self
    }

    /// Maximum number of idle instances kept; extra recycled instances are dropped
    #[must_use]
    pub fn with_max_free(mut self, max_free: usize) -> Self {
        self.max_free = max_free;
        self
    }

    /// Build `count` instances up front, bounded by `max_free`
    pub fn pre_warm(&self, count: usize) {
        let mut free = self.free.lock();
        let count = count.min(self.max_free.saturating_sub(free.len()));
        free.extend((0..count).map(|_| Box::new((self.factory)())));
        self.created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A recycled instance, or a new one when none is idle
    pub fn get_instance(&self) -> Box<T> {
        if let Some(instance) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return instance;
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        Box::new((self.factory)())
    }

    /// Reset `instance` and keep it for reuse
    pub fn recycle_instance(&self, mut instance: Box<T>) {
        (self.reset)(&mut instance);

        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(instance);
        } else {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(pool = %self.name, "pool full, dropping recycled instance");
        }
    }

    /// Number of idle instances
    pub fn free_len(&self) -> usize {
        self.free.lock().len()
    }

    /// Instances built by the factory so far
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Requests served from the free list
    pub fn reused_count(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }

    /// Recycled instances dropped because the pool was full
    pub fn discarded_count(&self) -> usize {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Drop every idle instance
    pub fn clear(&self) {
        self.free.lock().clear();
    }
}

impl<T> fmt::Debug for InstancePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancePool")
            .field("name", &self.name)
            .field("free", &self.free.lock().len())
            .field("max_free", &self.max_free)
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reuses_recycled_instances() {
        let pool = InstancePool::new("strings", String::new).with_reset(String::clear);

        let mut first = pool.get_instance();
        first.push_str("dirty");
        let address = core::ptr::from_ref::<String>(&first);
        pool.recycle_instance(first);

        let second = pool.get_instance();
        assert_eq!(core::ptr::from_ref::<String>(&second), address);
        assert!(second.is_empty());
        assert_eq!(pool.created_count(), 1);
        assert_eq!(pool.reused_count(), 1);
    }

    #[test]
    fn max_free_bounds_idle_instances() {
        let pool = InstancePool::new("bounded", || 0u64).with_max_free(2);
        let instances: Vec<_> = (0..3).map(|_| pool.get_instance()).collect();
        for instance in instances {
            pool.recycle_instance(instance);
        }
        assert_eq!(pool.free_len(), 2);
        assert_eq!(pool.discarded_count(), 1);
    }

    #[test]
    fn pre_warm_respects_bound() {
        let pool = InstancePool::new("warm", Vec::<u8>::new).with_max_free(4);
        pool.pre_warm(10);
        assert_eq!(pool.free_len(), 4);
        assert_eq!(pool.created_count(), 4);

        pool.clear();
        assert_eq!(pool.free_len(), 0);
    }

    #[test]
    fn shared_across_threads() {
        let pool = Arc::new(InstancePool::new("shared", || vec![0u8; 16]).with_reset(|v| v.fill(0)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buffer = pool.get_instance();
                        buffer[0] = 1;
                        pool.recycle_instance(buffer);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.created_count() <= 4);
        assert_eq!(pool.created_count() + pool.reused_count(), 400);
    }
}
