//! Allocator statistics tracking
//!
//! Every [`AllocatorBase`](super::AllocatorBase) keeps an
//! [`AtomicAllocatorStats`] regardless of whether profiling is active, so
//! the manager can report per-allocator usage without a records sink.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for memory allocators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Total bytes currently allocated
    pub allocated_bytes: usize,
    /// Peak bytes allocated
    pub peak_allocated_bytes: usize,
    /// Total number of allocations
    pub allocation_count: usize,
    /// Total number of deallocations
    pub deallocation_count: usize,
    /// Total number of reallocations and in-place resizes
    pub reallocation_count: usize,
    /// Number of failed allocations
    pub failed_allocations: usize,
    /// Number of times the out-of-memory listener ran for this allocator
    pub out_of_memory_events: usize,
}

impl AllocatorStats {
    /// Check if there are any active allocations
    pub fn has_active_allocations(&self) -> bool {
        self.allocation_count > self.deallocation_count
    }

    /// Calculate current allocation efficiency (0.0 to 1.0)
    pub fn allocation_efficiency(&self) -> f64 {
        let total_attempts = self.allocation_count + self.failed_allocations;
        if total_attempts > 0 {
            self.allocation_count as f64 / total_attempts as f64
        } else {
            1.0
        }
    }
}

impl core::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} bytes live (peak {}), {} allocs / {} frees / {} reallocs, {} failed",
            self.allocated_bytes,
            self.peak_allocated_bytes,
            self.allocation_count,
            self.deallocation_count,
            self.reallocation_count,
            self.failed_allocations,
        )
    }
}

/// Thread-safe atomic version of allocator statistics
#[derive(Debug, Default)]
pub struct AtomicAllocatorStats {
    allocated_bytes: AtomicUsize,
    peak_allocated_bytes: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
    reallocation_count: AtomicUsize,
    failed_allocations: AtomicUsize,
    out_of_memory_events: AtomicUsize,
}

impl AtomicAllocatorStats {
    /// Creates a new empty atomic stats object
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicUsize::new(0),
            peak_allocated_bytes: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            deallocation_count: AtomicUsize::new(0),
            reallocation_count: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
            out_of_memory_events: AtomicUsize::new(0),
        }
    }

    /// Record a successful allocation
    pub fn record_allocation(&self, size: usize) {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        let new_allocated = self.allocated_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_allocated_bytes
            .fetch_max(new_allocated, Ordering::Relaxed);
    }

    /// Record a successful deallocation
    pub fn record_deallocation(&self, size: usize) {
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
        // Saturate: a strategy may report frees of blocks allocated before
        // the stats were reset.
        let _ = self
            .allocated_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(size))
            });
    }

    /// Record a successful reallocation or resize
    pub fn record_reallocation(&self, old_size: usize, new_size: usize) {
        self.reallocation_count.fetch_add(1, Ordering::Relaxed);

        if new_size > old_size {
            let grown = self
                .allocated_bytes
                .fetch_add(new_size - old_size, Ordering::Relaxed)
                + (new_size - old_size);
            self.peak_allocated_bytes.fetch_max(grown, Ordering::Relaxed);
        } else if old_size > new_size {
            let _ = self
                .allocated_bytes
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.saturating_sub(old_size - new_size))
                });
        }
    }

    /// Record a failed allocation
    pub fn record_allocation_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an out-of-memory listener invocation
    pub fn record_out_of_memory(&self) {
        self.out_of_memory_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            peak_allocated_bytes: self.peak_allocated_bytes.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            deallocation_count: self.deallocation_count.load(Ordering::Relaxed),
            reallocation_count: self.reallocation_count.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            out_of_memory_events: self.out_of_memory_events.load(Ordering::Relaxed),
        }
    }
}
