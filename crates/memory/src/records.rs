//! Allocation records: the instrumentation sink behind allocator profiling
//!
//! An allocator never owns its sink. [`AllocatorBase::set_records`] keeps a
//! `Weak` reference, so dropping the last `Arc<AllocationRecords>` silently
//! turns profiling events into no-ops.
//!
//! [`AllocatorBase::set_records`]: crate::allocator::AllocatorBase::set_records

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::allocator::AllocationSite;
use crate::config::ManagerConfig;

/// How much detail [`AllocationRecords`] keeps per live allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordMode {
    /// Count events only, keep no per-pointer entries
    #[default]
    NoRecords,
    /// Keep size and alignment per pointer
    Basic,
    /// Keep size, alignment and the allocation site per pointer
    Full,
}

/// A single allocation as seen by the profiling hooks
#[derive(Debug, Clone, Copy)]
pub struct AllocationEvent<'a> {
    /// Name of the allocator that served the request
    pub allocator: &'a str,
    /// Start address of the block
    pub address: usize,
    /// Requested size in bytes
    pub byte_size: usize,
    /// Requested alignment in bytes
    pub alignment: usize,
    /// Where the request came from
    pub site: AllocationSite<'a>,
    /// Number of stack frames the sink should skip when capturing a stack
    pub suppress_stack_record: u32,
}

/// Receiver of allocator profiling events.
///
/// Implementations run on the allocation path of arbitrary threads and must
/// be cheap. A panicking sink is caught by the allocator and logged; it
/// never fails the allocation that triggered it.
pub trait RecordsSink: Send + Sync {
    /// A block was handed out
    fn on_allocation(&self, event: &AllocationEvent<'_>);

    /// A block was returned
    fn on_deallocation(&self, address: usize, byte_size: usize, alignment: usize);

    /// A reallocation of `address` is about to happen
    fn on_reallocation_begin(&self, _address: usize, _new_size: usize) {}

    /// A reallocation finished; `new_address` may equal `old_address`
    fn on_reallocation_end(
        &self,
        _old_address: usize,
        _new_address: usize,
        _new_size: usize,
        _new_alignment: usize,
    ) {
    }

    /// A block was resized in place
    fn on_resize(&self, _address: usize, _new_size: usize) {}

    /// Bytes of guard memory this sink wants around each allocation
    fn memory_guard_size(&self) -> usize {
        0
    }
}

/// Details kept for one live allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Size in bytes
    pub byte_size: usize,
    /// Alignment in bytes
    pub alignment: usize,
    /// Allocation name, [`RecordMode::Full`] only
    pub name: Option<String>,
    /// Source file, [`RecordMode::Full`] only
    pub file_name: Option<String>,
    /// Source line, [`RecordMode::Full`] only
    pub line: u32,
}

/// Default [`RecordsSink`] keeping a map of live allocations
#[derive(Debug)]
pub struct AllocationRecords {
    mode: RecordMode,
    guard_size: usize,
    live: Mutex<HashMap<usize, AllocationInfo>>,
    in_flight: Mutex<HashMap<usize, AllocationInfo>>,
    total_events: AtomicUsize,
}

impl AllocationRecords {
    /// Create records with the given mode and no guard
    pub fn new(mode: RecordMode) -> Self {
        Self::with_guard(mode, 0)
    }

    /// Create records with the given mode and guard size
    pub fn with_guard(mode: RecordMode, guard_size: usize) -> Self {
        Self {
            mode,
            guard_size,
            live: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            total_events: AtomicUsize::new(0),
        }
    }

    /// Create records from the manager defaults
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::with_guard(config.default_record_mode, config.default_guard_size)
    }

    /// Record mode
    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    /// Number of live allocations currently recorded
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    /// Whether no live allocation is recorded
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Sum of the sizes of every recorded live allocation
    pub fn total_bytes(&self) -> usize {
        self.live.lock().values().map(|info| info.byte_size).sum()
    }

    /// Number of events received, including those not kept in the map
    pub fn total_events(&self) -> usize {
        self.total_events.load(Ordering::Relaxed)
    }

    /// Look up a live allocation by address
    pub fn find(&self, address: usize) -> Option<AllocationInfo> {
        self.live.lock().get(&address).cloned()
    }

    /// Copy of every live allocation, sorted by address
    pub fn snapshot(&self) -> Vec<(usize, AllocationInfo)> {
        let mut entries: Vec<_> = self
            .live
            .lock()
            .iter()
            .map(|(address, info)| (*address, info.clone()))
            .collect();
        entries.sort_unstable_by_key(|(address, _)| *address);
        entries
    }

    fn info_for(&self, event: &AllocationEvent<'_>) -> AllocationInfo {
        let full = self.mode == RecordMode::Full;
        AllocationInfo {
            byte_size: event.byte_size,
            alignment: event.alignment,
            name: event.site.name.filter(|_| full).map(str::to_owned),
            file_name: event.site.file_name.filter(|_| full).map(str::to_owned),
            line: if full { event.site.line } else { 0 },
        }
    }
}

impl RecordsSink for AllocationRecords {
    fn on_allocation(&self, event: &AllocationEvent<'_>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.mode == RecordMode::NoRecords {
            return;
        }
        let info = self.info_for(event);
        self.live.lock().insert(event.address, info);
    }

    fn on_deallocation(&self, address: usize, _byte_size: usize, _alignment: usize) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.mode == RecordMode::NoRecords {
            return;
        }
        self.live.lock().remove(&address);
    }

    fn on_reallocation_begin(&self, address: usize, _new_size: usize) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.mode == RecordMode::NoRecords {
            return;
        }
        // The old address may be reused by another thread before the
        // reallocation ends, so park the entry outside the live map.
        if let Some(info) = self.live.lock().remove(&address) {
            self.in_flight.lock().insert(address, info);
        }
    }

    fn on_reallocation_end(
        &self,
        old_address: usize,
        new_address: usize,
        new_size: usize,
        new_alignment: usize,
    ) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.mode == RecordMode::NoRecords {
            return;
        }
        let mut info = self
            .in_flight
            .lock()
            .remove(&old_address)
            .unwrap_or(AllocationInfo {
                byte_size: new_size,
                alignment: new_alignment,
                name: None,
                file_name: None,
                line: 0,
            });
        info.byte_size = new_size;
        info.alignment = new_alignment;
        self.live.lock().insert(new_address, info);
    }

    fn on_resize(&self, address: usize, new_size: usize) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if let Some(info) = self.live.lock().get_mut(&address) {
            info.byte_size = new_size;
        }
    }

    fn memory_guard_size(&self) -> usize {
        self.guard_size
    }
}
