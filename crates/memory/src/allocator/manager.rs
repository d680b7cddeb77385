//! Process-wide allocator registry
//!
//! The manager tracks every live allocator for enumeration and diagnostics.
//! It never owns them: entries are `Weak` handles, and each allocator removes
//! itself in [`AllocatorBase::pre_destroy`](super::AllocatorBase::pre_destroy).
//!
//! # Readiness and the pre-registration queue
//!
//! A manager starts out not ready. Allocators created before
//! [`AllocatorManager::initialize`] runs are appended to a pending queue
//! guarded by its own lock. `initialize` drains that queue exactly once;
//! after the drain, late pre-registrations go straight to the registry, and
//! after [`AllocatorManager::shutdown`] they are ignored.

use core::fmt;
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::stats::AllocatorStats;
use super::traits::AllocationSite;
use crate::config::ManagerConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::macros::lifecycle_assert;

/// Unique identifier for allocators
///
/// Uses `NonZeroUsize` so `Option<AllocatorId>` stays pointer-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocatorId(NonZeroUsize);

impl AllocatorId {
    /// Generate a new process-unique allocator ID
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        // COUNTER starts at 1; wrapping takes 2^64 allocators.
        Self(NonZeroUsize::new(id).unwrap_or(NonZeroUsize::MIN))
    }

    /// Raw ID value
    #[inline]
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for AllocatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type-erased view of a registered allocator
///
/// Implemented by [`AllocatorBase`](super::AllocatorBase) for every strategy.
pub trait ManagedAllocator: Send + Sync {
    /// Process-unique identifier
    fn id(&self) -> AllocatorId;
    /// Stable allocator name
    fn name(&self) -> &str;
    /// Human-readable description
    fn description(&self) -> &str;
    /// Whether `post_create` completed and `pre_destroy` has not started
    fn is_ready(&self) -> bool;
    /// Whether a higher-priority allocator may replace this one
    fn can_be_overridden(&self) -> bool;
    /// Whether the allocator was created on first use
    fn is_lazily_created(&self) -> bool;
    /// Whether profiling events are emitted
    fn is_profiling_active(&self) -> bool;
    /// Toggle profiling events
    fn set_profiling_active(&self, active: bool);
    /// Usage counters
    fn stats(&self) -> AllocatorStats;
    /// Bytes handed out by the strategy
    fn num_allocated_bytes(&self) -> usize;
    /// Bytes reserved by the strategy
    fn capacity(&self) -> usize;
    /// Release cached memory
    fn garbage_collect(&self);
}

/// Diagnostic snapshot of one registered allocator
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorInfo {
    pub id: AllocatorId,
    pub name: String,
    pub description: String,
    pub is_ready: bool,
    pub is_lazily_created: bool,
    pub is_profiling_active: bool,
    pub can_be_overridden: bool,
    pub num_allocated_bytes: usize,
    pub capacity: usize,
    pub stats: AllocatorStats,
}

impl AllocatorInfo {
    fn capture(allocator: &dyn ManagedAllocator) -> Self {
        Self {
            id: allocator.id(),
            name: allocator.name().to_owned(),
            description: allocator.description().to_owned(),
            is_ready: allocator.is_ready(),
            is_lazily_created: allocator.is_lazily_created(),
            is_profiling_active: allocator.is_profiling_active(),
            can_be_overridden: allocator.can_be_overridden(),
            num_allocated_bytes: allocator.num_allocated_bytes(),
            capacity: allocator.capacity(),
            stats: allocator.stats(),
        }
    }
}

/// Arguments passed to the out-of-memory listener
#[derive(Clone, Copy)]
pub struct OutOfMemoryEvent<'a> {
    /// Allocator whose strategy failed
    pub allocator: &'a dyn ManagedAllocator,
    /// Requested size in bytes
    pub byte_size: usize,
    /// Requested alignment in bytes
    pub alignment: usize,
    /// Caller-defined allocation flags
    pub flags: u32,
    /// Allocation name, if the caller gave one
    pub name: Option<&'a str>,
    /// Source file of the request
    pub file_name: Option<&'a str>,
    /// Source line of the request
    pub line: u32,
}

impl fmt::Debug for OutOfMemoryEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutOfMemoryEvent")
            .field("allocator", &self.allocator.name())
            .field("byte_size", &self.byte_size)
            .field("alignment", &self.alignment)
            .field("flags", &self.flags)
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("line", &self.line)
            .finish()
    }
}

/// Process-wide out-of-memory callback
pub type OutOfMemoryListener = Box<dyn Fn(&OutOfMemoryEvent<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ManagerState {
    NotReady = 0,
    Ready = 1,
    ShutDown = 2,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotReady,
            1 => Self::Ready,
            _ => Self::ShutDown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Collecting,
    Drained,
    ShutDown,
}

struct PendingQueue {
    state: QueueState,
    entries: Vec<(AllocatorId, Weak<dyn ManagedAllocator>)>,
}

/// Registry of live allocators
///
/// # Examples
/// ```
/// use kiln_memory::allocator::{AllocatorManager, AllocatorBase, SystemAllocator};
/// use kiln_memory::config::ManagerConfig;
///
/// let manager: &'static AllocatorManager =
///     Box::leak(Box::new(AllocatorManager::new(ManagerConfig::default())));
/// manager.initialize().unwrap();
///
/// let allocator = AllocatorBase::builder("Pool-A", SystemAllocator::new())
///     .manager(manager)
///     .build();
/// allocator.post_create();
/// assert!(manager.find_by_name("Pool-A").is_some());
///
/// allocator.pre_destroy();
/// assert!(manager.is_empty());
/// ```
pub struct AllocatorManager {
    config: ManagerConfig,
    state: AtomicU8,
    allocators: DashMap<AllocatorId, Weak<dyn ManagedAllocator>>,
    pending: Mutex<PendingQueue>,
    out_of_memory_listener: ArcSwapOption<OutOfMemoryListener>,
}

static GLOBAL_MANAGER: OnceLock<AllocatorManager> = OnceLock::new();

impl AllocatorManager {
    /// Create a manager in the not-ready state
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(ManagerState::NotReady as u8),
            allocators: DashMap::new(),
            pending: Mutex::new(PendingQueue {
                state: QueueState::Collecting,
                entries: Vec::new(),
            }),
            out_of_memory_listener: ArcSwapOption::empty(),
        }
    }

    /// Create a manager after validating `config`
    pub fn try_new(config: ManagerConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// The process-wide manager, constructed on first access
    ///
    /// The returned manager may not be ready yet; allocators created against
    /// it queue themselves until [`initialize`](Self::initialize) runs.
    pub fn global() -> &'static Self {
        GLOBAL_MANAGER.get_or_init(|| Self::new(ManagerConfig::default()))
    }

    /// The process-wide manager, initialized on first access
    pub fn instance() -> &'static Self {
        let manager = Self::global();
        if manager.state() == ManagerState::NotReady {
            // Losing the race to another initializer is fine.
            let _ = manager.initialize();
        }
        manager
    }

    /// Construct the process-wide manager with a custom configuration
    ///
    /// Fails with [`MemoryError::InvalidState`] when the global manager
    /// already exists.
    pub fn configure_global(config: ManagerConfig) -> MemoryResult<&'static Self> {
        config.validate()?;

        let mut constructed = false;
        let manager = GLOBAL_MANAGER.get_or_init(|| {
            constructed = true;
            Self::new(config)
        });

        if constructed {
            Ok(manager)
        } else {
            Err(MemoryError::invalid_state(
                "global allocator manager already constructed",
            ))
        }
    }

    /// Whether the process-wide manager exists and is ready
    pub fn is_global_ready() -> bool {
        GLOBAL_MANAGER.get().is_some_and(Self::is_ready)
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether registrations go straight to the registry
    pub fn is_ready(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.state() == ManagerState::ShutDown
    }

    /// Make the manager ready and replay the pre-registration queue
    ///
    /// Runs at most once; later calls fail with
    /// [`MemoryError::InvalidState`].
    pub fn initialize(&self) -> MemoryResult<()> {
        let mut pending = self.pending.lock();
        match pending.state {
            QueueState::Collecting => {}
            QueueState::Drained => {
                return Err(MemoryError::invalid_state(
                    "allocator manager already initialized",
                ));
            }
            QueueState::ShutDown => {
                return Err(MemoryError::invalid_state(
                    "allocator manager has been shut down",
                ));
            }
        }

        pending.state = QueueState::Drained;
        let entries = core::mem::take(&mut pending.entries);
        let queued = entries.len();
        // Upgraded handles outlive the queue lock: dropping the last one runs
        // `AllocatorBase::drop`, which takes the lock again.
        let mut replayed = Vec::with_capacity(queued);

        // The queue lock stays held while replaying so a concurrent
        // `cancel_pre_registration` observes either the queued entry or the
        // registered one, never neither.
        for (id, allocator) in entries {
            match allocator.upgrade() {
                Some(allocator) => {
                    self.register_allocator(&allocator);
                    replayed.push(allocator);
                }
                None => debug!(%id, "skipping pre-registered allocator that no longer exists"),
            }
        }

        self.state
            .store(ManagerState::Ready as u8, Ordering::Release);
        drop(pending);

        info!(queued, replayed = replayed.len(), "allocator manager ready");
        drop(replayed);
        Ok(())
    }

    /// Queue an allocator created before the manager is ready
    ///
    /// After the queue has been drained the allocator is registered
    /// directly; after shutdown the request is ignored.
    pub fn pre_register_allocator(&self, allocator: &Arc<dyn ManagedAllocator>) {
        // Nothing calls into the allocator while the queue is locked.
        let id = allocator.id();
        let name = allocator.name();

        let mut pending = self.pending.lock();
        match pending.state {
            QueueState::Collecting => {
                let duplicate = pending.entries.iter().any(|(queued, _)| *queued == id);
                if !duplicate {
                    pending.entries.push((id, Arc::downgrade(allocator)));
                }
                drop(pending);

                lifecycle_assert!(!duplicate, "allocator '{name}' ({id}) pre-registered twice");
                if !duplicate {
                    debug!(allocator = name, %id, "allocator queued for registration");
                }
            }
            QueueState::Drained => {
                drop(pending);
                self.register_allocator(allocator);
            }
            QueueState::ShutDown => {
                drop(pending);
                warn!(
                    allocator = name,
                    "allocator manager is shut down, ignoring pre-registration"
                );
            }
        }
    }

    /// Remove a still-queued allocator; returns whether it was queued
    pub fn cancel_pre_registration(&self, id: AllocatorId) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.entries.len();
        pending.entries.retain(|(queued, _)| *queued != id);
        before != pending.entries.len()
    }

    /// Number of allocators waiting for the manager to become ready
    pub fn pending_len(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Add an allocator to the live set
    ///
    /// Registering the same allocator twice is a contract violation; release
    /// builds keep the first entry.
    pub fn register_allocator(&self, allocator: &Arc<dyn ManagedAllocator>) {
        let id = allocator.id();
        let inserted = match self.allocators.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(allocator));
                true
            }
        };

        lifecycle_assert!(
            inserted,
            "allocator '{}' ({id}) registered twice",
            allocator.name()
        );
        if !inserted {
            return;
        }

        if self.config.default_profiling {
            allocator.set_profiling_active(true);
        }
        debug!(allocator = allocator.name(), %id, "allocator registered");
    }

    /// Remove an allocator from the live set
    ///
    /// Removing an allocator that is not registered is a contract violation;
    /// release builds log it and leave the registry unchanged.
    pub fn unregister_allocator(&self, allocator: &dyn ManagedAllocator) {
        let id = allocator.id();
        let removed = self.allocators.remove(&id).is_some();
        lifecycle_assert!(
            removed,
            "allocator '{}' ({id}) unregistered but not registered",
            allocator.name()
        );
        if removed {
            debug!(allocator = allocator.name(), %id, "allocator unregistered");
        }
    }

    /// Drop an entry without checks, used by allocators torn down while ready
    pub(crate) fn forget(&self, id: AllocatorId) {
        self.allocators.remove(&id);
        self.cancel_pre_registration(id);
    }

    /// Number of registered allocators
    pub fn len(&self) -> usize {
        self.allocators.len()
    }

    /// Whether no allocator is registered
    pub fn is_empty(&self) -> bool {
        self.allocators.is_empty()
    }

    /// Whether the allocator with `id` is registered
    pub fn contains(&self, id: AllocatorId) -> bool {
        self.allocators.contains_key(&id)
    }

    /// Live handles to every registered allocator, ordered by ID
    pub fn allocators(&self) -> Vec<Arc<dyn ManagedAllocator>> {
        let mut live: Vec<_> = self
            .allocators
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        live.sort_unstable_by_key(|allocator| allocator.id());
        live
    }

    /// First registered allocator with the given name
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn ManagedAllocator>> {
        self.allocators()
            .into_iter()
            .find(|allocator| allocator.name() == name)
    }

    /// Diagnostic snapshot of every registered allocator
    pub fn snapshot(&self) -> Vec<AllocatorInfo> {
        self.allocators()
            .iter()
            .map(|allocator| AllocatorInfo::capture(allocator.as_ref()))
            .collect()
    }

    /// Log one line per registered allocator
    pub fn dump_allocators(&self) {
        let snapshot = self.snapshot();
        info!(count = snapshot.len(), "registered allocators");
        for info in &snapshot {
            info!(
                id = %info.id,
                allocator = %info.name,
                ready = info.is_ready,
                lazy = info.is_lazily_created,
                profiling = info.is_profiling_active,
                allocated = info.num_allocated_bytes,
                capacity = info.capacity,
                efficiency = info.stats.allocation_efficiency(),
                "{}",
                info.stats
            );
        }
    }

    /// Run garbage collection on every registered allocator
    pub fn garbage_collect(&self) {
        let allocators = self.allocators();
        debug!(count = allocators.len(), "collecting allocator garbage");
        for allocator in allocators {
            allocator.garbage_collect();
        }
    }

    /// Install the process-wide out-of-memory listener, replacing any other
    pub fn set_out_of_memory_listener<F>(&self, listener: F)
    where
        F: Fn(&OutOfMemoryEvent<'_>) + Send + Sync + 'static,
    {
        let listener: OutOfMemoryListener = Box::new(listener);
        self.out_of_memory_listener.store(Some(Arc::new(listener)));
    }

    /// Remove the out-of-memory listener
    pub fn clear_out_of_memory_listener(&self) {
        self.out_of_memory_listener.store(None);
    }

    /// Whether an out-of-memory listener is installed
    pub fn has_out_of_memory_listener(&self) -> bool {
        self.out_of_memory_listener.load().is_some()
    }

    /// Invoke the out-of-memory listener; returns whether one ran
    pub fn notify_out_of_memory(
        &self,
        allocator: &dyn ManagedAllocator,
        byte_size: usize,
        alignment: usize,
        flags: u32,
        site: &AllocationSite<'_>,
    ) -> bool {
        if !self.is_ready() {
            return false;
        }

        let Some(listener) = self.out_of_memory_listener.load_full() else {
            return false;
        };

        warn!(
            allocator = allocator.name(),
            byte_size, alignment, flags, "allocator out of memory, running listener"
        );
        listener(&OutOfMemoryEvent {
            allocator,
            byte_size,
            alignment,
            flags,
            name: site.name,
            file_name: site.file_name,
            line: site.line,
        });
        true
    }

    /// Stop tracking allocators
    ///
    /// The manager stops being ready, the pending queue is closed and the
    /// registry is cleared. Allocators still registered are reported when
    /// `report_leaked_allocators` is set.
    pub fn shutdown(&self) {
        let previous = ManagerState::from_u8(
            self.state
                .swap(ManagerState::ShutDown as u8, Ordering::AcqRel),
        );
        if previous == ManagerState::ShutDown {
            return;
        }

        {
            let mut pending = self.pending.lock();
            pending.state = QueueState::ShutDown;
            pending.entries.clear();
        }

        if self.config.report_leaked_allocators {
            for allocator in self.allocators() {
                warn!(
                    allocator = allocator.name(),
                    id = %allocator.id(),
                    allocated = allocator.num_allocated_bytes(),
                    has_live_allocations = allocator.stats().has_active_allocations(),
                    "allocator still registered at shutdown"
                );
            }
        }

        self.allocators.clear();
        self.out_of_memory_listener.store(None);
        info!("allocator manager shut down");
    }
}

impl fmt::Debug for AllocatorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorManager")
            .field("state", &self.state())
            .field("allocators", &self.allocators.len())
            .field("pending", &self.pending_len())
            .field("has_listener", &self.has_out_of_memory_listener())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocatorBase, SystemAllocator};
    use std::sync::atomic::AtomicBool;

    fn leaked(config: ManagerConfig) -> &'static AllocatorManager {
        Box::leak(Box::new(AllocatorManager::new(config)))
    }

    fn system(name: &'static str, manager: &'static AllocatorManager) -> Arc<AllocatorBase<SystemAllocator>> {
        AllocatorBase::builder(name, SystemAllocator::new())
            .manager(manager)
            .build()
    }

    #[test]
    fn ids_are_unique() {
        let a = AllocatorId::new();
        let b = AllocatorId::new();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn initialize_runs_once() {
        let manager = leaked(ManagerConfig::default());
        assert!(!manager.is_ready());
        manager.initialize().unwrap();
        assert!(manager.is_ready());

        let err = manager.initialize().unwrap_err();
        assert_eq!(err.code(), "MEM:LIFECYCLE:STATE");
    }

    #[test]
    fn queued_allocators_register_on_initialize() {
        let manager = leaked(ManagerConfig::default());
        let early = system("early", manager);
        early.post_create();

        assert!(early.is_ready());
        assert_eq!(manager.pending_len(), 1);
        assert!(manager.is_empty());

        manager.initialize().unwrap();
        assert_eq!(manager.pending_len(), 0);
        assert!(manager.contains(early.id()));

        early.pre_destroy();
        assert!(manager.is_empty());
    }

    #[test]
    fn dead_queue_entries_are_skipped() {
        let manager = leaked(ManagerConfig::default());
        let allocator = system("short-lived", manager);
        let handle: Arc<dyn ManagedAllocator> = allocator.clone();
        manager.pre_register_allocator(&handle);
        drop(handle);
        drop(allocator);

        manager.initialize().unwrap();
        assert!(manager.is_empty());
    }

    /// Releases the last outside handle of `held` the second time it is
    /// asked for its id, which happens while `initialize` replays the queue.
    struct ReleasesOnReplay {
        id: AllocatorId,
        id_calls: AtomicUsize,
        held: Mutex<Option<Arc<AllocatorBase<SystemAllocator>>>>,
    }

    impl ManagedAllocator for ReleasesOnReplay {
        fn id(&self) -> AllocatorId {
            if self.id_calls.fetch_add(1, Ordering::SeqCst) == 1 {
                drop(self.held.lock().take());
            }
            self.id
        }
        fn name(&self) -> &str {
            "releases-on-replay"
        }
        fn description(&self) -> &str {
            ""
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn can_be_overridden(&self) -> bool {
            true
        }
        fn is_lazily_created(&self) -> bool {
            false
        }
        fn is_profiling_active(&self) -> bool {
            false
        }
        fn set_profiling_active(&self, _active: bool) {}
        fn stats(&self) -> AllocatorStats {
            AllocatorStats::default()
        }
        fn num_allocated_bytes(&self) -> usize {
            0
        }
        fn capacity(&self) -> usize {
            0
        }
        fn garbage_collect(&self) {}
    }

    #[test]
    fn allocator_released_during_replay_does_not_deadlock() {
        let manager = leaked(ManagerConfig::default());
        let victim = system("released-mid-replay", manager);
        victim.post_create();
        let victim_id = victim.id();

        let releaser: Arc<dyn ManagedAllocator> = Arc::new(ReleasesOnReplay {
            id: AllocatorId::new(),
            id_calls: AtomicUsize::new(0),
            held: Mutex::new(Some(victim)),
        });
        manager.pre_register_allocator(&releaser);
        assert_eq!(manager.pending_len(), 2);

        // The victim is dropped while ready: debug builds assert once the
        // replay has released the queue.
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| manager.initialize()));
        assert_eq!(outcome.is_err(), cfg!(debug_assertions));

        assert!(manager.is_ready());
        assert_eq!(manager.pending_len(), 0);
        assert!(!manager.contains(victim_id));
        assert!(manager.contains(releaser.id()));
        manager.unregister_allocator(releaser.as_ref());
    }

    #[test]
    fn pre_destroy_cancels_queued_registration() {
        let manager = leaked(ManagerConfig::default());
        let allocator = system("cancelled", manager);
        allocator.post_create();
        allocator.pre_destroy();

        assert_eq!(manager.pending_len(), 0);
        manager.initialize().unwrap();
        assert!(manager.is_empty());
    }

    #[test]
    fn late_pre_registration_registers_directly() {
        let manager = leaked(ManagerConfig::default());
        manager.initialize().unwrap();

        let allocator = system("late", manager);
        let handle: Arc<dyn ManagedAllocator> = allocator.clone();
        manager.pre_register_allocator(&handle);
        assert!(manager.contains(allocator.id()));
        manager.unregister_allocator(handle.as_ref());
    }

    #[test]
    fn default_profiling_applies_on_registration() {
        let manager = leaked(ManagerConfig::debug());
        manager.initialize().unwrap();

        let allocator = system("profiled", manager);
        assert!(!allocator.is_profiling_active());
        allocator.post_create();
        assert!(allocator.is_profiling_active());
        allocator.pre_destroy();
    }

    #[test]
    fn listener_is_last_writer_wins() {
        let manager = leaked(ManagerConfig::default());
        manager.initialize().unwrap();
        let allocator = system("oom", manager);

        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        {
            let first = first.clone();
            manager.set_out_of_memory_listener(move |_| first.store(true, Ordering::SeqCst));
        }
        {
            let second = second.clone();
            manager.set_out_of_memory_listener(move |_| second.store(true, Ordering::SeqCst));
        }

        assert!(manager.notify_out_of_memory(allocator.as_ref(), 8, 8, 0, &AllocationSite::default()));
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));

        manager.clear_out_of_memory_listener();
        assert!(!manager.notify_out_of_memory(allocator.as_ref(), 8, 8, 0, &AllocationSite::default()));
    }

    #[test]
    fn not_ready_manager_never_runs_listener() {
        let manager = leaked(ManagerConfig::default());
        let allocator = system("cold", manager);
        manager.set_out_of_memory_listener(|_| panic!("listener must not run"));
        assert!(!manager.notify_out_of_memory(allocator.as_ref(), 8, 8, 0, &AllocationSite::default()));
    }

    #[test]
    fn shutdown_clears_registry_and_closes_queue() {
        let manager = leaked(ManagerConfig::default());
        manager.initialize().unwrap();
        let allocator = system("leaky", manager);
        allocator.post_create();
        assert_eq!(manager.len(), 1);

        manager.shutdown();
        assert!(manager.is_shut_down());
        assert!(manager.is_empty());

        // Manager is no longer ready, so teardown leaves it alone.
        allocator.pre_destroy();

        let late = system("after-shutdown", manager);
        let handle: Arc<dyn ManagedAllocator> = late.clone();
        manager.pre_register_allocator(&handle);
        assert_eq!(manager.pending_len(), 0);
        assert!(manager.is_empty());
    }

    #[test]
    fn snapshot_reports_every_allocator() {
        let manager = leaked(ManagerConfig::default());
        manager.initialize().unwrap();
        let a = system("alpha", manager);
        let b = system("beta", manager);
        a.post_create();
        b.post_create();

        let layout = core::alloc::Layout::from_size_align(48, 8).unwrap();
        let block = unsafe { a.allocate(layout, 0, &AllocationSite::default()) }.unwrap();

        let snapshot = manager.snapshot();
        let names: Vec<_> = snapshot.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(snapshot[0].num_allocated_bytes, 48);
        assert!(snapshot[0].stats.has_active_allocations());
        assert_eq!(snapshot[1].num_allocated_bytes, 0);
        manager.dump_allocators();

        unsafe { a.deallocate(block.cast(), layout) };
        assert_eq!(manager.snapshot()[0].num_allocated_bytes, 0);

        a.pre_destroy();
        b.pre_destroy();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_asserts() {
        let manager = leaked(ManagerConfig::default());
        manager.initialize().unwrap();
        let allocator = system("twice", manager);
        let handle: Arc<dyn ManagedAllocator> = allocator.clone();
        manager.register_allocator(&handle);
        manager.register_allocator(&handle);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not registered")]
    fn unknown_unregistration_asserts() {
        let manager = leaked(ManagerConfig::default());
        manager.initialize().unwrap();
        let allocator = system("stranger", manager);
        manager.unregister_allocator(allocator.as_ref());
    }
}
