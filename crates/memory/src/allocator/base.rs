//! Lifecycle, registration and profiling around an allocation strategy
//!
//! [`AllocatorBase`] composes any [`Allocator`] strategy with the behaviour
//! every allocator shares: a name, a `Constructed -> Ready -> Destroyed`
//! state machine, registration with an [`AllocatorManager`], profiling hooks
//! forwarding to a [`RecordsSink`], and out-of-memory delegation.
//!
//! # Lifecycle
//!
//! ```text
//! build() ──► Constructed ──post_create()──► Ready ──pre_destroy()──► Destroyed ──► drop
//! ```
//!
//! Dropping an allocator that is still `Ready` means `pre_destroy` was never
//! called. The manager entry is removed, the violation is logged and debug
//! builds panic.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error};

use super::manager::{AllocatorId, AllocatorManager, ManagedAllocator};
use super::stats::{AllocatorStats, AtomicAllocatorStats};
use super::traits::{AllocationSite, Allocator};
use crate::error::AllocResult;
use crate::macros::lifecycle_assert;
use crate::records::{AllocationEvent, RecordsSink};

/// Allocator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Built, `post_create` not called yet
    Constructed = 0,
    /// Serving allocations
    Ready = 1,
    /// `pre_destroy` ran; the object is never reused
    Destroyed = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Constructed,
            1 => Self::Ready,
            _ => Self::Destroyed,
        }
    }
}

/// Builder for [`AllocatorBase`]
pub struct AllocatorBaseBuilder<S: Allocator> {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    strategy: S,
    manager: Option<&'static AllocatorManager>,
}

impl<S: Allocator> AllocatorBaseBuilder<S> {
    /// Human-readable description
    #[must_use]
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Register with `manager` instead of the process-wide one
    #[must_use]
    pub fn manager(mut self, manager: &'static AllocatorManager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Build the allocator in the `Constructed` state
    pub fn build(self) -> Arc<AllocatorBase<S>> {
        Arc::new(AllocatorBase {
            id: AllocatorId::new(),
            name: self.name,
            description: self.description,
            strategy: self.strategy,
            manager: self.manager.unwrap_or_else(AllocatorManager::global),
            state: AtomicU8::new(LifecycleState::Constructed as u8),
            can_be_overridden: AtomicBool::new(true),
            registration_enabled: AtomicBool::new(true),
            registered: AtomicBool::new(false),
            lazily_created: AtomicBool::new(false),
            profiling_active: AtomicBool::new(false),
            records: RwLock::new(None),
            memory_guard_size: AtomicUsize::new(0),
            stats: AtomicAllocatorStats::new(),
        })
    }
}

/// An allocation strategy with lifecycle, registration and profiling
pub struct AllocatorBase<S: Allocator> {
    id: AllocatorId,
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    strategy: S,
    manager: &'static AllocatorManager,
    state: AtomicU8,
    can_be_overridden: AtomicBool,
    registration_enabled: AtomicBool,
    // Set when post_create handed the allocator to the manager, so a later
    // disable_registration cannot skip the matching unregister.
    registered: AtomicBool,
    lazily_created: AtomicBool,
    profiling_active: AtomicBool,
    records: RwLock<Option<Weak<dyn RecordsSink>>>,
    memory_guard_size: AtomicUsize,
    stats: AtomicAllocatorStats,
}

impl<S: Allocator> AllocatorBase<S> {
    /// Start building an allocator around `strategy`
    pub fn builder(name: impl Into<Cow<'static, str>>, strategy: S) -> AllocatorBaseBuilder<S> {
        AllocatorBaseBuilder {
            name: name.into(),
            description: Cow::Borrowed(""),
            strategy,
            manager: None,
        }
    }

    /// Allocator registered with the process-wide manager
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        strategy: S,
    ) -> Arc<Self> {
        Self::builder(name, strategy).description(description).build()
    }

    pub fn id(&self) -> AllocatorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The wrapped strategy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Manager this allocator registers with
    pub fn manager(&self) -> &'static AllocatorManager {
        self.manager
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Whether a higher-priority allocator may replace this one
    pub fn can_be_overridden(&self) -> bool {
        self.can_be_overridden.load(Ordering::Relaxed)
    }

    /// Pin this allocator as its category's allocator; cannot be undone
    pub fn disable_overriding(&self) {
        self.can_be_overridden.store(false, Ordering::Relaxed);
    }

    /// Whether `post_create` will register with the manager
    pub fn is_registration_enabled(&self) -> bool {
        self.registration_enabled.load(Ordering::Relaxed)
    }

    /// Skip manager registration; only effective before `post_create`
    pub fn disable_registration(&self) {
        self.registration_enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_lazily_created(&self) -> bool {
        self.lazily_created.load(Ordering::Relaxed)
    }

    pub fn set_lazily_created(&self, lazily_created: bool) {
        self.lazily_created.store(lazily_created, Ordering::Relaxed);
    }

    pub fn is_profiling_active(&self) -> bool {
        self.profiling_active.load(Ordering::Relaxed)
    }

    pub fn set_profiling_active(&self, active: bool) {
        self.profiling_active.store(active, Ordering::Relaxed);
    }

    /// Usage counters
    pub fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }

    /// Guard size requested by the attached records, 0 without records
    pub fn memory_guard_size(&self) -> usize {
        self.memory_guard_size.load(Ordering::Relaxed)
    }

    /// Attach or detach the instrumentation sink
    ///
    /// Only a `Weak` reference is kept; the caller owns the records.
    pub fn set_records(&self, records: Option<&Arc<dyn RecordsSink>>) {
        let guard_size = records.map_or(0, |records| records.memory_guard_size());
        *self.records.write() = records.map(Arc::downgrade);
        self.memory_guard_size.store(guard_size, Ordering::Relaxed);
    }

    /// Whether a live records sink is attached
    pub fn has_records(&self) -> bool {
        self.records
            .read()
            .as_ref()
            .is_some_and(|records| records.strong_count() > 0)
    }

    /// Leave the `Ready` state and unregister
    ///
    /// Calling this on a `Constructed` allocator moves it straight to
    /// `Destroyed` without touching the manager.
    pub fn pre_destroy(&self) {
        let previous = LifecycleState::from_u8(
            self.state
                .swap(LifecycleState::Destroyed as u8, Ordering::AcqRel),
        );

        match previous {
            LifecycleState::Ready => {}
            LifecycleState::Constructed => {
                debug!(allocator = %self.name, "pre_destroy on an allocator that never became ready");
                return;
            }
            LifecycleState::Destroyed => {
                lifecycle_assert!(false, "allocator '{}' destroyed twice", self.name);
                return;
            }
        }

        if self.registered.swap(false, Ordering::AcqRel)
            && !self.manager.cancel_pre_registration(self.id)
            && self.manager.is_ready()
        {
            self.manager.unregister_allocator(self);
        }

        debug!(allocator = %self.name, id = %self.id, "allocator destroyed");
    }

    // ------------------------------------------------------------------------
    // Allocation front-end
    // ------------------------------------------------------------------------

    /// Allocate through the strategy
    ///
    /// A resource-exhaustion failure is reported to the out-of-memory
    /// listener; when one ran the request is retried once.
    ///
    /// # Safety
    /// Same contract as [`Allocator::allocate`]. The allocator must be ready.
    pub unsafe fn allocate(
        &self,
        layout: Layout,
        flags: u32,
        site: &AllocationSite<'_>,
    ) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: contract forwarded from the caller.
        let mut result = unsafe { self.strategy.allocate(layout) };
        if let Err(err) = &result
            && err.is_retryable()
            && self.on_out_of_memory(layout.size(), layout.align(), flags, site)
        {
            // SAFETY: as above.
            result = unsafe { self.strategy.allocate(layout) };
        }

        let block = match result {
            Ok(block) => block,
            Err(err) => {
                self.stats.record_allocation_failure();
                return Err(err);
            }
        };

        self.stats.record_allocation(layout.size());
        self.profile_allocation(block.cast(), layout.size(), layout.align(), site, 1);
        Ok(block)
    }

    /// Return a block to the strategy
    ///
    /// # Safety
    /// Same contract as [`Allocator::deallocate`].
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.profile_deallocation(ptr, layout.size(), layout.align());
        // SAFETY: contract forwarded from the caller.
        unsafe { self.strategy.deallocate(ptr, layout) };
        self.stats.record_deallocation(layout.size());
    }

    /// Move a block to `new_layout`, preserving its contents
    ///
    /// # Safety
    /// Same contract as [`Allocator::reallocate`].
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
        flags: u32,
        site: &AllocationSite<'_>,
    ) -> AllocResult<NonNull<[u8]>> {
        self.profile_reallocation_begin(ptr, new_layout.size());

        // SAFETY: contract forwarded from the caller.
        let mut result = unsafe { self.strategy.reallocate(ptr, old_layout, new_layout) };
        if let Err(err) = &result
            && err.is_retryable()
            && self.on_out_of_memory(new_layout.size(), new_layout.align(), flags, site)
        {
            // SAFETY: a failed reallocation leaves `ptr` valid with old_layout.
            result = unsafe { self.strategy.reallocate(ptr, old_layout, new_layout) };
        }

        match result {
            Ok(block) => {
                self.stats
                    .record_reallocation(old_layout.size(), new_layout.size());
                self.profile_reallocation_end(ptr, block.cast(), new_layout.size(), new_layout.align());
                Ok(block)
            }
            Err(err) => {
                self.stats.record_allocation_failure();
                // The block did not move; put its record back.
                self.profile_reallocation_end(ptr, ptr, old_layout.size(), old_layout.align());
                Err(err)
            }
        }
    }

    /// Resize a block in place; returns the usable size afterwards
    ///
    /// # Safety
    /// Same contract as [`Allocator::resize`].
    pub unsafe fn resize(&self, ptr: NonNull<u8>, layout: Layout, new_size: usize) -> usize {
        // SAFETY: contract forwarded from the caller.
        let size = unsafe { self.strategy.resize(ptr, layout, new_size) };
        if size != layout.size() {
            self.stats.record_reallocation(layout.size(), size);
            self.profile_resize(ptr, size);
        }
        size
    }

    /// Release cached strategy memory
    pub fn garbage_collect(&self) {
        self.strategy.garbage_collect();
    }

    // ------------------------------------------------------------------------
    // Profiling hooks
    // ------------------------------------------------------------------------

    fn with_sink(&self, event: &str, f: impl FnOnce(&dyn RecordsSink)) {
        if !self.is_profiling_active() {
            return;
        }
        let Some(sink) = self.records.read().as_ref().and_then(Weak::upgrade) else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| f(sink.as_ref()))).is_err() {
            error!(allocator = %self.name, event, "records sink panicked, event dropped");
        }
    }

    /// Report an allocation to the records sink
    pub fn profile_allocation(
        &self,
        ptr: NonNull<u8>,
        byte_size: usize,
        alignment: usize,
        site: &AllocationSite<'_>,
        suppress_stack_record: u32,
    ) {
        self.with_sink("allocation", |sink| {
            sink.on_allocation(&AllocationEvent {
                allocator: &self.name,
                address: ptr.addr().get(),
                byte_size,
                alignment,
                site: *site,
                suppress_stack_record,
            });
        });
    }

    /// Report a deallocation to the records sink
    pub fn profile_deallocation(&self, ptr: NonNull<u8>, byte_size: usize, alignment: usize) {
        self.with_sink("deallocation", |sink| {
            sink.on_deallocation(ptr.addr().get(), byte_size, alignment);
        });
    }

    /// Report the start of a reallocation to the records sink
    pub fn profile_reallocation_begin(&self, ptr: NonNull<u8>, new_size: usize) {
        self.with_sink("reallocation_begin", |sink| {
            sink.on_reallocation_begin(ptr.addr().get(), new_size);
        });
    }

    /// Report the end of a reallocation to the records sink
    pub fn profile_reallocation_end(
        &self,
        old_ptr: NonNull<u8>,
        new_ptr: NonNull<u8>,
        new_size: usize,
        new_alignment: usize,
    ) {
        self.with_sink("reallocation_end", |sink| {
            sink.on_reallocation_end(old_ptr.addr().get(), new_ptr.addr().get(), new_size, new_alignment);
        });
    }

    /// Report an in-place resize to the records sink
    pub fn profile_resize(&self, ptr: NonNull<u8>, new_size: usize) {
        self.with_sink("resize", |sink| sink.on_resize(ptr.addr().get(), new_size));
    }

    /// Hand an out-of-memory condition to the manager's listener
    ///
    /// Returns `true` when a listener ran; the caller may retry. `false`
    /// means no listener exists and the caller applies its own policy.
    pub fn on_out_of_memory(
        &self,
        byte_size: usize,
        alignment: usize,
        flags: u32,
        site: &AllocationSite<'_>,
    ) -> bool {
        let handled = self
            .manager
            .notify_out_of_memory(self, byte_size, alignment, flags, site);
        if handled {
            self.stats.record_out_of_memory();
        }
        handled
    }
}

impl<S: Allocator + 'static> AllocatorBase<S> {
    /// Enter the `Ready` state, registering with the manager
    ///
    /// Registers directly when the manager is ready, otherwise queues a
    /// pre-registration that [`AllocatorManager::initialize`] replays.
    pub fn post_create(self: &Arc<Self>) {
        let state = self.state();
        lifecycle_assert!(
            state == LifecycleState::Constructed,
            "post_create on allocator '{}' in state {state:?}",
            self.name
        );
        if state != LifecycleState::Constructed {
            return;
        }

        if self.is_registration_enabled() {
            let handle: Arc<dyn ManagedAllocator> = self.clone();
            if self.manager.is_ready() {
                self.manager.register_allocator(&handle);
            } else {
                self.manager.pre_register_allocator(&handle);
            }
            self.registered.store(true, Ordering::Release);
        }

        self.state
            .store(LifecycleState::Ready as u8, Ordering::Release);
        debug!(allocator = %self.name, id = %self.id, "allocator ready");
    }
}

impl<S: Allocator> ManagedAllocator for AllocatorBase<S> {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_ready(&self) -> bool {
        AllocatorBase::is_ready(self)
    }

    fn can_be_overridden(&self) -> bool {
        AllocatorBase::can_be_overridden(self)
    }

    fn is_lazily_created(&self) -> bool {
        AllocatorBase::is_lazily_created(self)
    }

    fn is_profiling_active(&self) -> bool {
        AllocatorBase::is_profiling_active(self)
    }

    fn set_profiling_active(&self, active: bool) {
        AllocatorBase::set_profiling_active(self, active);
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }

    fn num_allocated_bytes(&self) -> usize {
        self.strategy.num_allocated_bytes()
    }

    fn capacity(&self) -> usize {
        self.strategy.capacity()
    }

    fn garbage_collect(&self) {
        self.strategy.garbage_collect();
    }
}

impl<S: Allocator> Drop for AllocatorBase<S> {
    fn drop(&mut self) {
        let ready = LifecycleState::from_u8(*self.state.get_mut()) == LifecycleState::Ready;
        if ready && *self.registered.get_mut() {
            self.manager.forget(self.id);
        }
        lifecycle_assert!(
            !ready,
            "allocator '{}' dropped while ready, pre_destroy was never called",
            self.name
        );
    }
}

impl<S: Allocator> fmt::Debug for AllocatorBase<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("profiling", &self.is_profiling_active())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{PoolAllocator, PoolDescriptor, SystemAllocator};
    use crate::config::ManagerConfig;
    use crate::error::AllocError;
    use crate::records::{AllocationRecords, RecordMode};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn ready_manager() -> &'static AllocatorManager {
        let manager = Box::leak(Box::new(AllocatorManager::new(ManagerConfig::default())));
        manager.initialize().unwrap();
        manager
    }

    #[derive(Default)]
    struct CountingSink {
        events: AtomicUsize,
    }

    impl RecordsSink for CountingSink {
        fn on_allocation(&self, _event: &AllocationEvent<'_>) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_deallocation(&self, _address: usize, _byte_size: usize, _alignment: usize) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_reallocation_begin(&self, _address: usize, _new_size: usize) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_reallocation_end(
            &self,
            _old_address: usize,
            _new_address: usize,
            _new_size: usize,
            _new_alignment: usize,
        ) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_resize(&self, _address: usize, _new_size: usize) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingSink;

    impl RecordsSink for PanickingSink {
        fn on_allocation(&self, _event: &AllocationEvent<'_>) {
            panic!("broken sink");
        }

        fn on_deallocation(&self, _address: usize, _byte_size: usize, _alignment: usize) {
            panic!("broken sink");
        }
    }

    /// Fails the first request, then behaves like the system allocator.
    #[derive(Default)]
    struct FailOnce {
        failed: AtomicBool,
        inner: SystemAllocator,
    }

    unsafe impl Allocator for FailOnce {
        unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(AllocError::allocation_failed_with_layout(layout));
            }
            unsafe { self.inner.allocate(layout) }
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            unsafe { self.inner.deallocate(ptr, layout) }
        }
    }

    #[test]
    fn state_machine_follows_lifecycle() {
        let manager = ready_manager();
        let allocator = AllocatorBase::builder("lifecycle", SystemAllocator::new())
            .manager(manager)
            .build();

        assert_eq!(allocator.state(), LifecycleState::Constructed);
        assert!(!allocator.is_ready());
        allocator.post_create();
        assert_eq!(allocator.state(), LifecycleState::Ready);
        allocator.pre_destroy();
        assert_eq!(allocator.state(), LifecycleState::Destroyed);
        assert!(!allocator.is_ready());
    }

    #[test]
    fn pre_destroy_without_post_create_is_quiet() {
        let manager = ready_manager();
        let allocator = AllocatorBase::builder("never-ready", SystemAllocator::new())
            .manager(manager)
            .build();
        allocator.pre_destroy();
        assert_eq!(allocator.state(), LifecycleState::Destroyed);
        assert!(manager.is_empty());
    }

    #[test]
    fn overriding_is_one_way() {
        let allocator = AllocatorBase::builder("pinned", SystemAllocator::new())
            .manager(ready_manager())
            .build();
        assert!(allocator.can_be_overridden());
        allocator.disable_overriding();
        assert!(!allocator.can_be_overridden());
    }

    #[test]
    fn profiling_only_when_active() {
        let manager = ready_manager();
        let allocator = AllocatorBase::builder("profiled", SystemAllocator::new())
            .manager(manager)
            .build();
        allocator.post_create();

        let counting = Arc::new(CountingSink::default());
        let sink: Arc<dyn RecordsSink> = counting.clone();
        allocator.set_records(Some(&sink));
        let layout = Layout::from_size_align(64, 8).unwrap();
        let grown = Layout::from_size_align(128, 8).unwrap();

        // Every hook: allocate, reallocate (begin + end), resize, deallocate.
        let exercise = || unsafe {
            let site = AllocationSite::default();
            let block = allocator.allocate(layout, 0, &site).unwrap().cast::<u8>();
            let moved = allocator
                .reallocate(block, layout, grown, 0, &site)
                .unwrap()
                .cast::<u8>();
            allocator.profile_resize(moved, 96);
            allocator.deallocate(moved, grown);
        };

        exercise();
        assert_eq!(counting.events.load(Ordering::SeqCst), 0);

        allocator.set_profiling_active(true);
        exercise();
        assert_eq!(counting.events.load(Ordering::SeqCst), 5);

        allocator.pre_destroy();
    }

    #[test]
    fn dropped_records_turn_profiling_into_noop() {
        let allocator = AllocatorBase::builder("orphaned", SystemAllocator::new())
            .manager(ready_manager())
            .build();
        allocator.set_profiling_active(true);

        let sink: Arc<dyn RecordsSink> = Arc::new(AllocationRecords::with_guard(RecordMode::Basic, 32));
        allocator.set_records(Some(&sink));
        assert!(allocator.has_records());
        assert_eq!(allocator.memory_guard_size(), 32);
        drop(sink);

        assert!(!allocator.has_records());
        allocator.profile_deallocation(NonNull::dangling(), 8, 8);

        allocator.set_records(None);
        assert_eq!(allocator.memory_guard_size(), 0);
    }

    #[test]
    fn panicking_sink_never_fails_allocation() {
        let allocator = AllocatorBase::builder("fragile", SystemAllocator::new())
            .manager(ready_manager())
            .build();
        allocator.post_create();
        allocator.set_profiling_active(true);
        let sink: Arc<dyn RecordsSink> = Arc::new(PanickingSink);
        allocator.set_records(Some(&sink));

        let layout = Layout::new::<[u64; 4]>();
        unsafe {
            let block = allocator.allocate(layout, 0, &AllocationSite::default()).unwrap();
            allocator.deallocate(block.cast(), layout);
        }
        assert_eq!(allocator.stats().allocation_count, 1);
        allocator.pre_destroy();
    }

    #[test]
    fn records_follow_reallocation() {
        let allocator = AllocatorBase::builder("moving", SystemAllocator::new())
            .manager(ready_manager())
            .build();
        allocator.post_create();
        allocator.set_profiling_active(true);
        let records = Arc::new(AllocationRecords::new(RecordMode::Full));
        let sink: Arc<dyn RecordsSink> = records.clone();
        allocator.set_records(Some(&sink));

        let small = Layout::from_size_align(16, 8).unwrap();
        let large = Layout::from_size_align(4096, 8).unwrap();
        let site = crate::allocation_site!("buffer");
        unsafe {
            let block = allocator.allocate(small, 0, &site).unwrap();
            let moved = allocator
                .reallocate(block.cast(), small, large, 0, &site)
                .unwrap();
            let moved = moved.cast::<u8>();
            let info = records.find(moved.addr().get()).unwrap();
            assert_eq!(info.byte_size, 4096);
            assert_eq!(info.name.as_deref(), Some("buffer"));
            allocator.deallocate(moved, large);
        }
        assert!(records.is_empty());
        assert_eq!(allocator.stats().reallocation_count, 1);
        allocator.pre_destroy();
    }

    #[test]
    fn out_of_memory_retries_once_after_listener() {
        let manager = ready_manager();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            manager.set_out_of_memory_listener(move |event| {
                assert_eq!(event.byte_size, 128);
                assert_eq!(event.allocator.name(), "flaky");
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let allocator = AllocatorBase::builder("flaky", FailOnce::default())
            .manager(manager)
            .build();
        allocator.post_create();

        let layout = Layout::from_size_align(128, 16).unwrap();
        unsafe {
            let block = allocator.allocate(layout, 0, &AllocationSite::default()).unwrap();
            allocator.deallocate(block.cast(), layout);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(allocator.stats().out_of_memory_events, 1);
        assert_eq!(allocator.stats().failed_allocations, 0);
        allocator.pre_destroy();
    }

    #[test]
    fn exhausted_pool_without_listener_fails() {
        let manager = ready_manager();
        let pool = PoolAllocator::new(PoolDescriptor {
            block_size: 64,
            block_align: 8,
            blocks_per_page: 1,
            max_pages: Some(1),
        })
        .unwrap();
        let allocator = AllocatorBase::builder("tiny-pool", pool).manager(manager).build();
        allocator.post_create();

        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let first = allocator.allocate(layout, 0, &AllocationSite::default()).unwrap();
            let err = allocator
                .allocate(layout, 0, &AllocationSite::default())
                .unwrap_err();
            assert_eq!(err.code(), "MEM:POOL:EXHAUSTED");
            allocator.deallocate(first.cast(), layout);
        }

        let stats = allocator.stats();
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.out_of_memory_events, 0);
        allocator.pre_destroy();
    }

    #[test]
    fn invalid_requests_skip_out_of_memory_listener() {
        let manager = ready_manager();
        manager.set_out_of_memory_listener(|_| panic!("not an out-of-memory condition"));
        let pool = PoolAllocator::new(PoolDescriptor::default()).unwrap();
        let allocator = AllocatorBase::builder("strict", pool).manager(manager).build();
        allocator.post_create();

        let oversized = Layout::from_size_align(1024, 8).unwrap();
        let err = unsafe { allocator.allocate(oversized, 0, &AllocationSite::default()) }.unwrap_err();
        assert_eq!(err.code(), "MEM:ALLOC:MAX");
        allocator.pre_destroy();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "post_create on allocator")]
    fn post_create_twice_asserts() {
        let allocator = AllocatorBase::builder("twice", SystemAllocator::new())
            .manager(ready_manager())
            .build();
        allocator.disable_registration();
        allocator.post_create();
        allocator.pre_destroy();
        allocator.post_create();
    }
}
