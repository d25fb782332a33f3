//! Bounded-concurrency dispatcher
//!
//! Work items are queued in submission order and executed by dispatch
//! cycles. Each cycle owns one concurrency slot and drains the shared queue
//! until it is empty, so at most `max_concurrency` items run at once. Slots
//! are claimed with an optimistic compare-and-swap loop; losing a race just
//! means retrying against the freshly observed count.
//!
//! Code running inside a cycle may execute other items inline on its own
//! thread with [`Dispatcher::try_run_inline`]: the slot it already holds
//! covers the inline item, so the limit is never exceeded.
//!
//! # Example
//!
//! ```rust
//! use latchpool::Dispatcher;
//!
//! # fn main() -> latchpool::Result<()> {
//! let dispatcher = Dispatcher::new(2)?;
//!
//! let outcomes: Vec<_> = (0..8)
//!     .map(|i| dispatcher.spawn(move || i * i))
//!     .collect::<Result<_, _>>()?;
//!
//! let squares: Vec<u64> = outcomes
//!     .into_iter()
//!     .map(|outcome| outcome.wait().unwrap())
//!     .collect();
//! assert_eq!(squares, vec![0, 1, 4, 9, 16, 25, 36, 49]);
//! # Ok(())
//! # }
//! ```

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::launcher::{Launch, ThreadLauncher};
use crate::scope::AsyncScope;
use crate::work_item::{Outcome, WorkItem, WorkStatus};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

static NEXT_DISPATCHER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Dispatchers whose cycle is running on this thread, innermost last
    static ACTIVE_CYCLES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as running a cycle of one dispatcher
///
/// The mark is removed on drop, so it never outlives the cycle, even when
/// the cycle unwinds.
struct CycleMark {
    dispatcher: usize,
}

impl CycleMark {
    fn enter(dispatcher: usize) -> Self {
        ACTIVE_CYCLES.with(|cycles| cycles.borrow_mut().push(dispatcher));
        Self { dispatcher }
    }

    fn is_active(dispatcher: usize) -> bool {
        ACTIVE_CYCLES.with(|cycles| cycles.borrow().contains(&dispatcher))
    }
}

impl Drop for CycleMark {
    fn drop(&mut self) {
        ACTIVE_CYCLES.with(|cycles| {
            let mut cycles = cycles.borrow_mut();
            if let Some(pos) = cycles.iter().rposition(|&id| id == self.dispatcher) {
                cycles.remove(pos);
            }
        });
    }
}

/// Scheduler that runs queued work items with a hard concurrency cap
///
/// # Design
///
/// - **FIFO queue**: items start in submission order
/// - **Lock-free slot accounting**: `current_concurrency` is only changed by
///   compare-and-swap or atomic decrement
/// - **Slot reuse**: a cycle keeps its slot while there is queued work
/// - **Inline execution**: only from inside one of this dispatcher's cycles
/// - **Cloneable**: clones share the queue and the slots
#[derive(Clone)]
pub struct Dispatcher {
    /// Shared state between all clones of this dispatcher
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Distinguishes this dispatcher's cycles from any other's
    id: usize,
    max_concurrency: u32,
    /// Items currently executing, `0..=max_concurrency`
    current_concurrency: AtomicU32,
    /// Pending items; every entry is in `WorkStatus::Queued`
    queue: Mutex<VecDeque<WorkItem>>,
    launcher: Arc<dyn Launch>,
}

impl Dispatcher {
    /// Create a dispatcher running up to `max_concurrency` items at once on
    /// dedicated threads
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfiguration`] if `max_concurrency`
    /// is 0.
    ///
    /// # Example
    ///
    /// ```rust
    /// use latchpool::Dispatcher;
    ///
    /// assert_eq!(Dispatcher::new(42).unwrap().max_concurrency(), 42);
    /// assert!(Dispatcher::new(0).unwrap_err().is_invalid_configuration());
    /// ```
    pub fn new(max_concurrency: u32) -> Result<Self> {
        Self::with_config(DispatcherConfig::new(max_concurrency))
    }

    /// Create a dispatcher from a configuration, running cycles on threads
    /// spawned by a [`ThreadLauncher`]
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfiguration`] if the configuration
    /// does not validate.
    pub fn with_config(config: DispatcherConfig) -> Result<Self> {
        let launcher = Arc::new(ThreadLauncher::new(&config));
        Self::with_launcher(config, launcher)
    }

    /// Create a dispatcher whose cycles are started by `launcher`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfiguration`] if the configuration
    /// does not validate.
    pub fn with_launcher(config: DispatcherConfig, launcher: Arc<dyn Launch>) -> Result<Self> {
        config.validate()?;

        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            dispatcher = id,
            max_concurrency = config.max_concurrency,
            "dispatcher created"
        );

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                id,
                max_concurrency: config.max_concurrency,
                current_concurrency: AtomicU32::new(0),
                queue: Mutex::new(VecDeque::new()),
                launcher,
            }),
        })
    }

    /// Configured concurrency limit
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.inner.max_concurrency
    }

    /// Number of concurrency slots currently held by dispatch cycles
    ///
    /// For monitoring only; the value may change as soon as it is read.
    #[must_use]
    pub fn current_concurrency(&self) -> u32 {
        self.inner.current_concurrency.load(Ordering::Acquire)
    }

    /// Queue `item` and start a dispatch cycle if a slot is free
    ///
    /// Returns as soon as the item is queued; it runs asynchronously.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidArgument`] if `item` is not in
    ///   [`WorkStatus::Created`] (already queued, running or completed)
    /// - [`DispatchError::Launch`] if a slot was free but the launcher could
    ///   not start a cycle; the item stays queued
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        if !item.transition(WorkStatus::Created, WorkStatus::Queued) {
            return Err(DispatchError::InvalidArgument(format!(
                "work item {} is {:?}; only created items can be queued",
                item.id(),
                item.status()
            )));
        }

        trace!(dispatcher = self.inner.id, item = item.id(), "item queued");
        self.inner.lock_queue().push_back(item);
        self.inner.try_start_cycle()
    }

    /// Wrap `action` in a work item and queue it
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Launch`] if the launcher could not start a
    /// cycle; the item stays queued and will run with a later cycle.
    pub fn spawn<T, F>(&self, action: F) -> Result<Outcome<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (item, outcome) = WorkItem::with_result(action);
        self.enqueue(item)?;
        Ok(outcome)
    }

    /// Remove `item` from the queue if it has not started yet
    ///
    /// A removed item goes back to [`WorkStatus::Created`]. Returns `false`
    /// if the item is not queued here, including when a cycle has just
    /// taken it.
    pub fn try_remove(&self, item: &WorkItem) -> bool {
        let mut queue = self.inner.lock_queue();
        let Some(pos) = queue.iter().position(|queued| queued.ptr_eq(item)) else {
            return false;
        };

        if let Some(removed) = queue.remove(pos) {
            removed.transition(WorkStatus::Queued, WorkStatus::Created);
            trace!(dispatcher = self.inner.id, item = removed.id(), "item removed");
        }
        true
    }

    /// Point-in-time copy of the pending items, oldest first
    #[must_use]
    pub fn snapshot_queue(&self) -> Vec<WorkItem> {
        self.inner.lock_queue().iter().cloned().collect()
    }

    /// Number of pending items
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.lock_queue().len()
    }

    /// Whether the calling thread is running one of this dispatcher's cycles
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        CycleMark::is_active(self.inner.id)
    }

    /// Run `item` synchronously on the calling thread
    ///
    /// Only allowed from inside one of this dispatcher's cycles, where the
    /// caller already holds a slot. If `was_previously_queued` is set, the
    /// item is first removed from the queue and is only run if that removal
    /// succeeds.
    ///
    /// Returns `true` once the item has run. A panic in the item's action is
    /// reported through the item itself, not here.
    pub fn try_run_inline(&self, item: &WorkItem, was_previously_queued: bool) -> bool {
        if !self.is_dispatching() {
            trace!(
                dispatcher = self.inner.id,
                item = item.id(),
                "inline execution refused outside a dispatch cycle"
            );
            return false;
        }

        if was_previously_queued && !self.try_remove(item) {
            return false;
        }

        item.run(WorkStatus::Created)
    }

    /// Run `item` to completion before returning
    ///
    /// Inside one of this dispatcher's cycles the item runs inline. Anywhere
    /// else it is queued, and the calling thread blocks until the item
    /// completes, with the ambient resume context suppressed.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::enqueue`].
    pub fn run_synchronously(&self, item: WorkItem) -> Result<()> {
        if self.try_run_inline(&item, false) {
            return Ok(());
        }

        let completion = item.completion();
        self.enqueue(item)?;

        let _scope = AsyncScope::enter();
        futures::executor::block_on(completion);
        Ok(())
    }
}

impl DispatcherInner {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a slot for a new cycle and launch it
    fn try_start_cycle(self: &Arc<Self>) -> Result<()> {
        let observed = self.current_concurrency.load(Ordering::Acquire);
        if !self.try_acquire_slot(observed) {
            trace!(dispatcher = self.id, "all slots busy; item left queued");
            return Ok(());
        }

        let inner = Arc::clone(self);
        if let Err(err) = self.launcher.launch(Box::new(move || inner.run_cycle())) {
            self.release_slot();
            warn!(dispatcher = self.id, "failed to launch dispatch cycle: {}", err);
            return Err(err.into());
        }
        Ok(())
    }

    /// Increment `current_concurrency` unless it has reached the limit
    ///
    /// `observed` is the caller's last reading of the counter. It may be
    /// stale: a failed compare-and-swap reports the actual value, and the
    /// next attempt is computed from that.
    fn try_acquire_slot(&self, mut observed: u32) -> bool {
        loop {
            if observed >= self.max_concurrency {
                return false;
            }

            match self.current_concurrency.compare_exchange_weak(
                observed,
                observed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => observed = actual,
            }
        }
    }

    fn release_slot(&self) {
        let previous = self.current_concurrency.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released a slot that was not held");
    }

    /// Drain the queue while holding one slot
    fn run_cycle(&self) {
        let _mark = CycleMark::enter(self.id);
        debug!(dispatcher = self.id, "dispatch cycle started");

        let mut executed = 0_usize;
        loop {
            let next = self.lock_queue().pop_front();
            if let Some(item) = next {
                if item.run(WorkStatus::Queued) {
                    executed += 1;
                }
                continue;
            }

            self.release_slot();

            // An enqueue that saw every slot taken just before the release
            // relies on this cycle to pick its item up.
            if self.lock_queue().is_empty() {
                break;
            }
            let observed = self.current_concurrency.load(Ordering::Acquire);
            if !self.try_acquire_slot(observed) {
                break;
            }
        }

        debug!(dispatcher = self.id, executed, "dispatch cycle finished");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.inner.id)
            .field("max_concurrency", &self.max_concurrency())
            .field("current_concurrency", &self.current_concurrency())
            .field("queued", &self.queued_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::Job;
    use std::io;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    /// Launcher that accepts cycles but never runs them
    fn parked() -> Arc<dyn Launch> {
        Arc::new(|_cycle: Job| -> io::Result<()> { Ok(()) })
    }

    fn parked_dispatcher(max_concurrency: u32) -> Dispatcher {
        Dispatcher::with_launcher(DispatcherConfig::new(max_concurrency), parked()).unwrap()
    }

    #[test]
    fn test_acquire_slot_up_to_limit() {
        let dispatcher = parked_dispatcher(2);
        let inner = &dispatcher.inner;

        assert!(inner.try_acquire_slot(0));
        assert!(inner.try_acquire_slot(1));
        assert!(!inner.try_acquire_slot(2));
        assert_eq!(dispatcher.current_concurrency(), 2);

        inner.release_slot();
        assert_eq!(dispatcher.current_concurrency(), 1);
    }

    #[test]
    fn test_acquire_slot_recovers_from_stale_observation() {
        let dispatcher = parked_dispatcher(4);
        let inner = &dispatcher.inner;

        // Counter is 0 but the caller believes it is 3
        assert!(inner.try_acquire_slot(3));
        assert_eq!(dispatcher.current_concurrency(), 1);

        // Counter is 1 but the caller believes it is 0
        assert!(inner.try_acquire_slot(0));
        assert_eq!(dispatcher.current_concurrency(), 2);
    }

    #[test]
    fn test_acquire_slot_stale_observation_never_exceeds_limit() {
        let dispatcher = parked_dispatcher(2);
        let inner = &dispatcher.inner;

        assert!(inner.try_acquire_slot(0));
        assert!(inner.try_acquire_slot(0));
        // Stale reading below the limit must not sneak past it
        assert!(!inner.try_acquire_slot(0));
        assert_eq!(dispatcher.current_concurrency(), 2);
    }

    #[test]
    fn test_acquire_slot_under_contention() {
        let dispatcher = parked_dispatcher(3);
        let stop = Arc::new(AtomicBool::new(false));
        let acquired = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let inner = Arc::clone(&dispatcher.inner);
                let stop = Arc::clone(&stop);
                let acquired = Arc::clone(&acquired);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        // Always start from a poisoned reading
                        if inner.try_acquire_slot(0) {
                            let held = inner.current_concurrency.load(Ordering::Acquire);
                            assert!((1..=inner.max_concurrency).contains(&held));
                            acquired.fetch_add(1, Ordering::Relaxed);
                            inner.release_slot();
                        }
                    }
                })
            })
            .collect();

        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            assert!(dispatcher.current_concurrency() <= 3);
        }
        stop.store(true, Ordering::Relaxed);

        for thread in threads {
            thread.join().unwrap();
        }
        assert!(acquired.load(Ordering::Relaxed) > 0);
        assert_eq!(dispatcher.current_concurrency(), 0);
    }

    #[test]
    fn test_cycle_releases_slot_when_queue_drains() {
        let dispatcher = parked_dispatcher(1);

        let item = WorkItem::new(|| {});
        dispatcher.enqueue(item.clone()).unwrap();
        assert_eq!(dispatcher.current_concurrency(), 1);

        // Run the parked cycle by hand
        dispatcher.inner.run_cycle();

        assert!(item.is_completed());
        assert_eq!(dispatcher.current_concurrency(), 0);
        assert!(dispatcher.snapshot_queue().is_empty());
    }

    #[test]
    fn test_cycle_marks_only_its_own_dispatcher() {
        let first = parked_dispatcher(1);
        let second = parked_dispatcher(1);

        let (item, outcome) = {
            let first = first.clone();
            let second = second.clone();
            WorkItem::with_result(move || (first.is_dispatching(), second.is_dispatching()))
        };
        first.enqueue(item).unwrap();
        assert!(!first.is_dispatching());

        first.inner.run_cycle();

        assert_eq!(outcome.wait(), Ok((true, false)));
        assert!(!first.is_dispatching());
    }

    #[test]
    fn test_launch_failure_releases_slot() {
        let failing: Arc<dyn Launch> = Arc::new(|_cycle: Job| -> io::Result<()> {
            Err(io::Error::other("no threads left"))
        });
        let dispatcher = Dispatcher::with_launcher(DispatcherConfig::new(1), failing).unwrap();

        let item = WorkItem::new(|| {});
        let err = dispatcher.enqueue(item.clone()).unwrap_err();

        assert!(matches!(err, DispatchError::Launch(_)));
        assert_eq!(dispatcher.current_concurrency(), 0);
        assert_eq!(dispatcher.snapshot_queue(), vec![item.clone()]);
        assert!(dispatcher.try_remove(&item));
        assert_eq!(item.status(), WorkStatus::Created);
    }
}
