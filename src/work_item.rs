//! Work items scheduled by a [`crate::Dispatcher`]
//!
//! A [`WorkItem`] is an identity-bearing unit of work. Clones refer to the
//! same item, and the item moves through
//! `Created -> Queued -> Running -> Completed`. Removing a queued item puts
//! it back in `Created`, from where it can be run inline or queued again.
//! An item's action runs at most once.

use crate::error::WorkError;
use futures::channel::oneshot;
use latchpool_sync::{Gate, GateWait};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tracing::warn;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle state of a [`WorkItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkStatus {
    /// Not scheduled; can be queued or run inline
    Created = 0,
    /// Waiting in a dispatcher queue
    Queued = 1,
    /// Action is executing
    Running = 2,
    /// Action returned or panicked
    Completed = 3,
}

impl WorkStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Queued,
            2 => Self::Running,
            _ => Self::Completed,
        }
    }
}

/// An opaque unit of schedulable work
///
/// # Example
///
/// ```rust
/// use latchpool::{WorkItem, WorkStatus};
///
/// let (item, outcome) = WorkItem::with_result(|| 6 * 7);
/// assert_eq!(item.status(), WorkStatus::Created);
///
/// // A clone is the same item
/// let same = item.clone();
/// assert!(same.ptr_eq(&item));
/// # drop(outcome);
/// ```
#[derive(Clone)]
pub struct WorkItem {
    inner: Arc<WorkItemInner>,
}

struct WorkItemInner {
    id: u64,
    status: AtomicU8,
    faulted: AtomicBool,
    /// Taken by the single call that moves the item to `Running`
    action: Mutex<Option<Action>>,
    /// Opened once the item reaches `Completed`
    completed: Gate,
}

impl WorkItem {
    /// Create a work item from an action
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(WorkItemInner {
                id: NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed),
                status: AtomicU8::new(WorkStatus::Created as u8),
                faulted: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
                completed: Gate::new(false),
            }),
        }
    }

    /// Create a work item whose return value is delivered through an [`Outcome`]
    ///
    /// A panic inside `action` is reported as [`WorkError::Panicked`]; if the
    /// item is dropped without running, the outcome resolves to
    /// [`WorkError::Abandoned`].
    pub fn with_result<T, F>(action: F) -> (Self, Outcome<T>)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let item = Self::new(move || match panic::catch_unwind(AssertUnwindSafe(action)) {
            Ok(value) => {
                let _ = sender.send(Ok(value));
            }
            Err(payload) => {
                let _ = sender.send(Err(WorkError::Panicked(panic_message(&*payload))));
                panic::resume_unwind(payload);
            }
        });

        (item, Outcome { receiver })
    }

    /// Process-unique identifier, for logging
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn status(&self) -> WorkStatus {
        WorkStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Whether the action has run to completion (normally or by panicking)
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status() == WorkStatus::Completed
    }

    /// Whether the action panicked
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.inner.faulted.load(Ordering::Acquire)
    }

    /// Wait for the item to reach [`WorkStatus::Completed`]
    pub fn completion(&self) -> GateWait {
        self.inner.completed.wait()
    }

    /// Whether two handles refer to the same item
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Atomically move from `from` to `to`
    pub(crate) fn transition(&self, from: WorkStatus, to: WorkStatus) -> bool {
        self.inner
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Run the action on the calling thread if the item is in state `from`
    ///
    /// Returns `false` without running anything if the item was in any other
    /// state. Panics from the action are caught and recorded as a fault.
    pub(crate) fn run(&self, from: WorkStatus) -> bool {
        if !self.transition(from, WorkStatus::Running) {
            return false;
        }

        let action = self
            .inner
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(action) = action {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
                self.inner.faulted.store(true, Ordering::Release);
                warn!(
                    item = self.id(),
                    "work item panicked: {}",
                    panic_message(&*payload)
                );
            }
        }

        self.inner
            .status
            .store(WorkStatus::Completed as u8, Ordering::Release);
        self.inner.completed.open();
        true
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for WorkItem {}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

/// Completion channel of a work item created with [`WorkItem::with_result`]
///
/// Resolves to the action's return value, or to the [`WorkError`] explaining
/// why there is none.
#[must_use = "futures do nothing unless polled"]
pub struct Outcome<T> {
    receiver: oneshot::Receiver<Result<T, WorkError>>,
}

impl<T> Outcome<T> {
    /// Block the calling thread until the outcome is known
    ///
    /// # Errors
    ///
    /// Returns the [`WorkError`] recorded for the item.
    pub fn wait(self) -> Result<T, WorkError> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for Outcome<T> {
    type Output = Result<T, WorkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(WorkError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome").finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
