//! Async gate with herd release
//!
//! A [`Gate`] is a reusable open/closed latch. Tasks call [`Gate::wait`] and
//! are suspended while the gate is closed; a single [`Gate::open`] releases
//! every pending waiter at once. The gate can be closed and re-opened any
//! number of times over its lifetime.
//!
//! # Example
//!
//! ```rust
//! use latchpool_sync::Gate;
//!
//! # futures::executor::block_on(async {
//! let gate = Gate::new(false);
//! let waiter = gate.wait();
//!
//! gate.open();
//! waiter.await; // released by `open`
//!
//! gate.wait().await; // open gates never suspend
//! # });
//! ```

use crate::release::{ReleasePoint, Released};
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tracing::trace;

/// A reusable open/closed latch with asynchronous wait
///
/// The gate always refers to exactly one release point. While that point
/// is unfired the gate is closed and waits attach to it; opening the gate
/// fires it, which releases every attached waiter. Closing an open gate
/// swaps in a fresh unfired point, so later waits suspend again.
///
/// # Design
///
/// - **Broadcast release**: waiters share one future; firing it wakes all of
///   them without walking a waiter list under a lock
/// - **Idempotent transitions**: opening an open gate or closing a closed
///   gate changes nothing
/// - **No polling**: suspended waits are woken, never re-checked in a loop
/// - **Cloneable**: clones share the same gate
///
/// # Example
///
/// ```rust,no_run
/// use latchpool_sync::Gate;
///
/// # async fn example() {
/// let gate = Gate::default();
///
/// let mut handles = Vec::new();
/// for i in 0..100 {
///     let gate = gate.clone();
///     handles.push(compio::runtime::spawn(async move {
///         gate.wait().await;
///         println!("Released {}", i);
///     }));
/// }
///
/// // Every spawned task is released together
/// gate.open();
/// for handle in handles {
///     handle.await.unwrap();
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct Gate {
    /// Shared state between all clones of this gate
    inner: Arc<GateInner>,
}

/// Internal shared state for the gate
struct GateInner {
    /// The live release point; replaced only when closing an open gate
    current: Mutex<Arc<ReleasePoint>>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, Arc<ReleasePoint>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Arc<ReleasePoint> {
        Arc::clone(&self.lock())
    }
}

impl Gate {
    /// Create a new gate
    ///
    /// # Arguments
    ///
    /// * `initially_open` - Whether waits issued before the first transition
    ///   complete immediately
    ///
    /// # Example
    ///
    /// ```rust
    /// use latchpool_sync::Gate;
    ///
    /// assert!(!Gate::new(false).is_open());
    /// assert!(Gate::new(true).is_open());
    /// ```
    #[must_use]
    pub fn new(initially_open: bool) -> Self {
        let point = if initially_open {
            ReleasePoint::fired()
        } else {
            ReleasePoint::new()
        };

        Self {
            inner: Arc::new(GateInner {
                current: Mutex::new(Arc::new(point)),
            }),
        }
    }

    /// Whether the gate is currently open
    ///
    /// This is a snapshot; another thread may change the state immediately
    /// after it is read.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().is_fired()
    }

    /// Open or close the gate
    ///
    /// Equivalent to calling [`Gate::open`] or [`Gate::close`].
    pub fn set_open(&self, open: bool) {
        if open {
            self.open();
        } else {
            self.close();
        }
    }

    /// Open the gate, releasing every pending waiter
    ///
    /// Opening an already open gate has no effect.
    ///
    /// # Example
    ///
    /// ```rust
    /// use latchpool_sync::Gate;
    ///
    /// let gate = Gate::default();
    /// gate.open();
    /// gate.open();
    /// assert!(gate.is_open());
    /// ```
    pub fn open(&self) {
        // Fire outside the lock: waking the herd must not hold up close/wait.
        let point = self.inner.current();
        if point.fire() {
            trace!("gate opened");
        }
    }

    /// Close the gate
    ///
    /// Waits issued after this call suspend until the next [`Gate::open`].
    /// Closing an already closed gate has no effect, and waiters already
    /// pending stay attached to the same release point.
    pub fn close(&self) {
        let mut current = self.inner.lock();
        if current.is_fired() {
            *current = Arc::new(ReleasePoint::new());
            trace!("gate closed");
        }
    }

    /// Wait for the gate to be open
    ///
    /// The returned future is ready on its first poll if the gate was open
    /// when `wait` was called. Otherwise it completes when the gate is next
    /// opened, even if it is closed again before the future is polled.
    ///
    /// There is no cancellation: drop the future, or race it against another
    /// future, to stop waiting.
    ///
    /// # Example
    ///
    /// ```rust
    /// use futures::FutureExt;
    /// use latchpool_sync::Gate;
    ///
    /// let gate = Gate::new(false);
    /// assert!(gate.wait().now_or_never().is_none());
    ///
    /// let waiter = gate.wait();
    /// gate.open();
    /// assert!(waiter.now_or_never().is_some());
    /// ```
    pub fn wait(&self) -> GateWait {
        GateWait {
            released: self.inner.lock().attach(),
        }
    }

    /// Block the calling thread until the gate is open
    ///
    /// Intended for plain threads; do not call it from inside an async task.
    pub fn wait_blocking(&self) {
        futures::executor::block_on(self.wait());
    }
}

impl Default for Gate {
    /// Create a closed gate
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("is_open", &self.is_open())
            .finish()
    }
}

/// Future that resolves when the gate it was issued by is opened
///
/// Returned by [`Gate::wait`]. The release point is captured when `wait` is
/// called, not when the future is first polled.
#[must_use = "futures do nothing unless polled"]
pub struct GateWait {
    /// `None` once released, or if the gate was open at the call
    released: Option<Released>,
}

impl Future for GateWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(released) = self.released.as_mut() else {
            return Poll::Ready(());
        };

        match released.poll_unpin(cx) {
            Poll::Ready(_) => {
                self.released = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for GateWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateWait")
            .field("pending", &self.released.is_some())
            .finish()
    }
}
