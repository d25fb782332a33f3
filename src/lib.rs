//! latchpool: an async gate and a bounded-concurrency dispatcher
//!
//! This library provides two independent coordination primitives:
//!
//! - [`Gate`] - a reusable open/closed latch; any number of tasks wait on
//!   it and a single `open` releases them all
//! - [`Dispatcher`] - a scheduler that runs queued [`WorkItem`]s with a hard
//!   cap on how many execute at once, and lets code already running inside
//!   it execute further items inline without breaking the cap
//!
//! [`scope::AsyncScope`] suppresses the thread's ambient resume context
//! while synchronous code blocks on asynchronous work.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod launcher;
pub mod scope;
pub mod work_item;

// Re-export commonly used types
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Result, WorkError};
pub use latchpool_sync::{Gate, GateWait};
pub use launcher::{Job, Launch, ThreadLauncher};
pub use scope::{AsyncScope, ResumeContext};
pub use work_item::{Outcome, WorkItem, WorkStatus};
