//! Execution substrate for dispatch cycles
//!
//! The dispatcher decides *when* a cycle may run; a [`Launch`]
//! implementation decides *where*. [`ThreadLauncher`] runs every cycle on a
//! fresh OS thread. Embedders with their own pool implement [`Launch`] for it.

use crate::config::DispatcherConfig;
use std::io;
use std::thread;

/// A unit of code handed to a launcher or a resume context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs dispatch cycles on some thread
pub trait Launch: Send + Sync {
    /// Start running `cycle` asynchronously
    ///
    /// Returns once the cycle has been handed off; it must not run `cycle`
    /// on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the cycle could not be started. The dispatcher
    /// then gives back the concurrency slot it reserved for the cycle.
    fn launch(&self, cycle: Job) -> io::Result<()>;
}

impl<F> Launch for F
where
    F: Fn(Job) -> io::Result<()> + Send + Sync,
{
    fn launch(&self, cycle: Job) -> io::Result<()> {
        self(cycle)
    }
}

/// Launcher that spawns one named OS thread per dispatch cycle
#[derive(Debug, Clone)]
pub struct ThreadLauncher {
    thread_name: String,
    stack_size: Option<usize>,
}

impl ThreadLauncher {
    /// Create a launcher using the thread settings of `config`
    #[must_use]
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            thread_name: config.thread_name.clone(),
            stack_size: config.stack_size,
        }
    }
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        Self::new(&DispatcherConfig::default())
    }
}

impl Launch for ThreadLauncher {
    fn launch(&self, cycle: Job) -> io::Result<()> {
        let mut builder = thread::Builder::new().name(self.thread_name.clone());
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        builder.spawn(cycle).map(drop)
    }
}
