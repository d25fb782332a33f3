#![allow(dead_code)]

use latchpool::{Gate, Job, Launch, ThreadLauncher};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct TestTimeoutGuard {
    cancelled: Arc<AtomicBool>,
}

impl Drop for TestTimeoutGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Abort the whole test binary if the guard is still alive after `duration`
///
/// A deadlocked dispatcher would otherwise hang the test run forever.
pub fn test_timeout_guard(duration: Duration) -> TestTimeoutGuard {
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = Arc::clone(&cancelled);
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        if !cancelled_clone.load(Ordering::SeqCst) {
            eprintln!("Test timeout exceeded ({}s). Aborting.", duration.as_secs());
            std::process::abort();
        }
    });
    TestTimeoutGuard { cancelled }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn wait_until(condition: impl Fn() -> bool, timeout: Duration) {
    let limit = Instant::now() + timeout;
    while !condition() {
        std::thread::yield_now();
        assert!(Instant::now() < limit, "Timed out waiting on condition.");
    }
}

/// What a [`CountingLauncher`] does with the cycles it is handed
pub enum LaunchMode {
    /// Pretend the cycle started; it never runs and keeps its slot
    Park,
    /// Run the cycle on a new thread once the gate opens
    Delay(Gate),
    /// Run the cycle on a new thread right away
    Thread,
}

/// Launcher double that counts how many dispatch cycles were started
pub struct CountingLauncher {
    starts: AtomicUsize,
    mode: LaunchMode,
}

impl CountingLauncher {
    pub fn new(mode: LaunchMode) -> Arc<Self> {
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            mode,
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Launch for CountingLauncher {
    fn launch(&self, cycle: Job) -> io::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            LaunchMode::Park => Ok(()),
            LaunchMode::Delay(enabled) => {
                let enabled = enabled.clone();
                std::thread::spawn(move || {
                    enabled.wait_blocking();
                    cycle();
                });
                Ok(())
            }
            LaunchMode::Thread => ThreadLauncher::default().launch(cycle),
        }
    }
}
