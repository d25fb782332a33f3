//! Dispatcher configuration

use crate::error::{DispatchError, Result};

/// Default thread name used by [`crate::ThreadLauncher`]
pub const DEFAULT_THREAD_NAME: &str = "latchpool-worker";

/// Settings for a [`crate::Dispatcher`]
///
/// # Example
///
/// ```rust
/// use latchpool::DispatcherConfig;
///
/// let config = DispatcherConfig::new(4)
///     .thread_name("indexer")
///     .stack_size(256 * 1024);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.max_concurrency, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum number of work items running at once
    pub max_concurrency: u32,

    /// Name given to worker threads
    pub thread_name: String,

    /// Stack size for worker threads (platform default when `None`)
    pub stack_size: Option<usize>,
}

impl DispatcherConfig {
    /// Create a configuration with the given concurrency limit
    #[must_use]
    pub fn new(max_concurrency: u32) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }

    /// Set the worker thread name
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker thread stack size
    #[must_use]
    pub const fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfiguration`] if:
    /// - `max_concurrency` is less than 1
    /// - `thread_name` is empty or contains a NUL byte
    /// - `stack_size` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency < 1 {
            return Err(DispatchError::InvalidConfiguration(format!(
                "max_concurrency must be at least 1, got {}",
                self.max_concurrency
            )));
        }

        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(DispatchError::InvalidConfiguration(format!(
                "thread_name must be non-empty and free of NUL bytes, got {:?}",
                self.thread_name
            )));
        }

        if self.stack_size == Some(0) {
            return Err(DispatchError::InvalidConfiguration(
                "stack_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DispatcherConfig {
    /// One slot per CPU core, named worker threads, default stack size
    fn default() -> Self {
        Self {
            max_concurrency: u32::try_from(num_cpus::get().max(1)).unwrap_or(u32::MAX),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_concurrency >= 1);
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
        assert_eq!(config.stack_size, None);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = DispatcherConfig::new(0).validate().unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_bad_thread_name_rejected() {
        assert!(DispatcherConfig::new(1).thread_name("").validate().is_err());
        assert!(DispatcherConfig::new(1)
            .thread_name("bad\0name")
            .validate()
            .is_err());
    }

    #[test]
    fn test_zero_stack_size_rejected() {
        let err = DispatcherConfig::new(1).stack_size(0).validate().unwrap_err();
        assert!(err.is_invalid_configuration());
    }
}
