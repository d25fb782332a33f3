//! Error handling and types

use thiserror::Error;

/// Dispatcher configuration and submission errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Dispatcher configured with values it cannot run with
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Work item cannot be submitted in its current state
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The launcher refused to start a dispatch cycle
    #[error("Failed to launch dispatch cycle: {0}")]
    Launch(#[from] std::io::Error),
}

impl DispatchError {
    /// Check if error is due to invalid configuration
    #[must_use]
    pub const fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }

    /// Check if error is due to an invalid argument
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

/// Failure reported through a work item's own completion channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// The action panicked while running
    #[error("Work item panicked: {0}")]
    Panicked(String),

    /// The work item was dropped without ever running
    #[error("Work item was dropped before it ran")]
    Abandoned,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
