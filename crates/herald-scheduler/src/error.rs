//! Error types for the scheduler.

use thiserror::Error;

use herald_campaign::ConfigurationError;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The campaign cannot be armed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}
