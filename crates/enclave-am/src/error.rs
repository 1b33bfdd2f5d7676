//! Error types for runtime bookkeeping.

use thiserror::Error;

/// Errors from job scheduling and the broadcast watchdog.
#[derive(Debug, Error)]
pub enum AmError {
    /// The registry was dropped.
    #[error("package registry is no longer available")]
    RegistryGone,

    /// The service is not installed, not enabled or not declared.
    #[error("no usable service {0}")]
    UnknownService(String),

    /// The supervisor could not provide a process for the service.
    #[error("unable to start process {process} for {service}")]
    ProcessStart {
        /// Service component.
        service: String,
        /// Process name.
        process: String,
    },

    /// The watchdog thread could not be spawned.
    #[error("failed to spawn watchdog thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Result type for runtime bookkeeping.
pub type AmResult<T> = Result<T, AmError>;
