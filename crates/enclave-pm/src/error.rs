//! Error types for the package registry.

use std::io;
use std::path::PathBuf;

use enclave_core::{CoreError, PackageName, UserId};
use thiserror::Error;

/// Errors that can occur in registry, installer and identity operations.
#[derive(Debug, Error)]
pub enum PmError {
    /// Filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An artifact could not be read as a package.
    #[error("failed to parse artifact {path}: {message}")]
    Parse {
        /// Artifact path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The package manifest is structurally invalid.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// A persisted record could not be (de)serialized.
    #[error("serialization error at {path}: {source}")]
    Serialization {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A package or component name was invalid.
    #[error(transparent)]
    InvalidName(#[from] CoreError),

    /// The artifact declares the host's own package name.
    #[error("cannot install the host package inside itself ({0})")]
    HostPackage(PackageName),

    /// The artifact carries no native code this host can run.
    #[error("package {package} is not compatible with this host (native code for: {abis})")]
    IncompatibleArchitecture {
        /// Offending package.
        package: PackageName,
        /// ABIs found in the artifact.
        abis: String,
    },

    /// No application identity is left to hand out.
    #[error("application identities exhausted")]
    IdentitiesExhausted,

    /// An installer step failed. Earlier steps are not rolled back.
    #[error("install step '{step}' failed: {source}")]
    StepFailed {
        /// Step name.
        step: &'static str,
        /// Cause.
        #[source]
        source: Box<PmError>,
    },

    /// The synthetic user does not exist.
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// The package is not registered.
    #[error("unknown package {0}")]
    UnknownPackage(String),

    /// The component is not declared by any registered package.
    #[error("unknown component {0}")]
    UnknownComponent(String),

    /// The configured maximum number of users exists already.
    #[error("user limit reached ({max})")]
    UserLimit {
        /// Configured maximum.
        max: usize,
    },

    /// The user may not be removed.
    #[error("user {0} cannot be removed")]
    ProtectedUser(UserId),

    /// A content locator could not be opened.
    #[error("content locator '{locator}': {message}")]
    Content {
        /// The locator.
        locator: String,
        /// What went wrong.
        message: String,
    },

    /// The artifact parser panicked.
    #[error("artifact parser panicked: {0}")]
    ParserPanic(String),
}

impl PmError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for registry operations.
pub type PmResult<T> = Result<T, PmError>;
