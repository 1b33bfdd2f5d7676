//! Enclave PM - The guest package registry.
//!
//! This crate provides:
//! - [`IdentityStore`]: stable, persisted application identity allocation
//! - [`PackageRecord`]: the per-package persisted record and per-user state
//! - [`ComponentResolver`]: explicit and implicit routing request resolution
//! - [`Pipeline`]: ordered, idempotent install and removal steps
//! - [`UserManager`]: synthetic user partitions
//! - [`PackageManager`]: the facade that owns lock ordering and emits
//!   lifecycle events
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use enclave_core::{EnclaveHome, InstallFlags, UserId};
//! use enclave_pm::{InstallRequest, PackageManager};
//!
//! # fn main() -> Result<(), enclave_pm::PmError> {
//! let home = Arc::new(EnclaveHome::from_path("/var/lib/enclave"));
//! let pm = PackageManager::builder(home).build()?;
//! pm.system_ready()?;
//!
//! let result = pm.install(InstallRequest::from_path(
//!     "/sdcard/notes.pkg",
//!     InstallFlags::STORAGE,
//!     UserId::SYSTEM,
//! ));
//! assert!(result.success, "{}", result.diagnostic);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod artifact;
pub mod collab;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod installer;
pub mod record;
pub mod request;
pub mod resolver;
pub mod service;
pub mod users;

mod persist;

pub use artifact::TarArtifactParser;
pub use collab::{
    ArchitectureChecker, ArtifactParser, ContentResolver, FileContentResolver, HostAbiChecker,
    HostEnvironment, NoopSupervisor, ProcessSupervisor, StaticHost,
};
pub use descriptor::{ComponentDecl, MatchFilter, PackageDescriptor};
pub use error::{PmError, PmResult};
pub use identity::IdentityStore;
pub use installer::{InstallStep, Pipeline, StepContext};
pub use record::{PackageRecord, PackageUserState};
pub use request::RoutingRequest;
pub use resolver::ComponentResolver;
pub use service::{
    ApplicationInfo, InstallRequest, InstallResult, InstallSource, PackageInfo, PackageManager,
    PackageManagerBuilder, ScanReport, UninstallOutcome,
};
pub use users::{UserFlags, UserInfo, UserManager};
