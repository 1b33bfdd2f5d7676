//! Enclave Core - Foundation types for the Enclave guest package runtime.
//!
//! This crate provides:
//! - Identifiers for synthetic users, application identities and packages
//! - Component addressing (`ComponentName`, `ComponentKind`)
//! - Query and install flag sets
//! - The on-disk storage layout shared by every other crate

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dirs;
pub mod error;
pub mod flags;
pub mod ids;
pub mod kind;

pub use dirs::{EnclaveHome, StorageLayout};
pub use error::{CoreError, CoreResult};
pub use flags::{InstallFlags, QueryFlags};
pub use ids::{AppId, ComponentName, PackageName, UserId, app_id_of, uid, user_of};
pub use kind::ComponentKind;
