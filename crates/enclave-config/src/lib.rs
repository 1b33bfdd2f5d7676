//! Enclave Config - Layered configuration for the Enclave runtime.
//!
//! Configuration is assembled from:
//! 1. Embedded defaults (`defaults.toml`)
//! 2. The user file at `<home>/config.toml`
//! 3. `ENCLAVE_*` environment variables, for fields the user file left unset
//!
//! # Example
//!
//! ```rust,no_run
//! let config = enclave_config::load(None)?;
//! println!("host package: {}", config.host.package);
//! # Ok::<(), enclave_config::ConfigError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod env;
mod error;
mod loader;
mod merge;
mod types;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_FILE_NAME, load, load_file, load_with_env};
pub use merge::deep_merge;
pub use types::{
    BroadcastSection, Config, HostSection, LoggingSection, StorageSection, UsersSection,
};
pub use validate::validate;
