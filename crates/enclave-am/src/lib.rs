//! Enclave AM - Runtime bookkeeping that follows the package registry.
//!
//! This crate provides:
//! - [`DeadlineQueue`]: a min-heap of deadlines with lazy cancellation
//! - [`PendingBroadcastTracker`]: force-completes broadcasts whose receiver
//!   never finished, from a single watchdog thread
//! - [`ReceiverMirror`]: keeps host-side receiver registrations in step with
//!   installed guest packages
//! - [`JobBookkeeper`]: scheduled jobs keyed by process, dropped when their
//!   package goes away
//!
//! The mirror and the bookkeeper are [`PackageWatcher`](enclave_events::PackageWatcher)s
//! and hold only a weak reference to the registry.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod broadcast;
pub mod deadline;
pub mod error;
pub mod jobs;
pub mod receivers;

pub use broadcast::{BroadcastToken, DEFAULT_BROADCAST_TIMEOUT, PendingBroadcastTracker, WatchdogHandle};
pub use deadline::DeadlineQueue;
pub use error::{AmError, AmResult};
pub use jobs::{JobBookkeeper, JobKey, JobRecord, JobSpec};
pub use receivers::{HostReceiverBridge, LoggingBridge, ReceiverMirror, RegistrationId};
