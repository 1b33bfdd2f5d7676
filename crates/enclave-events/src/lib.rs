//! Enclave Events - Package lifecycle notifications.
//!
//! The registry facade emits a [`LifecycleEvent`] after every durable install
//! or uninstall. Consumers implement [`PackageWatcher`] and register with a
//! [`WatcherRegistry`], which delivers synchronously in registration order
//! and isolates each watcher from panics in the others.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod event;
mod watcher;

pub use event::{LifecycleEvent, LifecycleKind};
pub use watcher::{FnWatcher, PackageWatcher, WatcherId, WatcherRegistry};
