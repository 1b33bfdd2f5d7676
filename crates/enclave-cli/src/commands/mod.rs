//! Command implementations.

pub(crate) mod clear;
pub(crate) mod info;
pub(crate) mod install;
pub(crate) mod list;
pub(crate) mod resolve;
pub(crate) mod scan;
pub(crate) mod uninstall;
pub(crate) mod users;
