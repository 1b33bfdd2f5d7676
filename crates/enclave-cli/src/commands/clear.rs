//! `enclave clear`.

use anyhow::Context;
use enclave_core::{PackageName, UserId};
use enclave_pm::PackageManager;

use crate::theme::Theme;

pub(crate) fn run(pm: &PackageManager, package: &str, user: i32) -> anyhow::Result<()> {
    let package = PackageName::parse(package).context("invalid package name")?;
    pm.clear_package(&package, UserId(user))
        .with_context(|| format!("failed to clear {package} for user {user}"))?;
    println!(
        "{}",
        Theme::success(&format!(
            "Cleared data of {} for user {user}",
            Theme::package(package.as_str())
        ))
    );
    Ok(())
}
