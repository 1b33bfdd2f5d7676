//! `enclave uninstall`.

use anyhow::Context;
use enclave_core::{PackageName, UserId};
use enclave_pm::{PackageManager, UninstallOutcome};

use crate::theme::Theme;

pub(crate) fn run(pm: &PackageManager, package: &str, user: i32, all: bool) -> anyhow::Result<()> {
    let package = PackageName::parse(package).context("invalid package name")?;

    let outcome = if all {
        pm.uninstall_everywhere(&package)
    } else {
        pm.uninstall_for_user(&package, UserId(user))
    }
    .with_context(|| format!("failed to uninstall {package}"))?;

    let name = Theme::package(package.as_str());
    match outcome {
        UninstallOutcome::NotInstalled => {
            println!("{}", Theme::info(&format!("{name} is not installed")));
        },
        UninstallOutcome::RemovedForUser => {
            println!(
                "{}",
                Theme::success(&format!("Removed {name} for user {user}; other users keep it"))
            );
        },
        UninstallOutcome::RemovedEntirely => {
            println!("{}", Theme::success(&format!("Removed {name}")));
        },
    }
    Ok(())
}
