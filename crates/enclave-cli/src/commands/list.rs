//! `enclave list`.

use enclave_core::{QueryFlags, UserId};
use enclave_pm::PackageManager;

use crate::theme::Theme;

pub(crate) fn run(pm: &PackageManager, user: i32) -> anyhow::Result<()> {
    let packages = pm.installed_packages(QueryFlags::empty(), UserId(user));
    if packages.is_empty() {
        println!("{}", Theme::info(&format!("No packages installed for user {user}")));
        return Ok(());
    }

    println!("{}", Theme::header(&format!("Installed packages (user {user})")));
    println!("  {:<36} {:>8} {:<12} UPDATED", "PACKAGE", "UID", "VERSION");
    println!("{}", Theme::separator());
    for info in &packages {
        let version = info
            .version_name
            .clone()
            .unwrap_or_else(|| info.version_code.to_string());
        let mut line = format!(
            "  {:<36} {:>8} {:<12} {}",
            info.package_name.as_str(),
            info.uid,
            version,
            Theme::timestamp(&info.last_update_time)
        );
        if info.application.system {
            line.push_str(&Theme::dimmed(" [system]"));
        }
        if info.application.stopped {
            line.push_str(&Theme::dimmed(" [stopped]"));
        }
        println!("{line}");
    }
    println!("\n{}", Theme::dimmed(&format!("{} package(s)", packages.len())));
    Ok(())
}
