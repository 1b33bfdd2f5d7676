//! `enclave info`.

use anyhow::{Context, bail};
use enclave_core::{PackageName, QueryFlags, UserId};
use enclave_pm::{ComponentDecl, PackageManager};

use crate::theme::Theme;

pub(crate) fn run(pm: &PackageManager, package: &str, user: i32) -> anyhow::Result<()> {
    let package = PackageName::parse(package).context("invalid package name")?;
    let flags = QueryFlags::GET_COMPONENTS | QueryFlags::GET_META_DATA;

    let Some(info) = pm.package_info(&package, flags, UserId(user)) else {
        bail!("{package} is not installed for user {user}");
    };
    let app = &info.application;

    println!("{}", Theme::header(info.package_name.as_str()));
    println!("{}", Theme::separator());
    let version = format!(
        "{} ({})",
        info.version_name.as_deref().unwrap_or("-"),
        info.version_code
    );
    println!("{}", Theme::kv("version", &version));
    if let Some(label) = &info.label {
        println!("{}", Theme::kv("label", label));
    }
    println!("{}", Theme::kv("uid", &info.uid.to_string()));
    println!("{}", Theme::kv("app id", &app.app_id.to_string()));
    if let Some(group) = &info.shared_group {
        println!("{}", Theme::kv("shared group", group));
    }
    println!("{}", Theme::kv("process", &app.process_name));
    println!("{}", Theme::kv("code path", &app.code_path.display().to_string()));
    println!("{}", Theme::kv("native libs", &app.native_library_dir.display().to_string()));
    println!("{}", Theme::kv("data", &app.data_dir.display().to_string()));
    println!("{}", Theme::kv("data (de)", &app.device_protected_data_dir.display().to_string()));
    println!("{}", Theme::kv("external", &app.external_data_dir.display().to_string()));
    println!("{}", Theme::kv("flags", &format!("{:?}", info.install_flags)));
    println!("{}", Theme::kv("installed", &Theme::timestamp(&info.first_install_time)));
    println!("{}", Theme::kv("updated", &Theme::timestamp(&info.last_update_time)));

    for (key, value) in &app.meta_data {
        println!("{}", Theme::kv(&format!("meta {key}"), value));
    }

    print_components("Activities", &info.activities);
    print_components("Services", &info.services);
    print_components("Receivers", &info.receivers);
    print_components("Providers", &info.providers);
    Ok(())
}

fn print_components(title: &str, components: &[ComponentDecl]) {
    if components.is_empty() {
        return;
    }
    println!("\n{}", Theme::header(title));
    for c in components {
        let mut line = format!("  {}", c.name);
        if !c.authorities.is_empty() {
            line.push_str(&format!(" [{}]", c.authorities.join(", ")));
        }
        if !c.enabled {
            line.push_str(&Theme::dimmed(" (disabled)"));
        }
        println!("{line}");
    }
}
