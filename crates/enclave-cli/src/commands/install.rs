//! `enclave install`.

use std::path::Path;

use anyhow::{Context, bail};
use clap::Args;
use enclave_core::{InstallFlags, UserId};
use enclave_pm::{InstallRequest, PackageManager};

use crate::theme::Theme;

/// Arguments for `enclave install`.
#[derive(Debug, Args)]
pub(crate) struct InstallArgs {
    /// Artifact path, or a `file://` locator with `--content`
    pub(crate) source: String,

    /// User to install for
    #[arg(short, long, default_value_t = 0)]
    pub(crate) user: i32,

    /// Treat the source as a content locator and stage it first
    #[arg(long)]
    pub(crate) content: bool,

    /// Copy the artifact into managed storage
    #[arg(long)]
    pub(crate) copy: bool,

    /// Mark the package as system-provided
    #[arg(long)]
    pub(crate) system: bool,
}

impl InstallArgs {
    fn flags(&self) -> InstallFlags {
        let mut flags = InstallFlags::empty();
        flags.set(InstallFlags::STORAGE, self.copy);
        flags.set(InstallFlags::SYSTEM, self.system);
        flags
    }

    fn request(&self) -> anyhow::Result<InstallRequest> {
        let user = UserId(self.user);
        if self.content {
            Ok(InstallRequest::from_content(
                to_locator(&self.source)?,
                self.flags(),
                user,
            ))
        } else {
            Ok(InstallRequest::from_path(&self.source, self.flags(), user))
        }
    }
}

/// Turn a plain path into a `file://` locator; pass locators through.
fn to_locator(source: &str) -> anyhow::Result<String> {
    if source.contains("://") {
        return Ok(source.to_owned());
    }
    let path = Path::new(source)
        .canonicalize()
        .with_context(|| format!("cannot resolve {source}"))?;
    let url = url::Url::from_file_path(&path)
        .map_err(|()| anyhow::anyhow!("{} cannot be expressed as a file URL", path.display()))?;
    Ok(url.to_string())
}

pub(crate) fn run(pm: &PackageManager, args: &InstallArgs) -> anyhow::Result<()> {
    let result = pm.install(args.request()?);

    for warning in &result.warnings {
        eprintln!("{}", Theme::warning(warning));
    }

    if !result.success {
        eprintln!("{}", Theme::error(&result.diagnostic));
        if let Some(offending) = &result.offending_package {
            eprintln!("{}", Theme::kv("offending package", offending));
        }
        bail!("install failed");
    }

    let name = result
        .package_name
        .as_ref()
        .map_or_else(|| "package".to_owned(), ToString::to_string);
    println!(
        "{}",
        Theme::success(&format!("Installed {} for user {}", Theme::package(&name), args.user))
    );
    if let Some(uid) = result
        .package_name
        .as_ref()
        .and_then(|p| pm.uid_for_package(p, UserId(args.user)))
    {
        println!("{}", Theme::kv("uid", &uid.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(source: &str) -> InstallArgs {
        InstallArgs {
            source: source.to_owned(),
            user: 0,
            content: false,
            copy: false,
            system: false,
        }
    }

    #[test]
    fn test_flags_follow_switches() {
        let mut a = args("/tmp/x.pkg");
        assert_eq!(a.flags(), InstallFlags::empty());

        a.copy = true;
        a.system = true;
        assert_eq!(a.flags(), InstallFlags::STORAGE | InstallFlags::SYSTEM);
    }

    #[test]
    fn test_locator_passthrough() {
        assert_eq!(to_locator("file:///tmp/a.pkg").unwrap(), "file:///tmp/a.pkg");
    }

    #[test]
    fn test_plain_path_becomes_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pkg");
        std::fs::write(&path, b"x").unwrap();

        let locator = to_locator(path.to_str().unwrap()).unwrap();
        assert!(locator.starts_with("file://"));
        assert!(locator.ends_with("/a.pkg"));
    }

    #[test]
    fn test_missing_path_is_an_error() {
        assert!(to_locator("/definitely/not/here.pkg").is_err());
    }
}
