//! Post-merge configuration validation.

use std::path::Path;

use enclave_core::PackageName;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_storage(config)?;
    validate_host(config)?;
    validate_users(config)?;
    validate_broadcast(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate_storage(config: &Config) -> ConfigResult<()> {
    if let Some(root) = &config.storage.root {
        if root.trim().is_empty() {
            return Err(invalid("storage.root", "must not be empty"));
        }
        if !Path::new(root).is_absolute() {
            return Err(invalid(
                "storage.root",
                format!("'{root}' is not an absolute path"),
            ));
        }
    }
    Ok(())
}

fn validate_host(config: &Config) -> ConfigResult<()> {
    let host = &config.host;

    PackageName::parse(&host.package).map_err(|e| invalid("host.package", e.to_string()))?;

    if host.caution_markers.iter().any(|m| m.is_empty()) {
        return Err(invalid(
            "host.caution_markers",
            "markers must not be empty strings",
        ));
    }

    for (name, path) in &host.system_packages {
        let field = format!("host.system_packages.{name}");
        PackageName::parse(name).map_err(|e| invalid(field.clone(), e.to_string()))?;
        if name == &host.package {
            return Err(invalid(field, "the host package cannot be a system package"));
        }
        if path.trim().is_empty() {
            return Err(invalid(field, "artifact path must not be empty"));
        }
    }

    Ok(())
}

fn validate_users(config: &Config) -> ConfigResult<()> {
    if config.users.max_users == 0 {
        return Err(invalid(
            "users.max_users",
            "must be at least 1; user 0 always exists",
        ));
    }
    Ok(())
}

fn validate_broadcast(config: &Config) -> ConfigResult<()> {
    if config.broadcast.timeout_ms == 0 {
        return Err(invalid("broadcast.timeout_ms", "must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_timeout_zero() {
        let mut config = Config::default();
        config.broadcast.timeout_ms = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "broadcast.timeout_ms");
    }

    #[test]
    fn test_invalid_max_users_zero() {
        let mut config = Config::default();
        config.users.max_users = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "users.max_users");
    }

    #[test]
    fn test_invalid_host_package() {
        let mut config = Config::default();
        config.host.package = "host".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "host.package");
    }

    #[test]
    fn test_system_package_cannot_be_host() {
        let mut config = Config::default();
        config
            .host
            .system_packages
            .insert("dev.enclave.host".to_owned(), "/opt/host.pkg".to_owned());
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "host.system_packages.dev.enclave.host"
        );
    }

    #[test]
    fn test_relative_storage_root() {
        let mut config = Config::default();
        config.storage.root = Some("relative/dir".to_owned());
        assert_eq!(field_of(validate(&config).unwrap_err()), "storage.root");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.level");
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }
}
