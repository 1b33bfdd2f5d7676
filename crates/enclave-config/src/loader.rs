//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml` → base
//! 2. Merge `<home>/config.toml` (user)
//! 3. Apply env var fallbacks for fields the user file left unset
//! 4. Deserialize merged tree → `Config`
//! 5. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{FieldSources, collect_leaf_paths, deep_merge};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Name of the user config file inside the Enclave home.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Load the layered configuration.
///
/// `home_override` is the Enclave home directory holding `config.toml`. If
/// `None`, `$ENCLAVE_HOME` is used, then `~/.enclave`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the user config file is malformed, or if
/// the final merged configuration fails validation.
pub fn load(home_override: Option<&Path>) -> ConfigResult<Config> {
    load_with_env(home_override, &collect_env_vars())
}

/// [`load`] against an explicit environment snapshot.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Config> {
    let home = match home_override {
        Some(h) => h.to_path_buf(),
        None => match env_vars.get("ENCLAVE_HOME") {
            Some(h) => PathBuf::from(h),
            None => home_directory()?.join(".enclave"),
        },
    };

    // 1. Embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    // 2. User config.
    let mut field_sources = FieldSources::new();
    let user_path = home.join(CONFIG_FILE_NAME);
    if let Some(overlay) = try_load_file(&user_path)? {
        collect_leaf_paths(&overlay, "", &mut field_sources);
        deep_merge(&mut merged, &overlay);
        info!(path = %user_path.display(), "loaded user config");
    }

    // 3. Env var fallbacks.
    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    // 4. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 5. Validate.
    validate::validate(&config)?;
    Ok(config)
}

/// Load a config from a specific file path (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(too_large(path, metadata.len()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    validate::validate(&config)?;
    Ok(config)
}

fn too_large(path: &Path, len: u64) -> ConfigError {
    ConfigError::ValidationError {
        field: path.display().to_string(),
        message: format!(
            "config file is {len} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit"
        ),
    }
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    let len = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if len > MAX_CONFIG_FILE_SIZE {
        return Err(too_large(path, len));
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_parse() {
        let val: toml::Value = toml::from_str(DEFAULTS_TOML).unwrap();
        let config: Config = val.try_into().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_user_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with_env(Some(dir.path()), &no_env()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[users]\nmax_users = 3\n\n[host.system_packages]\n\"com.example.launcher\" = \"/opt/launcher.pkg\"\n",
        )
        .unwrap();

        let config = load_with_env(Some(dir.path()), &no_env()).unwrap();
        assert_eq!(config.users.max_users, 3);
        assert_eq!(config.broadcast.timeout_ms, 9000);
        assert_eq!(
            config.host.system_packages.get("com.example.launcher").map(String::as_str),
            Some("/opt/launcher.pkg")
        );
        assert_eq!(config.host.caution_markers.len(), 3);
    }

    #[test]
    fn test_env_fills_unset_fields_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[logging]\nlevel = \"warn\"\n").unwrap();

        let env: HashMap<String, String> = [
            ("ENCLAVE_LOG".to_owned(), "trace".to_owned()),
            ("ENCLAVE_HOME".to_owned(), "/srv/enclave".to_owned()),
        ]
        .into_iter()
        .collect();

        let config = load_with_env(Some(dir.path()), &env).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.storage.root.as_deref(), Some("/srv/enclave"));
    }

    #[test]
    fn test_enclave_home_locates_user_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[broadcast]\ntimeout_ms = 250\n").unwrap();

        let env: HashMap<String, String> =
            [("ENCLAVE_HOME".to_owned(), dir.path().display().to_string())]
                .into_iter()
                .collect();

        let config = load_with_env(None, &env).unwrap();
        assert_eq!(config.broadcast.timeout_ms, 250);
    }

    #[test]
    fn test_invalid_merged_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[broadcast]\ntimeout_ms = 0\n").unwrap();

        let err = load_with_env(Some(dir.path()), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_malformed_user_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[users\nmax_users = ").unwrap();

        let err = load_with_env(Some(dir.path()), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_oversized_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let padding = "#".repeat(1_048_577);
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), padding).unwrap();

        let err = load_with_env(Some(dir.path()), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_load_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[host]\npackage = \"org.example.shell\"\n").unwrap();

        let config = load_file(&path).unwrap();
        assert_eq!(config.host.package, "org.example.shell");
        assert_eq!(config.users.max_users, 16);
    }
}
