//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override. They are only applied to fields
//! that no config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::FieldSources;

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `ENCLAVE_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "ENCLAVE_HOME",
        field_path: "storage.root",
    },
    EnvMapping {
        var_name: "ENCLAVE_LOG",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "ENCLAVE_MAX_USERS",
        field_path: "users.max_users",
    },
    EnvMapping {
        var_name: "ENCLAVE_BROADCAST_TIMEOUT_MS",
        field_path: "broadcast.timeout_ms",
    },
];

/// Apply environment variable fallbacks to fields that were **not** set by
/// the user config file.
///
/// Returns the number of env vars applied.
pub(crate) fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if sources.contains(mapping.field_path) {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "applying env var fallback"
            );

            set_field_from_string(merged, mapping.field_path, val);
            sources.insert(mapping.field_path.to_owned());
            count = count.saturating_add(1);
        }
    }

    count
}

/// Snapshot the process environment.
#[must_use]
pub(crate) fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Set a dotted-path field, creating intermediate tables.
fn set_field_from_string(root: &mut toml::Value, path: &str, val: &str) {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        if let Some(table) = root.as_table_mut() {
            table.insert(path.to_owned(), coerce_to_toml_value(path, val));
        }
        return;
    };

    let mut current = root;
    for segment in parents.split('.') {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), coerce_to_toml_value(path, val));
    }
}

/// Coerce an env var value to the TOML type of the field it targets.
///
/// Integer fields that fail to parse stay strings so that deserialization
/// reports the bad value with its field name.
fn coerce_to_toml_value(path: &str, val: &str) -> toml::Value {
    if matches!(path, "users.max_users" | "broadcast.timeout_ms") {
        if let Ok(n) = val.trim().parse::<i64>() {
            return toml::Value::Integer(n);
        }
    }
    toml::Value::String(val.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_apply_env_fallbacks() {
        let mut merged: toml::Value = toml::from_str("[logging]\nformat = \"json\"").unwrap();
        let mut sources = FieldSources::new();
        let env = make_env(&[("ENCLAVE_LOG", "debug"), ("ENCLAVE_HOME", "/srv/enclave")]);

        let count = apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(count, 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["logging"]["format"].as_str(), Some("json"));
        assert_eq!(merged["storage"]["root"].as_str(), Some("/srv/enclave"));
        assert!(sources.contains("logging.level"));
    }

    #[test]
    fn test_file_value_wins_over_env() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned());
        let env = make_env(&[("ENCLAVE_LOG", "trace")]);

        let count = apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(count, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn test_integer_fields_are_coerced() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut sources = FieldSources::new();
        let env = make_env(&[("ENCLAVE_MAX_USERS", "4"), ("ENCLAVE_BROADCAST_TIMEOUT_MS", "abc")]);

        apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(merged["users"]["max_users"].as_integer(), Some(4));
        assert_eq!(merged["broadcast"]["timeout_ms"].as_str(), Some("abc"));
    }

    #[test]
    fn test_unrelated_vars_are_ignored() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut sources = FieldSources::new();
        let env = make_env(&[("HOME", "/root"), ("ENCLAVE_UNKNOWN", "x")]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 0);
        assert!(merged.as_table().unwrap().is_empty());
    }
}
