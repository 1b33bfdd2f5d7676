//! Layer merging.

use std::collections::BTreeSet;

/// Dotted paths of the leaf fields a config file set explicitly.
pub(crate) type FieldSources = BTreeSet<String>;

/// Recursively deep-merge `overlay` into `base`.
///
/// - Tables merge recursively per-field.
/// - Scalars and arrays from the overlay **replace** the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Record every leaf path of `val` under `prefix` into `sources`.
///
/// Arrays count as leaves.
pub(crate) fn collect_leaf_paths(val: &toml::Value, prefix: &str, sources: &mut FieldSources) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            collect_leaf_paths(child, &path, sources);
        }
    } else if !prefix.is_empty() {
        sources.insert(prefix.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_tables_merge_per_field() {
        let mut base = parse("[users]\nmax_users = 16\n[broadcast]\ntimeout_ms = 9000");
        deep_merge(&mut base, &parse("[users]\nmax_users = 4"));

        assert_eq!(base["users"]["max_users"].as_integer(), Some(4));
        assert_eq!(base["broadcast"]["timeout_ms"].as_integer(), Some(9000));
    }

    #[test]
    fn test_arrays_replace() {
        let mut base = parse("[host]\ncaution_markers = [\"a\", \"b\"]");
        deep_merge(&mut base, &parse("[host]\ncaution_markers = [\"c\"]"));

        let markers = base["host"]["caution_markers"].as_array().unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].as_str(), Some("c"));
    }

    #[test]
    fn test_new_keys_are_inserted() {
        let mut base = parse("[host]\npackage = \"dev.enclave.host\"");
        deep_merge(
            &mut base,
            &parse("[host.system_packages]\n\"com.example.launcher\" = \"/opt/l.pkg\""),
        );

        assert_eq!(
            base["host"]["system_packages"]["com.example.launcher"].as_str(),
            Some("/opt/l.pkg")
        );
        assert_eq!(base["host"]["package"].as_str(), Some("dev.enclave.host"));
    }

    #[test]
    fn test_collect_leaf_paths() {
        let val = parse("[logging]\nlevel = \"debug\"\ndirectives = []\n[storage]\nroot = \"/x\"");
        let mut sources = FieldSources::new();
        collect_leaf_paths(&val, "", &mut sources);

        let paths: Vec<&str> = sources.iter().map(String::as_str).collect();
        assert_eq!(paths, ["logging.directives", "logging.level", "storage.root"]);
    }
}
