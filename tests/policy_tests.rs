#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for the beer game client.
//!
//! These tests verify that Cargo.toml keeps the panic-free lint policy and
//! the feature layout the crate documents. If any test fails, the manifest
//! has drifted from the agreed-upon standards.
//!
//! All checks are synchronous filesystem reads.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Reads and parses Cargo.toml.
fn manifest() -> toml::Table {
    let path = project_root().join("Cargo.toml");
    let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    toml::from_str(&contents).expect("Cargo.toml must be valid TOML")
}

fn table<'a>(parent: &'a toml::Table, key: &str) -> &'a toml::Table {
    parent
        .get(key)
        .and_then(toml::Value::as_table)
        .unwrap_or_else(|| panic!("Cargo.toml is missing the [{key}] table"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: panic_policy
// ─────────────────────────────────────────────────────────────────────────────

mod panic_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_denies_all_panic_prone_lints() {
        let manifest = manifest();
        let clippy = table(table(&manifest, "lints"), "clippy");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(toml::Value::as_str),
                Some("deny"),
                "Cargo.toml must set `{lint} = \"deny\"` in [lints.clippy] so \
                 library code stays panic-free."
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: feature_policy
// ─────────────────────────────────────────────────────────────────────────────

mod feature_policy {
    use super::*;

    fn strings(value: &toml::Value) -> Vec<&str> {
        value
            .as_array()
            .expect("feature lists are arrays")
            .iter()
            .filter_map(toml::Value::as_str)
            .collect()
    }

    #[test]
    fn both_channels_are_default_features() {
        let manifest = manifest();
        let features = table(&manifest, "features");
        let default = strings(&features["default"]);
        assert!(default.contains(&"transport-websocket"));
        assert!(default.contains(&"transport-http"));
    }

    #[test]
    fn channel_features_gate_their_optional_crates() {
        let manifest = manifest();
        let features = table(&manifest, "features");
        let deps = table(&manifest, "dependencies");

        for (feature, krate) in [
            ("transport-websocket", "tokio-tungstenite"),
            ("transport-http", "reqwest"),
        ] {
            assert_eq!(strings(&features[feature]), [format!("dep:{krate}")]);
            let optional = deps[krate]
                .get("optional")
                .and_then(toml::Value::as_bool)
                .unwrap_or(false);
            assert!(optional, "`{krate}` must be optional behind `{feature}`");
        }
    }

    #[test]
    fn demo_requires_both_channels() {
        let manifest = manifest();
        let examples = manifest["example"].as_array().expect("[[example]] entries");
        let play = examples
            .iter()
            .find(|e| e.get("name").and_then(toml::Value::as_str) == Some("play"))
            .expect("the `play` demo is registered");
        let required = strings(&play["required-features"]);
        assert_eq!(required, ["transport-websocket", "transport-http"]);
    }

    #[test]
    fn dev_dependencies_only_repeat_crates_to_add_features() {
        let manifest = manifest();
        let deps = table(&manifest, "dependencies");
        let dev = table(&manifest, "dev-dependencies");

        for (name, entry) in dev {
            if deps.contains_key(name) {
                assert!(
                    entry.get("features").is_some(),
                    "dev-dependency `{name}` repeats a normal dependency without adding features"
                );
            }
        }
    }
}
