//! Config hash stability.
//!
//! GREEN when:
//! - Loading the same layers twice yields the same hash and canonical JSON.
//! - Reordering keys inside a document does not change the hash.
//! - Changing a value changes the hash.
//! - Later layers override earlier ones, and the typed view sees the result.
//! - Loading from files matches loading from strings.

use pxd_config::{load_layered_yaml, load_layered_yaml_from_strings};

const BASE_YAML: &str = r#"
ledger:
  commission_bps: 50
  trade_timeout_secs: 1800
  cancel_limit: 10
runtime:
  sweep_interval_secs: 300
  large_trade_threshold_units: 10000
audit:
  path: "var/audit/desk.jsonl"
"#;

const BASE_YAML_REORDERED: &str = r#"
audit:
  path: "var/audit/desk.jsonl"
runtime:
  large_trade_threshold_units: 10000
  sweep_interval_secs: 300
ledger:
  cancel_limit: 10
  trade_timeout_secs: 1800
  commission_bps: 50
"#;

const OVERLAY_YAML: &str = r#"
ledger:
  commission_bps: 25
runtime:
  sweep_interval_secs: 60
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(original.config_hash, reordered.config_hash);
    assert_eq!(original.canonical_json, reordered.canonical_json);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[&BASE_YAML.replace("1800", "900")]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_wins_and_typed_view_follows() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(
        loaded
            .config_json
            .pointer("/ledger/commission_bps")
            .and_then(|v| v.as_u64()),
        Some(25)
    );

    let desk = loaded.desk().unwrap();
    assert_eq!(desk.ledger.commission_bps, 25);
    assert_eq!(desk.ledger.trade_timeout_secs, 1800);
    assert_eq!(desk.runtime.sweep_interval_secs, 60);
    assert_eq!(desk.runtime.bus_capacity, 1024, "untouched keys keep defaults");
    assert_eq!(desk.audit.path.as_deref(), Some("var/audit/desk.jsonl"));
}

#[test]
fn empty_overlay_changes_nothing() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, ""]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn files_and_strings_agree() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).unwrap();
    std::fs::write(&overlay, OVERLAY_YAML).unwrap();

    let paths = [
        base.to_string_lossy().into_owned(),
        overlay.to_string_lossy().into_owned(),
    ];
    let from_files = load_layered_yaml(&paths).unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_names_the_path() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.yaml"));
}
