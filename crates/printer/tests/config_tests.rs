//! Configuration loading tests

use printer::config::{PrinterConfig, load_config};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("printer.toml");

    let mut config = PrinterConfig::default();
    config.general.log_level = "debug".to_string();
    config.printer.vendor_id = Some("0x0fe6".to_string());
    config.printer.product_id = Some("0x811e".to_string());
    config.permission.timeout_secs = Some(30);
    config.save(&path).unwrap();

    let loaded = PrinterConfig::load(Some(path)).unwrap();

    assert_eq!(loaded, config);
    assert_eq!(loaded.target_ids().unwrap(), Some((0x0fe6, 0x811e)));
    assert_eq!(loaded.permission_timeout(), Some(Duration::from_secs(30)));
}

#[test]
fn test_default_config_serializes_without_optional_fields() {
    let content = toml::to_string_pretty(&PrinterConfig::default()).unwrap();

    assert!(content.contains("log_level = \"info\""));
    assert!(content.contains("print_timeout_ms = 100000"));
    assert!(!content.contains("vendor_id"));
    assert!(!content.contains("timeout_secs"));
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printer.toml");
    fs::write(&path, "").unwrap();

    let config = PrinterConfig::load(Some(path)).unwrap();

    assert_eq!(config, PrinterConfig::default());
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let cases = [
        "[general]\nlog_level = \"loud\"\n",
        "[printer]\nvendor_id = \"0x0fe6\"\n",
        "[printer]\nvendor_id = \"0fe6\"\nproduct_id = \"0x811e\"\n",
        "[transfer]\nprint_timeout_ms = 0\n",
        "[permission]\ntimeout_secs = 0\n",
        "not toml at all",
    ];

    for (i, content) in cases.iter().enumerate() {
        let path = dir.path().join(format!("case{}.toml", i));
        fs::write(&path, content).unwrap();
        assert!(
            PrinterConfig::load(Some(path)).is_err(),
            "accepted: {}",
            content
        );
    }
}

#[test]
fn test_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    assert!(PrinterConfig::load(Some(path)).is_err());
    assert!(load_config(dir.path().join("absent.toml").to_str().unwrap()).is_err());
}

#[test]
fn test_load_config_from_string_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printer.toml");
    fs::write(&path, "[transfer]\ndefault_timeout_ms = 250\n").unwrap();

    let config = load_config(path.to_str().unwrap()).unwrap();

    assert_eq!(config.transfer.default_timeout_ms, 250);
    assert_eq!(config.transfer.print_timeout_ms, 100_000);
}
