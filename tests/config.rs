use std::fs;
use std::path::PathBuf;

use former::{MaskPolicy, Settings};

const DEFAULTS: &str = r#"
[model]
embedding_width = 16
heads = 4
mask = "causal"
depth = 2
seq_length = 32

[run]
batch_size = 2
seq_len = 8
seed = 7

[logging]
level = "info"
"#;

fn config_dir(name: &str, default_toml: &str, local_toml: Option<&str>) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("former-config-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("default.toml"), default_toml).unwrap();
    if let Some(local) = local_toml {
        fs::write(dir.join("local.toml"), local).unwrap();
    }
    dir
}

#[test]
fn test_load_defaults() {
    let dir = config_dir("defaults", DEFAULTS, None);
    let settings = Settings::load(&dir).unwrap();
    fs::remove_dir_all(&dir).ok();

    assert_eq!(settings.model.embedding_width, 16);
    assert_eq!(settings.model.heads, 4);
    assert_eq!(settings.model.mask, MaskPolicy::Causal);
    // Unset fields take their defaults
    assert_eq!(settings.model.ff_hidden_mult, 4);
    assert_eq!(settings.model.dropout_p, 0.0);
    assert_eq!(settings.run.seed, 7);
    assert!(settings.run.weights.is_none());
    assert!(settings.logging.file.is_none());
}

#[test]
fn test_local_file_overrides_defaults() {
    let local = "[model]\nheads = 2\ndropout_p = 0.1\n";
    let dir = config_dir("local", DEFAULTS, Some(local));
    let settings = Settings::load(&dir).unwrap();
    fs::remove_dir_all(&dir).ok();

    assert_eq!(settings.model.heads, 2);
    assert_eq!(settings.model.dropout_p, 0.1);
    assert_eq!(settings.model.embedding_width, 16);
}

#[test]
fn test_rejects_zero_heads() {
    let dir = config_dir("zero-heads", &DEFAULTS.replace("heads = 4", "heads = 0"), None);
    let result = Settings::load(&dir);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_err());
}

#[test]
fn test_rejects_sequence_longer_than_model() {
    let dir = config_dir("long-seq", &DEFAULTS.replace("seq_len = 8", "seq_len = 64"), None);
    let result = Settings::load(&dir);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_err());
}

#[test]
fn test_rejects_unknown_log_level() {
    let defaults = DEFAULTS.replace("level = \"info\"", "level = \"loud\"");
    let dir = config_dir("log-level", &defaults, None);
    let result = Settings::load(&dir);
    fs::remove_dir_all(&dir).ok();

    assert!(result.is_err());
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = std::env::temp_dir().join(format!("former-config-missing-{}", std::process::id()));

    assert!(Settings::load(&dir).is_err());
}

#[test]
fn test_shipped_defaults_load() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
    let settings = Settings::load(&dir).unwrap();

    assert_eq!(settings.model.embedding_width, 128);
    assert_eq!(settings.model.heads, 8);
}
