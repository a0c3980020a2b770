use super::*;

#[test]
fn test_parse_full_config() {
    let toml_str = r#"
[store]
backend = "directory"
path = "/var/lib/rewrite-annotator"

[session]
draft_writes = false
recover_drafts = false
verify_on_unit_change = false

[logging]
level = "debug"
format = "pretty"
file = "/tmp/rr.log"
"#;

    let config: AppConfig = toml::from_str(toml_str).unwrap();

    assert_eq!(config.store.backend, StoreBackendConfig::Directory);
    assert_eq!(config.store.path, "/var/lib/rewrite-annotator");

    assert!(!config.session.draft_writes);
    assert!(!config.session.recover_drafts);
    assert!(!config.session.verify_on_unit_change);

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "pretty");
    assert_eq!(config.logging.file.as_deref(), Some("/tmp/rr.log"));
}

#[test]
fn test_empty_config_uses_defaults() {
    let config: AppConfig = toml::from_str("").unwrap();

    assert_eq!(config.store.backend, StoreBackendConfig::Sqlite);
    assert_eq!(config.store.path, "annotations.db");
    assert!(config.session.draft_writes);
    assert!(config.session.recover_drafts);
    assert!(config.session.verify_on_unit_change);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "json");
    assert!(config.logging.file.is_none());
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let toml_str = r#"
[session]
draft_writes = false
"#;

    let config: AppConfig = toml::from_str(toml_str).unwrap();

    assert!(!config.session.draft_writes);
    assert!(config.session.recover_drafts);
    assert_eq!(config.store.backend, StoreBackendConfig::Sqlite);
}

#[test]
fn test_unknown_backend_rejected() {
    let toml_str = r#"
[store]
backend = "mongodb"
"#;

    let result: Result<AppConfig, _> = toml::from_str(toml_str);
    assert!(result.is_err());
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[store]\npath = \"work.db\"\n").unwrap();

    let config = AppConfig::from_file(&path).unwrap();
    assert_eq!(config.store.path, "work.db");
}
