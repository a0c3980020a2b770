use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, ensure, Context};
use rr_store::{DocumentStore, JsonDirStore, SqliteDocumentStore};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, StoreBackendConfig};
use crate::coordinator::SessionOptions;

// ---------------------------------------------------------------------------
// Validated settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Directory,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub store: StoreSettings,
    pub session: SessionOptions,
    pub logging: LogSettings,
}

// ---------------------------------------------------------------------------
// into_runtime: converts raw AppConfig into validated RuntimeConfig
// ---------------------------------------------------------------------------

pub fn into_runtime(config: AppConfig) -> Result<RuntimeConfig, anyhow::Error> {
    ensure!(
        !config.store.path.trim().is_empty(),
        "store path must not be empty"
    );
    ensure!(
        EnvFilter::try_new(&config.logging.level).is_ok(),
        "invalid log level: {}",
        config.logging.level
    );

    let format = match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        "pretty" => LogFormat::Pretty,
        "compact" => LogFormat::Compact,
        other => bail!("unknown log format: {other} (expected json, pretty or compact)"),
    };

    let file = match config.logging.file {
        Some(file) => {
            ensure!(!file.trim().is_empty(), "log file path must not be empty");
            Some(PathBuf::from(file))
        }
        None => None,
    };

    let backend = match config.store.backend {
        StoreBackendConfig::Sqlite => StoreBackend::Sqlite,
        StoreBackendConfig::Directory => StoreBackend::Directory,
    };

    Ok(RuntimeConfig {
        store: StoreSettings {
            backend,
            path: PathBuf::from(config.store.path),
        },
        session: SessionOptions {
            draft_writes: config.session.draft_writes,
            recover_drafts: config.session.recover_drafts,
            verify_on_unit_change: config.session.verify_on_unit_change,
        },
        logging: LogSettings {
            level: config.logging.level,
            format,
            file,
        },
    })
}

/// Opens the configured backend and makes sure its schema exists.
pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn DocumentStore>, anyhow::Error> {
    let store: Arc<dyn DocumentStore> = match settings.backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = settings.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create store directory {}", parent.display())
                    })?;
                }
            }
            let store = SqliteDocumentStore::new(&settings.path).with_context(|| {
                format!("failed to open database {}", settings.path.display())
            })?;
            Arc::new(store)
        }
        StoreBackend::Directory => Arc::new(JsonDirStore::new(settings.path.clone())),
    };

    store
        .init()
        .with_context(|| format!("failed to initialize store at {}", settings.path.display()))?;
    Ok(store)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoggingConfig, SessionConfig, StoreConfig};

    fn make_config() -> AppConfig {
        AppConfig {
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_conversion() {
        let runtime = into_runtime(make_config()).expect("valid config should convert");

        assert_eq!(runtime.store.backend, StoreBackend::Sqlite);
        assert_eq!(runtime.store.path, PathBuf::from("annotations.db"));
        assert!(runtime.session.draft_writes);
        assert!(runtime.session.recover_drafts);
        assert!(runtime.session.verify_on_unit_change);
        assert_eq!(runtime.logging.format, LogFormat::Json);
        assert!(runtime.logging.file.is_none());
    }

    #[test]
    fn test_empty_store_path_rejected() {
        let mut config = make_config();
        config.store.path = "  ".to_owned();

        match into_runtime(config) {
            Err(e) => assert!(e.to_string().contains("store path must not be empty")),
            Ok(_) => panic!("expected error for empty store path"),
        }
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = make_config();
        config.logging.format = "xml".to_owned();

        match into_runtime(config) {
            Err(e) => assert!(e.to_string().contains("unknown log format: xml")),
            Ok(_) => panic!("expected error for unknown log format"),
        }
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = make_config();
        config.logging.level = "rr_session=loud".to_owned();

        match into_runtime(config) {
            Err(e) => assert!(e.to_string().contains("invalid log level")),
            Ok(_) => panic!("expected error for invalid log level"),
        }
    }

    #[test]
    fn test_open_sqlite_store_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StoreSettings {
            backend: StoreBackend::Sqlite,
            path: dir.path().join("nested").join("annotations.db"),
        };

        let store = open_store(&settings).expect("open store");
        assert!(store.list_templates().expect("list").is_empty());
        assert!(settings.path.exists());
    }

    #[test]
    fn test_open_directory_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StoreSettings {
            backend: StoreBackend::Directory,
            path: dir.path().join("store"),
        };

        let store = open_store(&settings).expect("open store");
        assert!(store.list_in_progress().expect("list").is_empty());
        assert!(settings.path.join("in_progress").is_dir());
    }
}
