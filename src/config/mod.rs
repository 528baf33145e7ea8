//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`RTDS_CONFIG_PATH`, `[scan]`/`[store]`/`[kafka]` sections)
//! 3. Built-in defaults (lowest priority)
//!
//! The `[[connectors]]`/`[[tags]]`/`[[scripts]]` array-of-tables sections of
//! the same file stand in for the out-of-scope `.ods` config spreadsheet
//! (spec §6) — see `TomlConfigSource` below.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

mod source;

#[cfg(test)]
mod tests;

pub use source::{ConfigSource, ConnectorDef, RtdsConfig, ScriptDef, TagDef, TomlConfigSource};

/// Runtime process configuration (the ambient stack: bind address, scan
/// cadence, store/bus settings, logging) — distinct from `RtdsConfig`, which
/// is the domain data (connectors/tags/scripts) loaded through
/// `ConfigSource`.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API bind address. Env: `RTDS_BIND`, default `127.0.0.1:8090`.
    pub bind_addr: SocketAddr,
    /// Path to the TOML config file backing `ConfigSource`. Env:
    /// `RTDS_CONFIG_PATH`.
    pub config_path: PathBuf,
    /// Scan loop cadence. Env: `RTDS_SCAN_CYCLE_MS`, default 100ms.
    pub scan_cycle: Duration,
    pub store: StoreConfig,
    pub kafka: KafkaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_url: String,
    pub batch_size: usize,
    pub history_hours: i64,
    pub sql_engine_echo: bool,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub auto_commit_interval_ms: u32,
    pub session_timeout_ms: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8090".parse().unwrap(),
            config_path: PathBuf::from("./rtds.toml"),
            scan_cycle: Duration::from_millis(100),
            store: StoreConfig {
                db_url: "./data/rtds.db".to_string(),
                batch_size: 100,
                history_hours: 24,
                sql_engine_echo: false,
            },
            kafka: KafkaConfig {
                bootstrap_servers: "localhost:9092".to_string(),
                topic: "rtds-history".to_string(),
                group_id: "rtds-consumer".to_string(),
                auto_commit_interval_ms: 5_000,
                session_timeout_ms: 10_000,
                batch_size: 100,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

/// Subset of `Config` that may be persisted in the TOML file's top-level
/// `[scan]`/`[store]`/`[kafka]` sections (as opposed to the `[[connectors]]`
/// etc. array-of-tables, which are `RtdsConfig`'s concern).
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub scan: Option<FileScan>,
    pub store: Option<FileStore>,
    pub kafka: Option<FileKafka>,
    pub logging: Option<FileLogging>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileScan {
    pub cycle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileStore {
    pub db_url: Option<String>,
    pub batch_size: Option<usize>,
    pub history_hours: Option<i64>,
    pub sql_engine_echo: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileKafka {
    pub bootstrap_servers: Option<String>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub auto_commit_interval_ms: Option<u32>,
    pub session_timeout_ms: Option<u32>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileLogging {
    pub level: Option<String>,
}

impl Config {
    /// Load the raw file config from `RTDS_CONFIG_PATH` (or the default
    /// path) if it exists. Mirrors the teacher's "exists and parses, or
    /// defaults" precedence, but config parse failures here are just a
    /// warning — this section is optional ambient tuning, not the tag
    /// definitions that a broken parse should block startup over.
    fn load_file_config(path: &std::path::Path) -> FileConfig {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to parse config file sections: {e}");
                    FileConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {e}");
                FileConfig::default()
            }
        }
    }

    /// Default config path when neither `RTDS_CONFIG_PATH` nor `--config`
    /// is given: `~/.config/rtds/rtds.toml` if a home directory is
    /// resolvable, else `./rtds.toml` in the working directory.
    fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".config").join("rtds").join("rtds.toml"))
            .unwrap_or_else(|| PathBuf::from("./rtds.toml"))
    }

    /// Load configuration: CLI flag > env > file > default.
    pub fn from_env() -> Self {
        Self::load(crate::cli::Cli::default())
    }

    /// Load configuration with CLI overrides layered on top of env > file >
    /// default, per `--config`/`--bind` (spec's config file stands in for
    /// the `.ods` loader; see `TomlConfigSource`).
    pub fn load(cli: crate::cli::Cli) -> Self {
        let config_path = cli
            .config
            .or_else(|| std::env::var("RTDS_CONFIG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);

        let file = Self::load_file_config(&config_path);

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("RTDS_BIND").ok())
            .or(file.bind_addr)
            .unwrap_or_else(|| "127.0.0.1:8090".to_string())
            .parse()
            .expect("invalid RTDS_BIND address");

        let scan_cycle_ms = std::env::var("RTDS_SCAN_CYCLE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.scan.and_then(|s| s.cycle_ms))
            .unwrap_or(100);

        let file_store = file.store.unwrap_or_default();
        let store = StoreConfig {
            db_url: std::env::var("STORE_DB_URL")
                .ok()
                .or(file_store.db_url)
                .unwrap_or_else(|| "./data/rtds.db".to_string()),
            batch_size: std::env::var("STORE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file_store.batch_size)
                .unwrap_or(100),
            history_hours: std::env::var("STORE_HISTORY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file_store.history_hours)
                .unwrap_or(24),
            sql_engine_echo: std::env::var("STORE_SQL_ENGINE_ECHO")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(file_store.sql_engine_echo)
                .unwrap_or(false),
        };

        let file_kafka = file.kafka.unwrap_or_default();
        let kafka = KafkaConfig {
            bootstrap_servers: std::env::var("KAFKA_BOOTSTRAP_SERVERS")
                .ok()
                .or(file_kafka.bootstrap_servers)
                .unwrap_or_else(|| "localhost:9092".to_string()),
            topic: std::env::var("KAFKA_TOPIC")
                .ok()
                .or(file_kafka.topic)
                .unwrap_or_else(|| "rtds-history".to_string()),
            group_id: std::env::var("KAFKA_GROUP_ID")
                .ok()
                .or(file_kafka.group_id)
                .unwrap_or_else(|| "rtds-consumer".to_string()),
            auto_commit_interval_ms: std::env::var("KAFKA_AUTO_COMMIT_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file_kafka.auto_commit_interval_ms)
                .unwrap_or(5_000),
            session_timeout_ms: std::env::var("KAFKA_SESSION_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file_kafka.session_timeout_ms)
                .unwrap_or(10_000),
            batch_size: std::env::var("KAFKA_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file_kafka.batch_size)
                .unwrap_or(100),
        };

        let file_logging = file.logging.unwrap_or_default();
        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL")
                .ok()
                .or(file_logging.level)
                .unwrap_or_else(|| "info".to_string()),
        };

        Self {
            bind_addr,
            config_path,
            scan_cycle: Duration::from_millis(scan_cycle_ms),
            store,
            kafka,
            logging,
        }
    }
}
