//! Configuration for the checker and the recorder.
//!
//! Loads configuration from environment variables with sensible defaults,
//! and the list of targets from a JSON file.

use crate::bus::{KafkaSettings, TlsFiles, DEFAULT_GROUP};
use crate::domain::{Target, TargetError};

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to decode configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("can't create website #{index}: {source}")]
    Target {
        index: usize,
        #[source]
        source: TargetError,
    },
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Checker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Path to the target list (default: "targets.json")
    pub targets_path: PathBuf,
    pub kafka: KafkaSettings,
    /// Time between two probes of a target, also the probe deadline (default: 2s)
    pub tick: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            targets_path: PathBuf::from("targets.json"),
            kafka: KafkaSettings::new(vec!["localhost:9092".to_string()]),
            tick: Duration::from_secs(2),
        }
    }
}

impl CheckerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_TARGETS_PATH`: target list file (default: "targets.json")
    /// - `SITEWATCH_KAFKA_BROKERS`: comma-separated brokers (default: "localhost:9092")
    /// - `SITEWATCH_KAFKA_CA_FILE`, `SITEWATCH_KAFKA_CERT_FILE`, `SITEWATCH_KAFKA_KEY_FILE`
    /// - `SITEWATCH_TICK`: e.g. "2s", "500ms", "1m" or seconds (default: "2s")
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(path) = env::var("SITEWATCH_TARGETS_PATH") {
            cfg.targets_path = PathBuf::from(path);
        }

        cfg.kafka = kafka_from_env(cfg.kafka);

        if let Ok(raw) = env::var("SITEWATCH_TICK") {
            cfg.tick = parse_duration(&raw)
                .filter(|d| !d.is_zero())
                .ok_or(ConfigError::Invalid {
                    var: "SITEWATCH_TICK",
                    value: raw,
                })?;
        }

        Ok(cfg)
    }
}

/// Recorder configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub kafka: KafkaSettings,
    /// Consumer group (default: "website-monitor-1")
    pub group: String,
    /// Path to the SQLite database file (default: "sitewatch.db")
    pub db_path: String,
    /// Redeliver messages whose storage failed instead of skipping them
    pub strict_commit: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            kafka: KafkaSettings::new(vec!["localhost:9092".to_string()]),
            group: DEFAULT_GROUP.to_string(),
            db_path: "sitewatch.db".to_string(),
            strict_commit: false,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_KAFKA_BROKERS` and the TLS variables, as for the checker
    /// - `SITEWATCH_KAFKA_GROUP`: consumer group (default: "website-monitor-1")
    /// - `SITEWATCH_DB_PATH`: database file path (default: "sitewatch.db")
    /// - `SITEWATCH_STRICT_COMMIT`: "true" or "1" to redeliver on storage failure
    pub fn load() -> Self {
        let mut cfg = Self::default();

        cfg.kafka = kafka_from_env(cfg.kafka);

        if let Ok(group) = env::var("SITEWATCH_KAFKA_GROUP") {
            cfg.group = group;
        }

        if let Ok(db_path) = env::var("SITEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(strict) = env::var("SITEWATCH_STRICT_COMMIT") {
            cfg.strict_commit = matches!(strict.trim(), "1" | "true" | "TRUE" | "yes");
        }

        cfg
    }
}

fn kafka_from_env(mut kafka: KafkaSettings) -> KafkaSettings {
    if let Ok(brokers) = env::var("SITEWATCH_KAFKA_BROKERS") {
        let brokers = parse_brokers(&brokers);
        if !brokers.is_empty() {
            kafka.brokers = brokers;
        }
    }

    let ca = env::var("SITEWATCH_KAFKA_CA_FILE").ok();
    let cert = env::var("SITEWATCH_KAFKA_CERT_FILE").ok();
    let key = env::var("SITEWATCH_KAFKA_KEY_FILE").ok();
    // TLS only when the full set is provided.
    if let (Some(ca_file), Some(cert_file), Some(key_file)) = (ca, cert, key) {
        kafka.tls = Some(TlsFiles {
            ca_file: ca_file.into(),
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        });
    }

    kafka
}

fn parse_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse "1500ms", "2s", "1m" or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (value, unit) = match raw.find(|c: char| c.is_ascii_alphabetic()) {
        Some(pos) => raw.split_at(pos),
        None => (raw, "s"),
    };
    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}

/// Layout of the target list file.
#[derive(Debug, Deserialize)]
struct TargetFile {
    websites: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    url: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    match_regexp: Option<String>,
}

/// Load and validate every target of a JSON target list.
pub fn load_targets<P: AsRef<Path>>(path: P) -> Result<Vec<Target>, ConfigError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_targets(&data)
}

fn parse_targets(data: &[u8]) -> Result<Vec<Target>, ConfigError> {
    let file: TargetFile = serde_json::from_slice(data)?;

    file.websites
        .iter()
        .enumerate()
        .map(|(index, w)| {
            Target::new(&w.url, &w.method, w.match_regexp.as_deref().unwrap_or_default())
                .map_err(|source| ConfigError::Target { index, source })
        })
        .collect()
}
