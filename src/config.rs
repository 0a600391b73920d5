//! Config loading and persistence.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Limits;
use crate::session::BackoffPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reconnect backoff: first retry delay.
    pub backoff_base_ms: u64,
    /// Reconnect backoff: delay cap.
    pub backoff_max_ms: u64,
    /// Retry budget before the session goes terminally disconnected.
    pub max_reconnect_attempts: u32,
    /// How long delete tombstones are retained before reconciliation may
    /// purge them.
    pub tombstone_grace_ms: u64,
    pub limits: Limits,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_max_ms: 16_000,
            max_reconnect_attempts: 8,
            tombstone_grace_ms: 600_000,
            limits: Limits::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub format: LogFormat,
    pub verbosity: u8,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            format: LogFormat::Compact,
            verbosity: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Load a config file.
pub fn load(path: &Path) -> crate::Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| config_error(format!("failed to parse {}: {e}", path.display())))
}

/// Load a config file, falling back to defaults (and writing them out)
/// when it is missing or unreadable.
pub fn load_or_init(path: &Path) -> Config {
    if path.exists() {
        match load(path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> crate::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| config_error(format!("failed to create {}: {e}", dir.display())))?;
    }
    let contents = toml::to_string_pretty(cfg)
        .map_err(|e| config_error(format!("failed to render config: {e}")))?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> crate::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| config_error("config path missing parent directory".to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        config_error(format!(
            "failed to create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    fs::write(temp.path(), data)
        .map_err(|e| config_error(format!("failed to write config temp file: {e}")))?;
    temp.persist(path).map_err(|e| {
        config_error(format!(
            "failed to persist config to {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

fn config_error(reason: String) -> crate::Error {
    crate::Error::Config { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            backoff_base_ms: 111,
            backoff_max_ms: 222,
            max_reconnect_attempts: 3,
            tombstone_grace_ms: 4_000,
            ..Config::default()
        };
        write_config(&path, &cfg).expect("write config");

        let loaded = load(&path).expect("load config");
        assert_eq!(loaded.backoff_base_ms, 111);
        assert_eq!(loaded.backoff_max_ms, 222);
        assert_eq!(loaded.max_reconnect_attempts, 3);
        assert_eq!(loaded.tombstone_grace_ms, 4_000);
    }

    #[test]
    fn load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = load_or_init(&path);
        assert!(path.exists());
        assert_eq!(cfg.backoff_base_ms, 1_000);
        assert_eq!(cfg.backoff_max_ms, 16_000);
    }

    #[test]
    fn backoff_policy_from_config() {
        let cfg = Config::default();
        let policy = cfg.backoff();
        assert_eq!(policy.base, Duration::from_millis(1_000));
        assert_eq!(policy.max, Duration::from_millis(16_000));
    }
}
