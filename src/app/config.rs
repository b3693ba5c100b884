use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ToolSettings {
    pub adb_path: String,
    pub fastboot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutSettings {
    pub query_secs: u64,
    pub bootloader_info_secs: u64,
    pub partition_secs: u64,
    pub list_secs: u64,
    pub version_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            query_secs: 10,
            bootloader_info_secs: 3,
            partition_secs: 5,
            list_secs: 10,
            version_secs: 5,
        }
    }
}

impl TimeoutSettings {
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn bootloader_info(&self) -> Duration {
        Duration::from_secs(self.bootloader_info_secs)
    }

    pub fn partitions(&self) -> Duration {
        Duration::from_secs(self.partition_secs)
    }

    pub fn list(&self) -> Duration {
        Duration::from_secs(self.list_secs)
    }

    pub fn version(&self) -> Duration {
        Duration::from_secs(self.version_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorSettings {
    pub metrics_interval_secs: u64,
    pub flash_heartbeat_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 5,
            flash_heartbeat_secs: 15,
        }
    }
}

/// Last-used locations, keyed by the picker that produced them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PathSettings {
    pub image_dir: String,
    pub apk_dir: String,
    pub sideload_dir: String,
    pub export_dir: String,
    pub last_wireless_ip: String,
    pub log_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
    /// `None` picks pretty output in debug builds and JSON in release builds.
    pub json: Option<bool>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolSettings::default(),
            timeouts: TimeoutSettings::default(),
            monitor: MonitorSettings::default(),
            paths: PathSettings::default(),
            logging: LoggingSettings::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("NAZ_FLASH_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    home_dir().join(".naz_flash_config.json")
}

pub fn backup_config_path() -> PathBuf {
    let path = config_path();
    path.with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = TimeoutSettings::default();
    if !(1..=120).contains(&config.timeouts.query_secs) {
        config.timeouts.query_secs = defaults.query_secs;
    }
    if !(1..=60).contains(&config.timeouts.bootloader_info_secs) {
        config.timeouts.bootloader_info_secs = defaults.bootloader_info_secs;
    }
    if !(1..=60).contains(&config.timeouts.partition_secs) {
        config.timeouts.partition_secs = defaults.partition_secs;
    }
    if !(1..=120).contains(&config.timeouts.list_secs) {
        config.timeouts.list_secs = defaults.list_secs;
    }
    if !(1..=60).contains(&config.timeouts.version_secs) {
        config.timeouts.version_secs = defaults.version_secs;
    }
    if config.monitor.metrics_interval_secs < 1 {
        config.monitor.metrics_interval_secs = 5;
    }
    if config.monitor.flash_heartbeat_secs < 1 {
        config.monitor.flash_heartbeat_secs = 15;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = "info".to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.json"), "trace").expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.timeouts.bootloader_info_secs, 3);
        assert_eq!(config.timeouts.partition_secs, 5);
        assert_eq!(config.monitor.metrics_interval_secs, 5);
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"tools": {"adb_path": "/opt/pt/adb", "fastboot_path": ""}, "paths": {"image_dir": "/imgs", "apk_dir": "", "sideload_dir": "", "export_dir": "", "last_wireless_ip": "10.0.0.2:5555", "log_dir": ""}}"#,
        )
        .expect("write");
        let config = load_config_from_path(&path, "trace").expect("load");
        assert_eq!(config.tools.adb_path, "/opt/pt/adb");
        assert_eq!(config.paths.image_dir, "/imgs");
        assert_eq!(config.paths.last_wireless_ip, "10.0.0.2:5555");
        assert_eq!(config.timeouts, TimeoutSettings::default());
    }

    #[test]
    fn partial_sections_keep_their_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"timeouts": {"query_secs": 20}, "paths": {"image_dir": "/imgs"}, "logging": {"json": true}, "monitor": {"flash_heartbeat_secs": 30}}"#,
        )
        .expect("write");
        let config = load_config_from_path(&path, "trace").expect("load");
        assert_eq!(config.timeouts.query_secs, 20);
        assert_eq!(config.timeouts.bootloader_info_secs, 3);
        assert_eq!(config.timeouts.list_secs, 10);
        assert_eq!(config.paths.image_dir, "/imgs");
        assert_eq!(config.paths.log_dir, "");
        assert_eq!(config.logging.log_level, "info");
        assert_eq!(config.logging.json, Some(true));
        assert_eq!(config.monitor.metrics_interval_secs, 5);
        assert_eq!(config.monitor.flash_heartbeat_secs, 30);
        assert_eq!(config.tools, ToolSettings::default());
    }

    #[test]
    fn save_writes_backup_of_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let mut config = AppConfig::default();
        save_config_to_path(&config, &path, &backup, "trace").expect("first save");
        assert!(!backup.exists());

        config.paths.image_dir = "/new".to_string();
        save_config_to_path(&config, &path, &backup, "trace").expect("second save");
        assert!(backup.exists());

        let reloaded = load_config_from_path(&path, "trace").expect("reload");
        assert_eq!(reloaded.paths.image_dir, "/new");
        let previous = load_config_from_path(&backup, "trace").expect("backup");
        assert_eq!(previous.paths.image_dir, "");
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.timeouts.bootloader_info_secs = 0;
        config.timeouts.query_secs = 999;
        config.monitor.metrics_interval_secs = 0;
        config.logging.log_level = "  ".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.timeouts.bootloader_info_secs, 3);
        assert_eq!(validated.timeouts.query_secs, 10);
        assert_eq!(validated.monitor.metrics_interval_secs, 5);
        assert_eq!(validated.logging.log_level, "info");
    }

    #[test]
    fn malformed_file_is_a_system_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write");
        let err = load_config_from_path(&path, "trace-cfg").unwrap_err();
        assert_eq!(err.code, "ERR_SYSTEM");
        assert_eq!(err.trace_id, "trace-cfg");
    }
}
