use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Logging output. Console output goes to stderr; nothing is written to disk
/// unless a `file` section is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `mibuds_controller=trace`
    pub level: String,
    pub console: bool,
    pub format: LogFormat,
    pub file: Option<FileLogSettings>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Line decorations shared by every output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFormat {
    pub show_target: bool,
    pub show_file_line: bool,
    pub show_thread_ids: bool,
    /// Console only. File output is always plain.
    pub ansi_colors: bool,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            show_target: true,
            show_file_line: false,
            show_thread_ids: false,
            ansi_colors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogSettings {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_prefix() -> String {
    "mibuds_controller".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothSettings {
    /// Skip discovery and always use this address
    #[serde(default)]
    pub device_address: Option<String>,
    #[serde(default = "default_rfcomm_channel")]
    pub rfcomm_channel: u8,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connection_lost_delay_ms")]
    pub connection_lost_delay_ms: u64,
    #[serde(default = "default_handshake_frame_delay_ms")]
    pub handshake_frame_delay_ms: u64,
    #[serde(default = "default_handshake_settle_ms")]
    pub handshake_settle_ms: u64,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            device_address: None,
            rfcomm_channel: default_rfcomm_channel(),
            io_timeout_ms: default_io_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connection_lost_delay_ms: default_connection_lost_delay_ms(),
            handshake_frame_delay_ms: default_handshake_frame_delay_ms(),
            handshake_settle_ms: default_handshake_settle_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

fn default_rfcomm_channel() -> u8 {
    6
}
fn default_io_timeout_ms() -> u64 {
    2000
}
fn default_recv_buffer_size() -> usize {
    1024
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_connection_lost_delay_ms() -> u64 {
    2000
}
fn default_handshake_frame_delay_ms() -> u64 {
    100
}
fn default_handshake_settle_ms() -> u64 {
    1000
}
fn default_discovery_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bluetooth: BluetoothSettings,

    #[serde(default)]
    pub log_settings: LogSettings,
}

/// Read-only settings source. Nothing is ever written back to disk.
pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_settings_path(),
        };

        let settings = match &settings_path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Settings::default(),
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    pub fn default_settings_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("MiBudsController");
        path.push("settings.json");
        Some(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_timing() {
        let bt = BluetoothSettings::default();
        assert_eq!(bt.rfcomm_channel, 6);
        assert_eq!(bt.io_timeout_ms, 2000);
        assert_eq!(bt.reconnect_delay_ms, 5000);
        assert_eq!(bt.connection_lost_delay_ms, 2000);
        assert_eq!(bt.handshake_frame_delay_ms, 100);
        assert_eq!(bt.handshake_settle_ms, 1000);
        assert!(bt.device_address.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "bluetooth": { "device_address": "a1-b2-c3-d4-e5-f6" },
                        "log_settings": { "level": "debug" } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(
            settings.bluetooth.device_address.as_deref(),
            Some("a1-b2-c3-d4-e5-f6")
        );
        assert_eq!(settings.bluetooth.rfcomm_channel, 6);
        assert_eq!(settings.log_settings.level, "debug");
        assert!(settings.log_settings.console);
        assert!(settings.log_settings.file.is_none());
    }

    #[test]
    fn test_file_logging_section() {
        let json = r#"{ "log_settings": { "file": { "rotation": "hourly" },
                                          "format": { "show_file_line": true } } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let file = settings.log_settings.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("logs"));
        assert_eq!(file.prefix, "mibuds_controller");
        assert_eq!(file.rotation, LogRotation::Hourly);
        assert!(settings.log_settings.format.show_file_line);
        assert!(settings.log_settings.format.show_target);

        let bad = r#"{ "log_settings": { "file": { "rotation": "weekly" } } }"#;
        assert!(serde_json::from_str::<Settings>(bad).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("mibuds-settings-does-not-exist.json");
        let service = SettingsService::load(Some(&path)).unwrap();
        assert_eq!(service.get().bluetooth.io_timeout_ms, 2000);
        assert_eq!(service.path(), Some(path.as_path()));
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let path = std::env::temp_dir().join(format!(
            "mibuds-settings-malformed-{}.json",
            std::process::id()
        ));
        fs::write(&path, "{ not json").unwrap();
        let result = SettingsService::load(Some(&path));
        let _ = fs::remove_file(&path);
        assert!(result.is_err());
    }
}
