//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.widget-driver/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::{ClientTurnServer, DeviceInfo};
use crate::widget::{Widget, WidgetKind};

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub widget: WidgetConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub log_file: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WidgetConfig {
    pub id: Option<String>,
    pub creator_user_id: Option<String>,
    pub widget_type: Option<String>,
    pub url: Option<String>,
    pub kind: Option<WidgetKind>,
    pub room_id: Option<String>,
    pub allowed_capabilities: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TurnConfig {
    pub polling: Option<bool>,
    pub rotate_interval_ms: Option<u64>,
    #[serde(default)]
    pub servers: Vec<ClientTurnServer>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub user_id: String,
    pub device_id: String,
    pub display_name: Option<String>,
}

impl DeviceEntry {
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self.device_id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_LOG_FILE: &str = "widget-driver.log";
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;
pub const DEFAULT_ROTATE_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_WIDGET_ID: &str = "widget-driver";
pub const DEFAULT_WIDGET_URL: &str = "https://example.org";

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub log_file: String,
    pub log_level: LevelFilter,
    pub widget: Widget,
    pub kind: WidgetKind,
    pub room_id: Option<String>,
    pub allowed_capabilities: Vec<String>,
    pub turn_polling: bool,
    pub rotate_interval_ms: u64,
    pub turn_servers: Vec<ClientTurnServer>,
    pub devices: Vec<DeviceEntry>,
}

/// Values passed on the command line. `None` = not specified.
#[derive(Debug, Default)]
pub struct CliOverrides<'a> {
    pub room_id: Option<&'a str>,
    pub kind: Option<WidgetKind>,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.widget-driver/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".widget-driver").join("config.toml"))
}

/// Load config from `path`, or from `~/.widget-driver/config.toml` when `None`.
///
/// A missing default file is generated (commented out) and treated as empty.
/// An explicitly given path must exist.
pub fn load_config(path: Option<&Path>) -> Result<DriverConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_path() {
            Some(p) => {
                if !p.exists() {
                    info!("No config file found, generating default at {}", p.display());
                    generate_default_config(&p);
                    return Ok(DriverConfig::default());
                }
                p
            }
            None => {
                warn!("Could not determine home directory, using default config");
                return Ok(DriverConfig::default());
            }
        },
    };

    let contents = fs::read_to_string(&path).map_err(ConfigError::Io)?;
    let config: DriverConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r#"# Widget Driver Configuration
# All settings are optional — defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [general]
# log_file = "widget-driver.log"
# log_level = "debug"                # "error", "warn", "info", "debug", "trace", "off"

# [widget]
# id = "widget-driver"
# creator_user_id = "@alice:example.org"
# widget_type = "m.custom"
# url = "https://example.org"
# kind = "room"                      # "room", "account" or "modal"
# room_id = "!room:example.org"      # Or set WIDGET_DRIVER_ROOM env var
# allowed_capabilities = ["org.matrix.msc3819.send.to_device"]

# [turn]
# polling = true                     # Whether the homeserver provides TURN servers
# rotate_interval_ms = 1000          # How often the demo client publishes a new list

# [[turn.servers]]
# urls = ["turn:turn.example.com:3478?transport=udp"]
# username = "1443779631:@user:example.com"
# credential = "JlKfBy1QwLrO20385QyAtEyIv0="

# [[devices]]
# user_id = "@bob:example.org"
# device_id = "bobDesktop"
# display_name = "Bob's desktop"
"#;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Failed to create config directory: {}", e);
            return;
        }
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
pub fn resolve(config: &DriverConfig, cli: &CliOverrides<'_>) -> ResolvedConfig {
    // Room: CLI → env → config
    let room_id = cli
        .room_id
        .map(|s| s.to_string())
        .or_else(|| std::env::var("WIDGET_DRIVER_ROOM").ok())
        .or_else(|| config.widget.room_id.clone());

    // Log level: env → config → default
    let log_level = std::env::var("WIDGET_DRIVER_LOG_LEVEL")
        .ok()
        .or_else(|| config.general.log_level.clone())
        .and_then(|level| match level.parse::<LevelFilter>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Unknown log level {:?}, using default", level);
                None
            }
        })
        .unwrap_or(DEFAULT_LOG_LEVEL);

    let widget = Widget {
        id: config
            .widget
            .id
            .clone()
            .unwrap_or_else(|| DEFAULT_WIDGET_ID.to_string()),
        creator_user_id: config.widget.creator_user_id.clone().unwrap_or_default(),
        widget_type: config
            .widget
            .widget_type
            .clone()
            .unwrap_or_else(|| "m.custom".to_string()),
        url: config
            .widget
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_WIDGET_URL.to_string()),
    };

    ResolvedConfig {
        log_file: config
            .general
            .log_file
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
        log_level,
        widget,
        kind: cli.kind.or(config.widget.kind).unwrap_or_default(),
        room_id,
        allowed_capabilities: config.widget.allowed_capabilities.clone().unwrap_or_default(),
        turn_polling: config.turn.polling.unwrap_or(true),
        rotate_interval_ms: config
            .turn
            .rotate_interval_ms
            .unwrap_or(DEFAULT_ROTATE_INTERVAL_MS),
        turn_servers: config.turn.servers.clone(),
        devices: config.devices.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = DriverConfig::default();
        assert!(config.devices.is_empty());
        assert!(config.turn.servers.is_empty());
        assert!(config.widget.room_id.is_none());
    }

    #[test]
    fn test_resolve_uses_defaults_when_empty() {
        let config = DriverConfig::default();
        let resolved = resolve(&config, &CliOverrides::default());
        assert_eq!(resolved.log_file, DEFAULT_LOG_FILE);
        assert_eq!(resolved.widget.id, DEFAULT_WIDGET_ID);
        assert_eq!(resolved.kind, WidgetKind::Room);
        assert!(resolved.turn_polling);
        assert_eq!(resolved.rotate_interval_ms, DEFAULT_ROTATE_INTERVAL_MS);
        assert!(resolved.allowed_capabilities.is_empty());
    }

    #[test]
    fn test_resolve_config_values_override_defaults() {
        let config = DriverConfig {
            general: GeneralConfig {
                log_file: Some("custom.log".to_string()),
                log_level: Some("warn".to_string()),
            },
            widget: WidgetConfig {
                id: Some("jitsi".to_string()),
                kind: Some(WidgetKind::Modal),
                allowed_capabilities: Some(vec!["m.always_on_screen".to_string()]),
                ..Default::default()
            },
            turn: TurnConfig {
                polling: Some(false),
                rotate_interval_ms: Some(250),
                servers: Vec::new(),
            },
            ..Default::default()
        };
        let resolved = resolve(&config, &CliOverrides::default());
        assert_eq!(resolved.log_file, "custom.log");
        assert_eq!(resolved.widget.id, "jitsi");
        assert_eq!(resolved.kind, WidgetKind::Modal);
        assert!(!resolved.turn_polling);
        assert_eq!(resolved.rotate_interval_ms, 250);
        assert_eq!(resolved.allowed_capabilities, vec!["m.always_on_screen"]);
    }

    #[test]
    fn test_resolve_cli_wins() {
        let config = DriverConfig {
            widget: WidgetConfig {
                room_id: Some("!config:example.org".to_string()),
                kind: Some(WidgetKind::Account),
                ..Default::default()
            },
            ..Default::default()
        };
        let cli = CliOverrides {
            room_id: Some("!cli:example.org"),
            kind: Some(WidgetKind::Modal),
        };
        let resolved = resolve(&config, &cli);
        assert_eq!(resolved.room_id.as_deref(), Some("!cli:example.org"));
        assert_eq!(resolved.kind, WidgetKind::Modal);
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
[general]
log_level = "info"

[widget]
id = "test"
creator_user_id = "@alice:example.org"
kind = "account"
room_id = "!room:example.org"

[turn]
polling = true

[[turn.servers]]
urls = ["turn:turn.example.com:3478?transport=udp", "turns:10.20.30.40:443?transport=tcp"]
username = "1443779631:@user:example.com"
credential = "JlKfBy1QwLrO20385QyAtEyIv0="

[[devices]]
user_id = "@bob:example.org"
device_id = "bobDesktop"
"#;
        let config: DriverConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("info"));
        assert_eq!(config.widget.kind, Some(WidgetKind::Account));
        assert_eq!(config.turn.servers.len(), 1);
        assert_eq!(config.turn.servers[0].urls.len(), 2);
        assert_eq!(config.turn.servers[0].urls[1], "turns:10.20.30.40:443?transport=tcp");
        assert_eq!(config.devices[0].device_info().device_id, "bobDesktop");
        assert_eq!(config.devices[0].display_name, None);
    }

    #[test]
    fn test_sparse_toml_parses() {
        // Only override one thing — everything else stays default
        let toml_str = r#"
[turn]
rotate_interval_ms = 50
"#;
        let config: DriverConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.turn.rotate_interval_ms, Some(50));
        assert!(config.turn.polling.is_none());
        assert!(config.turn.servers.is_empty());
        assert!(config.widget.id.is_none());
    }

    #[test]
    fn test_load_explicit_missing_path_is_io_error() {
        let path = std::env::temp_dir().join("widget-driver-does-not-exist.toml");
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Io(_))));
    }
}
