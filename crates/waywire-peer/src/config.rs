//! TOML configuration for the peer binary.
//!
//! Read from `$WAYWIRE_CONFIG` when set, otherwise from
//! `$XDG_CONFIG_HOME/waywire/config.toml` (falling back to
//! `~/.config/waywire/config.toml`).  A missing file yields the defaults.
//!
//! ```toml
//! [peer]
//! mode = "server"
//! socket_path = "/run/user/1000/waywire-0"
//! log_level = "info"
//!
//! [connection]
//! strictness = "lenient"
//!
//! [[globals]]
//! interface = "wl_requests"
//! version = 2
//! ```
//!
//! Every field has a serde default, so partial files and files written by
//! older versions still load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use waywire_core::protocols::scanner_test::wl_requests;
use waywire_core::ConnectionConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "WAYWIRE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `$XDG_CONFIG_HOME` nor `$HOME` is set.
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    #[serde(default)]
    pub peer: PeerSection,
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Globals a server advertises to every client.
    #[serde(default = "default_globals")]
    pub globals: Vec<GlobalEntry>,
}

/// Which end of the connection this process plays.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSection {
    #[serde(default)]
    pub mode: PeerMode,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalEntry {
    pub interface: String,
    pub version: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("waywire-0")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_globals() -> Vec<GlobalEntry> {
    vec![GlobalEntry {
        interface: wl_requests::NAME.to_string(),
        version: wl_requests::VERSION,
    }]
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            mode: PeerMode::default(),
            socket_path: default_socket_path(),
            log_level: default_log_level(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the config file path.
///
/// # Errors
///
/// [`ConfigError::NoConfigDir`] if no base directory can be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(explicit));
    }
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join("waywire").join("config.toml"))
}

/// Loads the config from its default location.
///
/// # Errors
///
/// As [`config_file_path`] and [`load_config_from`].
pub fn load_config() -> Result<PeerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config at `path`, or the defaults if it does not exist.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] for malformed TOML.
pub fn load_config_from(path: &Path) -> Result<PeerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerConfig::default_with_globals()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_config_to(path: &Path, config: &PeerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl PeerConfig {
    /// Defaults, including the demo `wl_requests` global.  `Default` leaves
    /// the global list empty.
    pub fn default_with_globals() -> Self {
        Self {
            globals: default_globals(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use waywire_core::Strictness;

    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        // Arrange / Act
        let cfg: PeerConfig = toml::from_str("").expect("deserialize empty");

        // Assert
        assert_eq!(cfg.peer.mode, PeerMode::Server);
        assert_eq!(cfg.peer.log_level, "info");
        assert!(cfg.peer.socket_path.ends_with("waywire-0"));
        assert_eq!(cfg.connection.strictness, Strictness::Strict);
        assert_eq!(cfg.globals, default_globals());
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        // Arrange
        let toml_str = r#"
[peer]
mode = "client"
socket_path = "/tmp/test-socket"

[connection]
strictness = "lenient"

[[globals]]
interface = "wl_core"
version = 1
"#;

        // Act
        let cfg: PeerConfig = toml::from_str(toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg.peer.mode, PeerMode::Client);
        assert_eq!(cfg.peer.socket_path, PathBuf::from("/tmp/test-socket"));
        assert_eq!(cfg.peer.log_level, "info");
        assert_eq!(cfg.connection.strictness, Strictness::Lenient);
        assert_eq!(cfg.connection.read_chunk_size, 4096);
        assert_eq!(cfg.globals.len(), 1);
        assert_eq!(cfg.globals[0].interface, "wl_core");
    }

    #[test]
    fn test_unknown_mode_is_a_parse_error() {
        let result: Result<PeerConfig, toml::de::Error> = toml::from_str("[peer]\nmode = \"relay\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = PathBuf::from("/nonexistent/waywire/config.toml");
        let cfg = load_config_from(&path).expect("defaults");
        assert_eq!(cfg, PeerConfig::default_with_globals());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("waywire_cfg_{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");
        let mut cfg = PeerConfig::default_with_globals();
        cfg.peer.mode = PeerMode::Client;
        cfg.peer.log_level = "debug".to_string();

        // Act
        save_config_to(&path, &cfg).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }
}
