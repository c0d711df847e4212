//! Configuration file handling for solo.
//!
//! The whole tool shares one JSON document, by default `~/.solo/config.json`.
//! `ConfigStore` is the only writer. Missing or mis-shaped sections are
//! filled with defaults on load, and every save replaces the file atomically.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::robots::KnownIds;
use crate::servers::ServerType;
use crate::settings::ModeSettings;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "SOLO_CONFIG";

/// Host hardware as detected by `solo setup`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareProfile {
    pub use_gpu: bool,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<u32>,
    pub memory_gb: Option<f64>,
    pub gpu_vendor: Option<String>,
    pub gpu_model: Option<String>,
    pub gpu_memory: Option<f64>,
    pub compute_backend: Option<String>,
    pub os: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub domain: Option<String>,
    pub role: Option<String>,
}

/// Per-backend server settings, stored under `server.<type>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<u16>,
}

/// Preferred serving backend and its per-backend settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerSelection {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    #[serde(flatten)]
    pub backends: BTreeMap<String, BackendSettings>,
}

/// Entries are read one at a time so a bad backend entry is dropped
/// without losing the rest of the section.
impl<'de> Deserialize<'de> for ServerSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Map::<String, Value>::deserialize(deserializer)?;
        let mut selection = ServerSelection::default();
        for (key, value) in entries {
            if key == "type" {
                match value {
                    Value::String(s) => selection.server_type = Some(s),
                    Value::Null => {}
                    other => log::warn!("Ignoring server type {} in config", other),
                }
                continue;
            }
            match serde_json::from_value::<BackendSettings>(value) {
                Ok(settings) => {
                    selection.backends.insert(key, settings);
                }
                Err(e) => log::warn!("Ignoring malformed 'server.{}' entry in config: {}", key, e),
            }
        }
        Ok(selection)
    }
}

impl ServerSelection {
    /// The preferred backend, if one is set and recognised.
    pub fn preferred(&self) -> Option<ServerType> {
        self.server_type.as_deref().and_then(|s| s.parse().ok())
    }

    /// Port to serve on: the configured default, else the backend's standard port.
    pub fn default_port(&self, server: ServerType) -> u16 {
        self.backends
            .get(server.as_str())
            .and_then(|b| b.default_port)
            .unwrap_or_else(|| server.standard_port())
    }
}

/// The most recently launched serving backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveModel {
    pub server: String,
    pub name: String,
    pub full_model_name: String,
    pub port: u16,
    pub last_used: DateTime<Utc>,
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Configuration {
    pub hardware: HardwareProfile,
    pub user: UserProfile,
    pub server: ServerSelection,
    pub active_model: Option<ActiveModel>,
    pub modes: BTreeMap<String, ModeSettings>,
    pub known_ids: KnownIds,
    /// Top-level keys written by other tools, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Configuration {
    /// Build a configuration from a parsed JSON object, defaulting every
    /// section that is missing or has the wrong shape.
    pub fn from_json_object(mut root: Map<String, Value>) -> Self {
        let hardware = take_section(&mut root, "hardware");
        let user = take_section(&mut root, "user");
        let server = take_section(&mut root, "server");
        let active_model = take_section(&mut root, "active_model");
        let modes = take_section(&mut root, "modes");
        let known_ids = take_section(&mut root, "known_ids");
        Configuration {
            hardware,
            user,
            server,
            active_model,
            modes,
            known_ids,
            extra: root,
        }
    }

    /// Serialize as pretty JSON with 4-space indentation and a trailing newline.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

fn take_section<T: DeserializeOwned + Default>(root: &mut Map<String, Value>, key: &str) -> T {
    match root.remove(key) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed '{}' section in config: {}", key, e);
            T::default()
        }),
    }
}

/// Errors that can occur when loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config file '{}' is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to write config file '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Owner of the on-disk configuration document.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    document: Configuration,
}

impl ConfigStore {
    /// Open the store at `path`, loading the current document.
    ///
    /// A corrupt file is reported as a warning and replaced in memory by the
    /// default configuration; it is only overwritten on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut store = ConfigStore {
            path: path.into(),
            document: Configuration::default(),
        };
        match store.load() {
            Ok(config) => store.document = config,
            Err(ConfigError::Corrupt { path, reason }) => {
                log::warn!("{}: {}", path.display(), reason);
                eprintln!(
                    "Warning: config file '{}' is corrupt, using default settings.",
                    path.display()
                );
            }
            Err(e) => return Err(e),
        }
        Ok(store)
    }

    /// Read the document from disk. A missing file yields the default.
    pub fn load(&self) -> Result<Configuration, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Configuration::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Configuration::default());
        }

        let value: Value = serde_json::from_str(&content).map_err(|e| ConfigError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        match value {
            Value::Object(root) => Ok(Configuration::from_json_object(root)),
            _ => Err(ConfigError::Corrupt {
                path: self.path.clone(),
                reason: "top level is not a JSON object".to_string(),
            }),
        }
    }

    /// Atomically replace the on-disk document with `config`.
    ///
    /// On failure the in-memory document is left as it was.
    pub fn save(&mut self, config: Configuration) -> Result<(), ConfigError> {
        let bytes = config.to_pretty_json()?;
        write_atomic(&self.path, &bytes)?;
        log::debug!("Saved configuration to {}", self.path.display());
        self.document = config;
        Ok(())
    }

    /// Apply `f` to a copy of the document and save the result.
    pub fn update<F: FnOnce(&mut Configuration)>(&mut self, f: F) -> Result<(), ConfigError> {
        let mut next = self.document.clone();
        f(&mut next);
        self.save(next)
    }

    pub fn config(&self) -> &Configuration {
        &self.document
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_mode_settings(&self, mode: &str) -> Option<&ModeSettings> {
        self.document.modes.get(mode)
    }

    /// Replace the saved settings of `mode` in full, then save.
    pub fn set_mode_settings(&mut self, mode: &str, settings: ModeSettings) -> Result<(), ConfigError> {
        self.update(|config| {
            config.modes.insert(mode.to_string(), settings);
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".solo")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::open(dir.path().join("config.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.config(), &Configuration::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_partial_document_is_filled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"user": {"domain": "Robotics"}}"#).unwrap();

        let config = ConfigStore::open(&path).unwrap().config().clone();
        assert_eq!(config.user.domain.as_deref(), Some("Robotics"));
        assert!(config.active_model.is_none());
        assert!(config.modes.is_empty());
        assert!(!config.hardware.use_gpu);
    }

    #[test]
    fn test_wrong_shaped_section_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"hardware": 5, "modes": {"teleop": {"fps": 30}}}"#).unwrap();

        let config = ConfigStore::open(&path).unwrap().config().clone();
        assert_eq!(config.hardware, HardwareProfile::default());
        assert_eq!(config.modes["teleop"].get_i64("fps"), Some(30));
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"lerobot": {"leader_port": "/dev/ttyACM0"}}"#).unwrap();

        let mut store = ConfigStore::open(&path).unwrap();
        store.update(|c| c.user.role = Some("Engineer".into())).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["lerobot"]["leader_port"], "/dev/ttyACM0");
        assert_eq!(raw["user"]["role"], "Engineer");
    }

    #[test]
    fn test_corrupt_load_errors_and_open_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(store.config(), &Configuration::default());
        assert!(matches!(store.load(), Err(ConfigError::Corrupt { .. })));
    }

    #[test]
    fn test_non_object_root_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let store = ConfigStore::open(&path).unwrap();
        assert!(matches!(store.load(), Err(ConfigError::Corrupt { .. })));
    }

    #[test]
    fn test_save_creates_parent_and_uses_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut store = ConfigStore::open(&path).unwrap();
        store.save(Configuration::default()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"hardware\": {"));
        assert!(text.contains("\"active_model\": null"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_failed_save_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupant"), "x").unwrap();

        let mut store = ConfigStore {
            path: path.clone(),
            document: Configuration::default(),
        };
        let settings: ModeSettings = [("fps", 30i64)].into_iter().collect();
        let err = store.set_mode_settings("teleop", settings).unwrap_err();
        assert!(matches!(err, ConfigError::Write { .. }));
        assert!(store.get_mode_settings("teleop").is_none());
    }

    #[test]
    fn test_server_default_port() {
        let mut server = ServerSelection::default();
        assert_eq!(server.default_port(ServerType::Ollama), 11434);
        server.backends.insert(
            "ollama".into(),
            BackendSettings {
                default_port: Some(5070),
            },
        );
        assert_eq!(server.default_port(ServerType::Ollama), 5070);
    }

    #[test]
    fn test_server_section_round_trip() {
        let json = r#"{"type": "vllm", "vllm": {"default_port": 5070}}"#;
        let server: ServerSelection = serde_json::from_str(json).unwrap();
        assert_eq!(server.preferred(), Some(ServerType::Vllm));
        assert_eq!(server.default_port(ServerType::Vllm), 5070);
        let back = serde_json::to_value(&server).unwrap();
        assert_eq!(back["type"], "vllm");
        assert_eq!(back["vllm"]["default_port"], 5070);
    }

    #[test]
    fn test_bad_backend_entry_keeps_rest_of_server_section() {
        let json = r#"{"type": "vllm", "x": 5, "ollama": {"default_port": 1234}}"#;
        let server: ServerSelection = serde_json::from_str(json).unwrap();
        assert_eq!(server.preferred(), Some(ServerType::Vllm));
        assert_eq!(server.default_port(ServerType::Ollama), 1234);
        assert!(!server.backends.contains_key("x"));

        let config = Configuration::from_json_object(
            serde_json::from_str(r#"{"server": {"type": 7, "vllm": {"default_port": 8001}}}"#).unwrap(),
        );
        assert_eq!(config.server.server_type, None);
        assert_eq!(config.server.default_port(ServerType::Vllm), 8001);
    }
}
