//! Configuration management for Workbridge.
//!
//! The declarative source is a TOML document holding connection definitions,
//! work item types with their states, and priority levels. `ConfigStore`
//! re-reads and re-validates the source on every call; memoisation lives in
//! the cache layer, not here.

mod connection;
mod metadata;
mod settings;

use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub use connection::{ConnectionConfig, DEFAULT_BASE_URL};
pub use metadata::{default_priorities, PriorityDef, SelectOption, StateDef, WorkItemTypeDef};
pub use settings::Settings;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "WORKBRIDGE_CONFIG";

/// Errors raised while reading the declarative configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No platform configuration directory could be determined.
    #[error("could not determine the configuration directory")]
    NoConfigDir,

    /// The source could not be read.
    #[error("failed to read configuration: {0}")]
    ReadError(String),

    /// The source is not valid TOML.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A record failed structural validation.
    #[error("invalid configuration: {0}")]
    ValidationError(String),

    /// No connection with the requested name.
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    /// No work item type with the requested name.
    #[error("work item type '{0}' not found")]
    TypeNotFound(String),
}

/// Result type for configuration reads.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Where the declarative configuration text comes from.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Read the full document text.
    fn read(&self) -> Result<String>;
}

/// A TOML file on disk, read afresh on every call.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", self.path.display(), e)))
    }
}

/// Static configuration text, mainly for embedding and tests.
#[derive(Debug, Clone)]
pub struct InlineSource {
    text: String,
}

impl InlineSource {
    /// Wrap the given TOML text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ConfigSource for InlineSource {
    fn read(&self) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// The document shape before per-record validation.
///
/// Records are kept as raw TOML values so one malformed entry can be
/// dropped without failing the whole document.
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    settings: Option<toml::Value>,
    #[serde(default)]
    connections: Vec<toml::Value>,
    #[serde(default)]
    work_item_types: Vec<toml::Value>,
    #[serde(default)]
    priorities: Vec<toml::Value>,
}

/// Resolves connection definitions and per-type metadata.
#[derive(Debug)]
pub struct ConfigStore {
    source: Box<dyn ConfigSource>,
}

impl ConfigStore {
    /// Create a store over any source.
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Create a store over a TOML file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(FileSource::new(path))
    }

    /// Create a store over inline TOML text.
    pub fn inline(text: impl Into<String>) -> Self {
        Self::new(InlineSource::new(text))
    }

    /// The default configuration file path.
    ///
    /// `WORKBRIDGE_CONFIG` wins when set; otherwise
    /// `<config dir>/workbridge/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join("workbridge").join("config.toml"))
    }

    fn document(&self) -> Result<RawDocument> {
        let text = self.source.read()?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// All valid connection definitions, in declaration order.
    pub fn get_connections(&self) -> Result<Vec<ConnectionConfig>> {
        let doc = self.document()?;
        let mut connections: Vec<ConnectionConfig> = Vec::new();
        for conn in decode_records::<ConnectionConfig>(doc.connections, "connection") {
            if let Err(e) = conn.validate() {
                warn!("Dropping connection record: {}", e);
                continue;
            }
            if connections.iter().any(|c| c.name == conn.name) {
                warn!("Dropping duplicate connection '{}'", conn.name);
                continue;
            }
            connections.push(conn);
        }
        Ok(connections)
    }

    /// Look up one connection by name.
    pub fn get_connection(&self, name: &str) -> Result<ConnectionConfig> {
        find_connection(self.get_connections()?, name)
            .ok_or_else(|| ConfigError::ConnectionNotFound(name.to_string()))
    }

    /// All valid work item type definitions, in declaration order.
    pub fn get_work_item_types(&self) -> Result<Vec<WorkItemTypeDef>> {
        let doc = self.document()?;
        let mut types: Vec<WorkItemTypeDef> = Vec::new();
        for def in decode_records::<WorkItemTypeDef>(doc.work_item_types, "work item type") {
            if let Err(e) = def.validate() {
                warn!("Dropping work item type record: {}", e);
                continue;
            }
            if types.iter().any(|t| t.name.eq_ignore_ascii_case(&def.name)) {
                warn!("Dropping duplicate work item type '{}'", def.name);
                continue;
            }
            types.push(def);
        }
        Ok(types)
    }

    /// Look up one work item type (case-insensitive).
    pub fn get_work_item_type(&self, name: &str) -> Result<WorkItemTypeDef> {
        find_work_item_type(self.get_work_item_types()?, name)
            .ok_or_else(|| ConfigError::TypeNotFound(name.to_string()))
    }

    /// The ordered states declared for a type.
    ///
    /// Uncached; `WorkItemService` answers the same question from its cached
    /// type list.
    pub fn get_states_for_type(&self, name: &str) -> Result<Vec<StateDef>> {
        Ok(self.get_work_item_type(name)?.states)
    }

    /// Priority levels, most urgent first. Never empty.
    ///
    /// Falls back to the built-in four levels when the source is unreadable,
    /// declares none, or declares a non-contiguous set.
    pub fn get_priorities(&self) -> Vec<PriorityDef> {
        let doc = match self.document() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Using default priorities, configuration unavailable: {}", e);
                return default_priorities();
            }
        };

        let mut levels: Vec<PriorityDef> = decode_records::<PriorityDef>(doc.priorities, "priority")
            .into_iter()
            .filter(|p| match p.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Dropping priority record: {}", e);
                    false
                }
            })
            .collect();

        if levels.is_empty() {
            debug!("No priorities declared, using defaults");
            return default_priorities();
        }

        levels.sort_by_key(|p| p.level);
        if !PriorityDef::is_contiguous(&levels) {
            warn!("Priority levels are not contiguous from 1, using defaults");
            return default_priorities();
        }
        levels
    }

    /// Application settings; defaults when absent or invalid.
    pub fn get_settings(&self) -> Settings {
        let raw = match self.document() {
            Ok(doc) => doc.settings,
            Err(e) => {
                debug!("Using default settings: {}", e);
                None
            }
        };
        match raw {
            Some(value) => value.try_into::<Settings>().unwrap_or_else(|e| {
                warn!("Ignoring invalid [settings] table: {}", e);
                Settings::default()
            }),
            None => Settings::default(),
        }
    }
}

/// Pick a connection out of a loaded list by exact name.
pub fn find_connection(connections: Vec<ConnectionConfig>, name: &str) -> Option<ConnectionConfig> {
    connections.into_iter().find(|c| c.name == name)
}

/// Pick a work item type out of a loaded list, ignoring case and padding.
pub fn find_work_item_type(types: Vec<WorkItemTypeDef>, name: &str) -> Option<WorkItemTypeDef> {
    let name = name.trim();
    types.into_iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Decode each raw record, dropping (and logging) the ones that don't fit.
fn decode_records<T: DeserializeOwned>(raw: Vec<toml::Value>, what: &str) -> Vec<T> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| match value.try_into::<T>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Dropping malformed {} record #{}: {}", what, index, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[settings]
default_connection = "contoso"
request_timeout_secs = 10

[[connections]]
name = "contoso"
organization = "contoso"
project = "Web"
secret_token = "pat"

[[connections]]
name = "broken"
organization = ""
project = "Web"

[[connections]]
name = 42

[[work_item_types]]
name = "Task"
states = [{ name = "To Do" }, { name = "Doing" }, { name = "Done", terminal = true }]

[[work_item_types]]
name = "Ghost"
states = [{ name = "Closed", terminal = true }]

[[priorities]]
level = 2
label = "High"

[[priorities]]
level = 1
label = "Critical"
"#;

    #[test]
    fn test_get_connection_found() {
        let store = ConfigStore::inline(SAMPLE);
        let conn = store.get_connection("contoso").unwrap();
        assert_eq!(conn.organization, "contoso");
        assert_eq!(conn.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_get_connection_not_found() {
        let store = ConfigStore::inline(SAMPLE);
        let err = store.get_connection("fabrikam").unwrap_err();
        assert!(matches!(err, ConfigError::ConnectionNotFound(name) if name == "fabrikam"));
    }

    #[test]
    fn test_invalid_records_are_dropped() {
        let store = ConfigStore::inline(SAMPLE);
        let names: Vec<String> = store
            .get_connections()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["contoso".to_string()]);

        let types = store.get_work_item_types().unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, "Task");
    }

    #[test]
    fn test_states_for_type_is_case_insensitive() {
        let store = ConfigStore::inline(SAMPLE);
        let states = store.get_states_for_type("task").unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states[0].name, "To Do");
        assert!(states[2].terminal);
    }

    #[test]
    fn test_states_for_unknown_type() {
        let store = ConfigStore::inline(SAMPLE);
        assert!(matches!(
            store.get_states_for_type("Epic"),
            Err(ConfigError::TypeNotFound(_))
        ));
    }

    #[test]
    fn test_priorities_sorted_by_level() {
        let store = ConfigStore::inline(SAMPLE);
        let levels: Vec<u32> = store.get_priorities().iter().map(|p| p.level).collect();
        assert_eq!(levels, vec![1, 2]);
    }

    #[test]
    fn test_priorities_default_when_empty() {
        let store = ConfigStore::inline("");
        let priorities = store.get_priorities();
        let levels: Vec<u32> = priorities.iter().map(|p| p.level).collect();
        assert_eq!(levels, vec![1, 2, 3, 4]);
        assert!(priorities.iter().all(|p| !p.label.is_empty()));
    }

    #[test]
    fn test_priorities_default_when_unreadable() {
        let store = ConfigStore::from_path("/nonexistent/workbridge/config.toml");
        assert_eq!(store.get_priorities().len(), 4);
    }

    #[test]
    fn test_priorities_default_when_gap() {
        let store = ConfigStore::inline(
            r#"
[[priorities]]
level = 1
label = "Critical"
[[priorities]]
level = 3
label = "Medium"
"#,
        );
        assert_eq!(store.get_priorities(), default_priorities());
    }

    #[test]
    fn test_unreadable_file_is_read_error() {
        let store = ConfigStore::from_path("/nonexistent/workbridge/config.toml");
        assert!(matches!(
            store.get_connection("contoso"),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let store = ConfigStore::inline("[[connections]\nname = ");
        assert!(matches!(
            store.get_connections(),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_file_source_rereads() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", SAMPLE).unwrap();
        let store = ConfigStore::from_path(file.path());
        assert_eq!(store.get_connections().unwrap().len(), 1);

        std::fs::write(file.path(), "").unwrap();
        assert!(store.get_connections().unwrap().is_empty());
    }

    #[test]
    fn test_settings_parsed() {
        let store = ConfigStore::inline(SAMPLE);
        let settings = store.get_settings();
        assert_eq!(settings.default_connection.as_deref(), Some("contoso"));
        assert_eq!(settings.request_timeout_secs, 10);
    }

    #[test]
    fn test_settings_default_when_missing() {
        let store = ConfigStore::inline("");
        let settings = store.get_settings();
        assert_eq!(settings.default_connection, None);
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    #[serial]
    fn test_default_path_env_override() {
        std::env::set_var(CONFIG_PATH_ENV, "/tmp/custom-workbridge.toml");
        let path = ConfigStore::default_path().unwrap();
        std::env::remove_var(CONFIG_PATH_ENV);
        assert_eq!(path, PathBuf::from("/tmp/custom-workbridge.toml"));
    }

    #[test]
    #[serial]
    fn test_default_path_under_config_dir() {
        std::env::remove_var(CONFIG_PATH_ENV);
        if let Ok(path) = ConfigStore::default_path() {
            assert!(path.ends_with("workbridge/config.toml"));
        }
    }
}
