// Configuration for the tabtodo CLI

use crate::storage::{FileStorage, MemoryStorage, SqliteStorage, Storage, validate_key};
use crate::store::DEFAULT_KEY;
use crate::writer::QueuedWriter;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Boxed backend chosen at runtime
pub type DynStorage = Box<dyn Storage + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One JSON file per key
    #[default]
    File,
    Sqlite,
    /// Nothing survives the process; handy for trying things out
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Backend::File),
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("Invalid backend: {} (expected file, sqlite or memory)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Save inside every mutating call
    #[default]
    Immediate,
    /// Save on a background thread, coalescing bursts
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub key: String,
    pub write_mode: WriteMode,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            data_dir: default_data_dir(),
            key: DEFAULT_KEY.to_string(),
            write_mode: WriteMode::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the per-user config file is
    /// used when present and the defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let config: Config =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
        debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_key(&self.key).context("Invalid 'key' in config")?;
        if self.backend != Backend::Memory && self.data_dir.as_os_str().is_empty() {
            return Err(eyre!("'data_dir' cannot be empty"));
        }
        Ok(())
    }

    /// Build the configured storage backend
    pub fn open_storage(&self) -> Result<DynStorage> {
        let storage: DynStorage = match self.backend {
            Backend::File => Box::new(FileStorage::open(&self.data_dir)?),
            Backend::Sqlite => Box::new(SqliteStorage::open(&self.data_dir)?),
            Backend::Memory => Box::new(MemoryStorage::new()),
        };

        debug!(backend = ?self.backend, data_dir = ?self.data_dir, write_mode = ?self.write_mode, "Opening storage");

        Ok(match self.write_mode {
            WriteMode::Immediate => storage,
            WriteMode::Queued => Box::new(QueuedWriter::new(storage)?),
        })
    }
}

/// `~/.config/tabtodo/config.yaml` (platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tabtodo").join("config.yaml"))
}

/// `~/.local/share/tabtodo` (platform equivalent), falling back to `./.tabtodo`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("tabtodo"))
        .unwrap_or_else(|| PathBuf::from(".tabtodo"))
}
