//! Configuration system for the grid agent.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GRIDAGENT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gridagent/config.toml
//!   3. ~/.config/gridagent/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub agent: AgentSettings,
    pub network: NetworkConfig,
    pub streaming: StreamingSettings,
    pub storage: StorageSettings,
}

/// Identity of the task this agent is serving.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub session_id: String,
    pub task_id: String,
    pub partition_id: String,
    /// Shared secret handed to the worker. Empty = generate at startup.
    pub communication_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the worker-facing listener binds to.
    pub listen_addr: String,
    /// 0 = OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Task headers buffered ahead of the submitter before the inbound
    /// stream stops being read.
    pub task_queue_capacity: usize,
    /// Largest payload accepted for one task. 0 = unlimited.
    pub max_task_payload_bytes: u64,
    /// Size of the buffers resources are split into when streamed out.
    pub resource_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding resource blobs.
    pub resources_path: PathBuf,
    /// Keep resources in memory instead of on disk.
    pub in_memory: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            session_id: "local-session".to_string(),
            task_id: "local-task".to_string(),
            partition_id: String::new(),
            communication_token: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 10180,
        }
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            task_queue_capacity: 10,
            max_task_payload_bytes: 64 * 1024 * 1024, // 64 MB
            resource_chunk_bytes: 32 * 1024,          // 32 KB
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            resources_path: data_dir().join("resources"),
            in_memory: false,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gridagent")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("gridagent")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GridConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            GridConfig::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GRIDAGENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GridConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply GRIDAGENT_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("GRIDAGENT_AGENT__SESSION_ID") {
            self.agent.session_id = v;
        }
        if let Some(v) = lookup("GRIDAGENT_AGENT__TASK_ID") {
            self.agent.task_id = v;
        }
        if let Some(v) = lookup("GRIDAGENT_AGENT__PARTITION_ID") {
            self.agent.partition_id = v;
        }
        if let Some(v) = lookup("GRIDAGENT_AGENT__COMMUNICATION_TOKEN") {
            self.agent.communication_token = v;
        }
        if let Some(v) = lookup("GRIDAGENT_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(v) = lookup("GRIDAGENT_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = lookup("GRIDAGENT_STREAMING__TASK_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse::<usize>() {
                // A zero-capacity bounded queue cannot make progress.
                self.streaming.task_queue_capacity = n.max(1);
            }
        }
        if let Some(v) = lookup("GRIDAGENT_STREAMING__MAX_TASK_PAYLOAD_BYTES") {
            if let Ok(n) = v.parse() {
                self.streaming.max_task_payload_bytes = n;
            }
        }
        if let Some(v) = lookup("GRIDAGENT_STORAGE__RESOURCES_PATH") {
            self.storage.resources_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GRIDAGENT_STORAGE__IN_MEMORY") {
            self.storage.in_memory = v == "true" || v == "1";
        }
    }
}
