use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_core::{ChatError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where conversation files are written.
    pub data_dir: PathBuf,
    /// Longest wait for a single stream item before the stream gives up.
    pub item_timeout_ms: u64,
    /// Bounded capacity of the producer/consumer queue.
    pub queue_capacity: usize,
    pub startup_timeout_secs: u64,
    pub system_prompt: String,
    pub autosave: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            item_timeout_ms: 90_000,
            queue_capacity: 64,
            startup_timeout_secs: 10,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            autosave: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".branchchat")
        .join("conversations")
}

impl EngineConfig {
    /// Read a TOML or JSON config file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::persistence(format!("failed to read config {}: {e}", path.display()))
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config: std::result::Result<Self, String> = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        config.map_err(|e| ChatError::validation(format!("invalid config {}: {e}", path.display())))
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os("BRANCHCHAT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = std::env::var("BRANCHCHAT_ITEM_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            self.item_timeout_ms = ms;
        }
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout_ms = (timeout.as_millis() as u64).max(1);
        self
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}
