//! Configuration for study-companion

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::session::MemoryLimits;

/// Default OpenAI-compatible endpoint for the generation service
pub const DEFAULT_GENERATION_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default model used for free chat and answer evaluation
pub const DEFAULT_GENERATION_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

/// Configuration for the study companion
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Directory of `<subject>.jsonl` content packs imported at startup
    pub seed_dir: Option<PathBuf>,

    /// Limits for the session memory cache
    pub memory: MemoryLimits,

    /// Number of recent turns rendered into a chat prompt
    pub context_window: usize,

    /// Generation service settings
    pub generation: GenerationConfig,

    /// HTTP server port
    pub server_port: u16,
}

/// Settings for the OpenAI-compatible generation service
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GENERATION_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_GENERATION_MODEL.to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("study-companion");

        Self {
            data_dir,
            seed_dir: None,
            memory: MemoryLimits::default(),
            context_window: 8,
            generation: GenerationConfig::default(),
            server_port: 8421,
        }
    }
}

/// On-disk settings file. Every field is optional and falls back to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    data_dir: Option<PathBuf>,
    seed_dir: Option<PathBuf>,
    server_port: Option<u16>,
    context_window: Option<usize>,
    max_messages_per_chat: Option<usize>,
    memory_expiration_days: Option<i64>,
    cleanup_interval_hours: Option<u64>,
    max_active_chats: Option<usize>,
    generation_base_url: Option<String>,
    generation_model: Option<String>,
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from an optional JSON settings file, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let data = std::fs::read_to_string(path)?;
                let settings: SettingsFile = serde_json::from_str(&data)?;
                config.merge(settings)?;
            } else {
                tracing::warn!(path = %path.display(), "settings file not found, using defaults");
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    fn merge(&mut self, settings: SettingsFile) -> Result<()> {
        if let Some(dir) = settings.data_dir {
            self.data_dir = dir;
        }
        if settings.seed_dir.is_some() {
            self.seed_dir = settings.seed_dir;
        }
        if let Some(port) = settings.server_port {
            self.server_port = port;
        }
        if let Some(window) = settings.context_window {
            self.context_window = window;
        }
        if let Some(max) = settings.max_messages_per_chat {
            self.memory.max_messages_per_chat = max;
        }
        if let Some(days) = settings.memory_expiration_days {
            self.memory.expiration = expiration_from_days(days)?;
        }
        if let Some(hours) = settings.cleanup_interval_hours {
            self.memory.cleanup_interval = interval_from_hours(hours)?;
        }
        if let Some(max) = settings.max_active_chats {
            self.memory.max_active_chats = max;
        }
        if let Some(url) = settings.generation_base_url {
            self.generation.base_url = url;
        }
        if let Some(model) = settings.generation_model {
            self.generation.model = model;
        }
        self.validate()
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_var("STUDY_COMPANION_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("STUDY_COMPANION_SEED_DIR") {
            self.seed_dir = Some(PathBuf::from(dir));
        }
        if let Some(port) = env_parse::<u16>("STUDY_COMPANION_PORT")? {
            self.server_port = port;
        }
        if let Some(url) = env_var("GENERATION_BASE_URL") {
            self.generation.base_url = url;
        }
        if let Some(key) = env_var("GENERATION_API_KEY") {
            self.generation.api_key = Some(key);
        }
        if let Some(model) = env_var("GENERATION_MODEL") {
            self.generation.model = model;
        }
        if let Some(max) = env_parse::<usize>("MEMORY_MAX_MESSAGES_PER_CHAT")? {
            self.memory.max_messages_per_chat = max;
        }
        if let Some(days) = env_parse::<i64>("MEMORY_EXPIRATION_DAYS")? {
            self.memory.expiration = expiration_from_days(days)?;
        }
        if let Some(hours) = env_parse::<u64>("MEMORY_CLEANUP_INTERVAL_HOURS")? {
            self.memory.cleanup_interval = interval_from_hours(hours)?;
        }
        if let Some(max) = env_parse::<usize>("MEMORY_MAX_ACTIVE_CHATS")? {
            self.memory.max_active_chats = max;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.memory.max_active_chats == 0 {
            return Err(Error::config("max_active_chats must be at least 1"));
        }
        if self.memory.max_messages_per_chat == 0 {
            return Err(Error::config("max_messages_per_chat must be at least 1"));
        }
        if self.memory.expiration <= chrono::Duration::zero() {
            return Err(Error::config("memory expiration must be positive"));
        }
        if self.memory.cleanup_interval.is_zero() {
            return Err(Error::config("cleanup interval must be positive"));
        }
        Ok(())
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("content.db")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn expiration_from_days(days: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_days(days)
        .ok_or_else(|| Error::config(format!("memory expiration of {} days is out of range", days)))
}

fn interval_from_hours(hours: u64) -> Result<std::time::Duration> {
    hours
        .checked_mul(3600)
        .map(std::time::Duration::from_secs)
        .ok_or_else(|| Error::config(format!("cleanup interval of {} hours is out of range", hours)))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_memory_limits() {
        let config = Config::default();
        assert_eq!(config.memory.max_messages_per_chat, 1000);
        assert_eq!(config.memory.max_active_chats, 5);
        assert_eq!(config.memory.expiration, chrono::Duration::days(30));
        assert_eq!(config.context_window, 8);
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"max_active_chats": 12, "memory_expiration_days": 7, "server_port": 9000}"#,
        )
        .unwrap();

        let mut config = Config::default();
        let settings: SettingsFile =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        config.merge(settings).unwrap();

        assert_eq!(config.memory.max_active_chats, 12);
        assert_eq!(config.memory.expiration, chrono::Duration::days(7));
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.memory.max_messages_per_chat, 1000);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = Config::default();
        let settings = SettingsFile {
            max_active_chats: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.merge(settings), Err(Error::Config(_))));
    }

    #[test]
    fn non_positive_expiration_is_rejected() {
        for days in [0, -1] {
            let mut config = Config::default();
            let settings = SettingsFile {
                memory_expiration_days: Some(days),
                ..Default::default()
            };
            assert!(matches!(config.merge(settings), Err(Error::Config(_))));
        }
    }

    #[test]
    fn out_of_range_durations_are_config_errors() {
        let mut config = Config::default();
        let settings = SettingsFile {
            memory_expiration_days: Some(9_000_000_000_000_000),
            ..Default::default()
        };
        assert!(matches!(config.merge(settings), Err(Error::Config(_))));

        let mut config = Config::default();
        let settings = SettingsFile {
            cleanup_interval_hours: Some(u64::MAX),
            ..Default::default()
        };
        assert!(matches!(config.merge(settings), Err(Error::Config(_))));

        assert_eq!(
            interval_from_hours(2).unwrap(),
            std::time::Duration::from_secs(7200)
        );
    }
}
