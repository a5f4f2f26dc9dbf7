// Configuration management module
// TOML settings for the model, store, caches and search defaults

pub mod settings;

pub use settings::{
    Backend, CacheSettings, ChunkingSettings, Config, ConfigError, LoadingMode, ModelSettings,
    OllamaConfig, SearchSettings, StoreSettings,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
