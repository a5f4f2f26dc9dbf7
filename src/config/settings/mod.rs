
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::chunking::{ChunkingConfig, ProcessingStrategy, TokenUnit};
use crate::database::{StoreLocation, validate_table_name};
use crate::embeddings::{
    DEFAULT_EMBEDDING_DIMENSION, HashingLoader, ModelConfiguration, ModelLoader, OllamaLoader,
};
use crate::engine::{EngineConfig, LoadingStrategy};
use crate::ingest::IngestOptions;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Ollama,
    Hashing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMode {
    Eager,
    #[default]
    Lazy,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub hub_repo_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    pub use_background_session: bool,
    pub backend: Backend,
    pub loading_strategy: LoadingMode,
    pub hybrid_delay_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            hub_repo_id: "nomic-embed-text:latest".to_string(),
            local_path: None,
            use_background_session: false,
            backend: Backend::default(),
            loading_strategy: LoadingMode::default(),
            hybrid_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub overlap: usize,
    pub token_unit: TokenUnit,
    pub strategy: ProcessingStrategy,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        let chunking = ChunkingConfig::default();
        Self {
            max_tokens: chunking.max_tokens,
            overlap: chunking.overlap,
            token_unit: TokenUnit::default(),
            strategy: ProcessingStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    /// `"memory"`, `"temporary"`, or a directory (relative to the config dir)
    pub location: String,
    pub dimension: usize,
    pub default_table: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            location: "data".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            default_table: "chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Zero or negative disables the embedding result cache
    pub max_entries: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub num_results: usize,
    /// Maximum distance a result may have
    pub threshold: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            num_results: 10,
            threshold: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid max tokens: {0} (must be between 1 and 8192)")]
    InvalidMaxTokens(usize),
    #[error("Invalid table name: {0:?} (must match ^[A-Za-z_][A-Za-z0-9_]*$)")]
    InvalidTableName(String),
    #[error("Invalid store location: {0:?} (cannot be empty)")]
    InvalidStoreLocation(String),
    #[error("Invalid number of results: {0} (must be between 1 and 1000)")]
    InvalidNumResults(usize),
    #[error("Invalid threshold: {0} (must be a finite, non-negative distance)")]
    InvalidThreshold(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::DirectoryError => Self::DirectoryError,
            Self::InvalidUrl(url) => Self::InvalidUrl(url.clone()),
            Self::InvalidPort(port) => Self::InvalidPort(*port),
            Self::InvalidBatchSize(size) => Self::InvalidBatchSize(*size),
            Self::InvalidModel(model) => Self::InvalidModel(model.clone()),
            Self::InvalidProtocol(protocol) => Self::InvalidProtocol(protocol.clone()),
            Self::InvalidEmbeddingDimension(dimension) => {
                Self::InvalidEmbeddingDimension(*dimension)
            }
            Self::InvalidMaxTokens(max) => Self::InvalidMaxTokens(*max),
            Self::InvalidTableName(name) => Self::InvalidTableName(name.clone()),
            Self::InvalidStoreLocation(location) => Self::InvalidStoreLocation(location.clone()),
            Self::InvalidNumResults(n) => Self::InvalidNumResults(*n),
            Self::InvalidThreshold(threshold) => Self::InvalidThreshold(*threshold),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::TomlParse(e) => Self::TomlParse(e.clone()),
            Self::TomlSerialize(e) => Self::TomlSerialize(e.clone()),
        }
    }
}

impl Config {
    /// Default configuration directory, `<OS config dir>/local-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("local-rag"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.hub_repo_id.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.hub_repo_id.clone()));
        }
        if self.model.backend == Backend::Ollama {
            self.ollama.validate()?;
        }
        self.validate_chunking()?;
        self.validate_store()?;

        if !(1..=1000).contains(&self.search.num_results) {
            return Err(ConfigError::InvalidNumResults(self.search.num_results));
        }
        if !self.search.threshold.is_finite() || self.search.threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.search.threshold));
        }

        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if !(1..=8192).contains(&chunking.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(chunking.max_tokens));
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<(), ConfigError> {
        let store = &self.store;
        if store.location.trim().is_empty() {
            return Err(ConfigError::InvalidStoreLocation(store.location.clone()));
        }
        if !(1..=8192).contains(&store.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(store.dimension));
        }
        if validate_table_name(&store.default_table).is_err() {
            return Err(ConfigError::InvalidTableName(store.default_table.clone()));
        }
        Ok(())
    }

    /// Resolve `[store].location`; relative paths are taken from the config dir
    #[inline]
    pub fn store_location(&self) -> StoreLocation {
        match self.store.location.as_str() {
            "memory" => StoreLocation::InMemory,
            "temporary" => StoreLocation::Temporary,
            path => StoreLocation::Path(self.base_dir.join(path)),
        }
    }

    #[inline]
    pub fn model_configuration(&self) -> ModelConfiguration {
        let mut model = ModelConfiguration::new(self.model.hub_repo_id.clone())
            .with_background_session(self.model.use_background_session);
        if let Some(path) = &self.model.local_path {
            model = model.with_local_path(self.base_dir.join(path));
        }
        model
    }

    #[inline]
    pub fn loading_strategy(&self) -> LoadingStrategy {
        match self.model.loading_strategy {
            LoadingMode::Eager => LoadingStrategy::Eager,
            LoadingMode::Lazy => LoadingStrategy::Lazy,
            LoadingMode::Hybrid => LoadingStrategy::Hybrid {
                delay: Duration::from_millis(self.model.hybrid_delay_ms),
            },
        }
    }

    #[inline]
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            token_unit: self.chunking.token_unit,
            // overlap is clamped, a zero max_tokens is rejected by validate()
            chunking: ChunkingConfig::new(self.chunking.max_tokens, self.chunking.overlap)
                .unwrap_or_default(),
            strategy: self.chunking.strategy,
        }
    }

    #[inline]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model: self.model_configuration(),
            loading_strategy: self.loading_strategy(),
            location: self.store_location(),
            dimension: self.store.dimension,
            default_table: self.store.default_table.clone(),
            cache_max_entries: self.cache.max_entries,
        }
    }

    /// Loader for the configured backend
    #[inline]
    pub fn model_loader(&self) -> Result<Arc<dyn ModelLoader>, ConfigError> {
        Ok(match self.model.backend {
            Backend::Ollama => Arc::new(OllamaLoader::from_config(&self.ollama)?),
            Backend::Hashing => Arc::new(HashingLoader::new(self.store.dimension)),
        })
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.url()?;

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}
