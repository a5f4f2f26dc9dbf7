// Embeddings module
// Model contract, model-handle cache, embedding result cache and the built-in backends

pub mod hashing;
pub mod model_cache;
pub mod ollama;
pub mod result_cache;

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use hashing::{HashingEmbedder, HashingLoader};
pub use model_cache::ModelCache;
pub use ollama::{OllamaClient, OllamaLoader};
pub use result_cache::{CacheStats, EmbeddingCache, EmbeddingCacheKey};

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// A loaded embedding model
#[async_trait]
pub trait EmbeddingModel: Send + Sync + fmt::Debug {
    /// Length of every vector this model produces
    fn dimension(&self) -> usize;

    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    async fn batch_encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.encode(text).await?);
        }
        Ok(vectors)
    }
}

pub type ModelHandle = Arc<dyn EmbeddingModel>;

/// Turns a [`ModelConfiguration`] into a live model handle
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, config: &ModelConfiguration) -> Result<ModelHandle>;
}

/// Identifies which embedding model to load and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    pub hub_repo_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default)]
    pub use_background_session: bool,
}

impl ModelConfiguration {
    #[inline]
    pub fn new(hub_repo_id: impl Into<String>) -> Self {
        Self {
            hub_repo_id: hub_repo_id.into(),
            local_path: None,
            use_background_session: false,
        }
    }

    #[inline]
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    #[inline]
    pub fn with_background_session(mut self, enabled: bool) -> Self {
        self.use_background_session = enabled;
        self
    }

    /// Cache identity of this configuration
    #[inline]
    pub fn key(&self) -> ModelConfigurationKey {
        ModelConfigurationKey {
            hub_repo_id: self.hub_repo_id.clone(),
            local_path: self.local_path.as_deref().map(normalize_path),
            use_background_session: self.use_background_session,
        }
    }
}

/// Two configurations share cached models and embeddings iff their keys are equal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelConfigurationKey {
    pub hub_repo_id: String,
    pub local_path: Option<PathBuf>,
    pub use_background_session: bool,
}

impl fmt::Display for ModelConfigurationKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hub_repo_id)?;
        if let Some(path) = &self.local_path {
            write!(f, " @ {}", path.display())?;
        }
        if self.use_background_session {
            write!(f, " (background)")?;
        }
        Ok(())
    }
}

/// Lexically normalize a path: drop `.` components, fold `..` and trailing separators
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_paths_share_a_key() {
        let a = ModelConfiguration::new("org/model").with_local_path("/models/./minilm/");
        let b = ModelConfiguration::new("org/model").with_local_path("/models/tmp/../minilm");
        assert_eq!(a.key(), b.key());
        assert_eq!(
            a.key().local_path.as_deref(),
            Some(Path::new("/models/minilm"))
        );
    }

    #[test]
    fn every_field_is_part_of_the_key() {
        let base = ModelConfiguration::new("org/model");
        assert_ne!(base.key(), ModelConfiguration::new("org/other").key());
        assert_ne!(base.key(), base.clone().with_local_path("/m").key());
        assert_ne!(base.key(), base.clone().with_background_session(true).key());
    }

    #[test]
    fn key_display() {
        let key = ModelConfiguration::new("org/model")
            .with_local_path("/m")
            .with_background_session(true)
            .key();
        assert_eq!(key.to_string(), "org/model @ /m (background)");
    }
}
