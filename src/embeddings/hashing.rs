// Offline embedder based on feature hashing of word tokens.
// Deterministic, dependency free at runtime, good enough for lexical overlap.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{EmbeddingModel, ModelConfiguration, ModelHandle, ModelLoader};
use crate::chunking::{TokenUnit, tokenize};
use crate::{RagError, Result};

/// Hashes each word into one signed bucket and L2-normalizes the result
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    #[inline]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text, TokenUnit::Word) {
            let hash = Sha256::digest(token.as_bytes());
            let mut bucket = [0_u8; 8];
            bucket.copy_from_slice(&hash[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
            if let Some(slot) = vector.get_mut(index) {
                *slot += sign;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    async fn batch_encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashingLoader {
    dimension: usize,
}

impl HashingLoader {
    #[inline]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl ModelLoader for HashingLoader {
    async fn load(&self, config: &ModelConfiguration) -> Result<ModelHandle> {
        debug!(
            "Using hashing embedder ({} dimensions) for {}",
            self.dimension,
            config.key()
        );
        Ok(Arc::new(HashingEmbedder::new(self.dimension)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_are_unit_length_and_deterministic() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed("The quick brown fox");
        let b = embedder.embed("the QUICK brown fox!");

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_are_closer_than_unrelated_text() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let query = embedder.embed("fox");
        let related = embedder.embed("brown fox");
        let unrelated = embedder.embed("the quick");

        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn empty_text_is_the_zero_vector() {
        let embedder = HashingEmbedder::new(8).unwrap();
        assert!(embedder.embed("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            HashingEmbedder::new(0),
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn loader_produces_the_configured_dimension() {
        let model = HashingLoader::new(32)
            .load(&ModelConfiguration::new("offline"))
            .await
            .unwrap();
        assert_eq!(model.dimension(), 32);

        let batch = model
            .batch_encode(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], model.encode("one").await.unwrap());
    }
}
