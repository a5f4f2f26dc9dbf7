//! Retrieval engine: the entry point tying ingestion, embedding and storage together.
//!
//! Documents go in through [`RetrievalEngine::add`], which streams progress while
//! chunks are embedded (through the result cache) and inserted into the vector
//! store. Queries are embedded the same way and answered by the store.


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::database::{
    DocumentRecord, SearchResult, StoreLocation, VectorStore, validate_table_name,
};
use crate::embeddings::{
    CacheStats, DEFAULT_EMBEDDING_DIMENSION, EmbeddingCache, ModelCache, ModelConfiguration,
    ModelHandle, ModelLoader,
};
use crate::ingest::{Chunk, FileFormat, IngestOptions, Progress, process_file, process_text};
use crate::{RagError, Result};

pub type ProgressStream = BoxStream<'static, Result<Progress>>;

/// When the embedding model gets loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingStrategy {
    /// While the engine is being built; construction fails if loading does
    Eager,
    /// On the first call that needs embeddings
    #[default]
    Lazy,
    /// In the background, `delay` after construction
    Hybrid { delay: Duration },
}

/// Something to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file whose format is taken from its extension
    File(PathBuf),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddOptions {
    /// Target table; the engine's default table when `None`
    pub table: Option<String>,
    pub ingest: IngestOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model: ModelConfiguration,
    pub loading_strategy: LoadingStrategy,
    pub location: StoreLocation,
    pub dimension: usize,
    pub default_table: String,
    /// Zero or negative disables the embedding result cache
    pub cache_max_entries: i64,
}

impl Default for EngineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            model: ModelConfiguration::new("nomic-embed-text:latest"),
            loading_strategy: LoadingStrategy::default(),
            location: StoreLocation::InMemory,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            default_table: "chunks".to_string(),
            cache_max_entries: 10_000,
        }
    }
}

/// Model access plus the result cache in front of it
#[derive(Debug, Clone)]
struct Embedder {
    models: ModelCache,
    cache: EmbeddingCache,
    config: ModelConfiguration,
    dimension: usize,
}

impl Embedder {
    async fn model(&self) -> Result<ModelHandle> {
        let model = self.models.model(&self.config).await?;
        if model.dimension() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: model.dimension(),
            });
        }
        Ok(model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.cache
            .embeddings(texts, &self.config.key(), |missing| async move {
                let model = self.model().await?;
                model.batch_encode(&missing).await
            })
            .await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query is empty".to_string()));
        }
        self.embed(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("no embedding for query".to_string()))
    }
}

pub struct RetrievalEngine {
    embedder: Embedder,
    store: VectorStore,
    preload: Option<AbortHandle>,
}

impl std::fmt::Debug for RetrievalEngine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("model", &self.embedder.config)
            .field("default_table", &self.store.default_table())
            .finish_non_exhaustive()
    }
}

impl Drop for RetrievalEngine {
    fn drop(&mut self) {
        if let Some(preload) = self.preload.take() {
            preload.abort();
        }
    }
}

impl RetrievalEngine {
    /// Open the store and set up model loading per `config.loading_strategy`
    #[inline]
    #[instrument(skip_all, fields(model = %config.model.hub_repo_id, location = %config.location))]
    pub async fn new(config: EngineConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        let store =
            VectorStore::open(config.location.clone(), config.dimension, &config.default_table)
                .await?;
        let embedder = Embedder {
            models: ModelCache::new(loader),
            cache: EmbeddingCache::new(config.cache_max_entries),
            config: config.model,
            dimension: config.dimension,
        };

        let preload = match config.loading_strategy {
            LoadingStrategy::Eager => {
                embedder.model().await?;
                None
            }
            LoadingStrategy::Lazy => None,
            LoadingStrategy::Hybrid { delay } => {
                let embedder = embedder.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    debug!("Preloading embedding model after {:?}", delay);
                    if let Err(e) = embedder.model().await {
                        warn!("Background model load failed: {}", e);
                    }
                });
                Some(task.abort_handle())
            }
        };

        info!("Retrieval engine ready");
        Ok(Self {
            embedder,
            store,
            preload,
        })
    }

    #[inline]
    pub fn default_table(&self) -> &str {
        self.store.default_table()
    }

    #[inline]
    pub fn model_configuration(&self) -> &ModelConfiguration {
        &self.embedder.config
    }

    fn table<'a>(&'a self, table: Option<&'a str>) -> Result<&'a str> {
        let table = table.unwrap_or_else(|| self.store.default_table());
        validate_table_name(table)?;
        Ok(table)
    }

    /// Ingest `source` under document `id`, one progress item per unit of work.
    ///
    /// The stream ends after the last unit or the first error. Every item's
    /// chunks are committed before its progress is reported; dropping the
    /// stream stops ingestion without leaving a partial batch behind.
    #[inline]
    #[instrument(skip(self, source, options), fields(table = ?options.table))]
    pub async fn add(&self, source: Source, id: Uuid, options: AddOptions) -> Result<ProgressStream> {
        let table = self.table(options.table.as_deref())?.to_string();
        self.store.ensure_table(&table).await?;

        let mut batches = match source {
            Source::File(path) => {
                let format = FileFormat::from_path(&path)?;
                info!("Adding {} as {:?} to {}", path.display(), format, table);
                process_file(path, format, options.ingest)
            }
            Source::Text(text) => {
                info!("Adding {} bytes of text to {}", text.len(), table);
                process_text(text, options.ingest)
            }
        };

        let embedder = self.embedder.clone();
        let store = self.store.clone();
        let (mut tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            while let Some(batch) = batches.next().await {
                let outcome = match batch {
                    Ok((chunks, progress)) => store_chunks(&embedder, &store, chunks, id, &table)
                        .await
                        .map(|()| progress),
                    Err(e) => Err(e),
                };
                let failed = outcome.is_err();
                if tx.send(outcome).await.is_err() {
                    debug!("Progress consumer dropped, stopping ingestion of {}", id);
                    return;
                }
                if failed {
                    return;
                }
            }
            debug!("Finished ingesting {}", id);
        });

        Ok(rx.boxed())
    }

    /// Nearest chunks to `query` in one table, closest first
    #[inline]
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        num_results: usize,
        threshold: f64,
        table: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let table = self.table(table)?;
        let vector = self.embedder.embed_query(query).await?;
        let results = self.store.search(&vector, num_results, threshold, table).await?;
        debug!("Search returned {} results", results.len());
        Ok(results)
    }

    #[inline]
    #[instrument(skip(self))]
    pub async fn search_everywhere(
        &self,
        query: &str,
        num_results: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_query(query).await?;
        self.store
            .search_everywhere(&vector, num_results, threshold)
            .await
    }

    /// Direct lookup by row id
    #[inline]
    #[instrument(skip(self))]
    pub async fn get_chunk(&self, row_id: u64, table: Option<&str>) -> Result<SearchResult> {
        let table = self.table(table)?;
        self.store.get_chunk(row_id, table).await
    }

    /// Remove document `id`; returns the number of rows removed
    #[inline]
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, table: Option<&str>) -> Result<usize> {
        let table = self.table(table)?;
        self.store.delete(id, table).await
    }

    #[inline]
    #[instrument(skip(self))]
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        self.store.delete_table(table).await
    }

    #[inline]
    #[instrument(skip(self))]
    pub async fn delete_all(&self) -> Result<()> {
        self.store.delete_all().await
    }

    #[inline]
    pub async fn list_documents(&self, table: Option<&str>) -> Result<Vec<DocumentRecord>> {
        let table = self.table(table)?;
        self.store.list_documents(table).await
    }

    #[inline]
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.store.list_tables().await
    }

    #[inline]
    pub async fn count(&self, table: Option<&str>) -> Result<usize> {
        let table = self.table(table)?;
        self.store.count(table).await
    }

    #[inline]
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.embedder.cache.stats().await
    }

    #[inline]
    pub async fn is_model_loaded(&self) -> Result<bool> {
        self.embedder.models.is_cached(&self.embedder.config).await
    }

    /// Forget loaded models; the next call that needs one loads it again
    #[inline]
    pub async fn reset_model_cache(&self) -> Result<()> {
        self.embedder.models.reset().await
    }

    #[inline]
    pub async fn clear_embedding_cache(&self) -> Result<()> {
        self.embedder.cache.clear().await
    }
}

async fn store_chunks(
    embedder: &Embedder,
    store: &VectorStore,
    chunks: Vec<Chunk>,
    id: Uuid,
    table: &str,
) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let embeddings = embedder.embed(&texts).await?;
    let rows = store.insert(chunks, embeddings, id, table).await?;
    debug!("Stored rows {}..{} for {}", rows.start, rows.end, id);
    Ok(())
}
