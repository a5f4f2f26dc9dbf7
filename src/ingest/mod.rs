// File ingestion pipeline
// Turns files or raw text into keyword-tagged chunks and streams them with progress

#[cfg(test)]
pub(crate) mod tests;

pub mod pdf;

use std::path::{Path, PathBuf};

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::chunking::{
    ChunkingConfig, ProcessingStrategy, TokenUnit, chunk_tokens, extract_keywords, tokenize,
};
use crate::{RagError, Result};

/// Buffered (chunks, progress) items between the producer and the consumer
const STREAM_BUFFER: usize = 8;

/// A bounded span of text ready for embedding and storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Space-joined content words; empty under [`ProcessingStrategy::FullText`]
    pub keywords: String,
    pub page_index: usize,
    pub local_chunk_index: usize,
}

/// Units of work completed so far for one ingestion call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub total_units: i64,
    pub completed_units: i64,
}

impl Progress {
    #[inline]
    pub const fn new(total_units: i64, completed_units: i64) -> Self {
        Self {
            total_units,
            completed_units,
        }
    }

    #[inline]
    pub const fn is_complete(&self) -> bool {
        self.completed_units >= self.total_units
    }

    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total_units <= 0 {
            1.0
        } else {
            self.completed_units as f64 / self.total_units as f64
        }
    }
}

/// Formats recognised by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Markdown,
    Json,
    Csv,
    Pdf,
    Docx,
}

impl FileFormat {
    #[inline]
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "txt" | "text" => Ok(Self::Text),
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "" => Err(RagError::UnsupportedFileType(path.display().to_string())),
            other => Err(RagError::UnsupportedFileType(other.to_string())),
        }
    }
}

/// How a single ingestion call tokenizes and chunks its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestOptions {
    pub token_unit: TokenUnit,
    pub chunking: ChunkingConfig,
    pub strategy: ProcessingStrategy,
}

pub type ChunkBatch = (Vec<Chunk>, Progress);
pub type ChunkStream = BoxStream<'static, Result<ChunkBatch>>;

pub(crate) type BatchSender = mpsc::Sender<Result<ChunkBatch>>;

/// Stream the chunks of a file, one item per unit of work.
///
/// The stream ends after the last unit or after the first error. Dropping the
/// stream stops the producer at its next unit boundary.
#[inline]
pub fn process_file(path: PathBuf, format: FileFormat, options: IngestOptions) -> ChunkStream {
    let (mut tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        debug!("Processing {} as {:?}", path.display(), format);
        let outcome = match format {
            FileFormat::Text | FileFormat::Markdown => process_plain_text(&path, options, &mut tx).await,
            FileFormat::Json => process_json(&path, options, &mut tx).await,
            FileFormat::Csv => process_csv(&path, options, &mut tx).await,
            FileFormat::Pdf => pdf::process_pdf(&path, options, &mut tx).await,
            FileFormat::Docx => Err(RagError::UnsupportedOperation("docx".to_string())),
        };

        if let Err(e) = outcome {
            debug!("Ingestion of {} failed: {}", path.display(), e);
            let _ = tx.send(Err(e)).await;
        }
    });

    rx.boxed()
}

/// Stream the chunks of an in-memory text as a single unit of work
#[inline]
pub fn process_text(text: String, options: IngestOptions) -> ChunkStream {
    let (mut tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        let outcome = if text.trim().is_empty() {
            Err(RagError::InvalidInput("text is empty".to_string()))
        } else {
            let chunks = chunk_whole_text(&text, options).await;
            send_batch(&mut tx, chunks, Progress::new(1, 1)).await;
            Ok(())
        };

        if let Err(e) = outcome {
            let _ = tx.send(Err(e)).await;
        }
    });

    rx.boxed()
}

/// Attach page/chunk indices and, when the strategy asks for it, keywords.
///
/// Keyword tagging runs concurrently, one blocking task per chunk; output
/// order always matches input order.
#[inline]
pub async fn process_chunks(
    chunks: Vec<String>,
    page_index: usize,
    strategy: ProcessingStrategy,
) -> Vec<Chunk> {
    if !strategy.extracts_keywords() {
        return chunks
            .into_iter()
            .enumerate()
            .map(|(local_chunk_index, text)| Chunk {
                text,
                keywords: String::new(),
                page_index,
                local_chunk_index,
            })
            .collect();
    }

    let mut tasks = JoinSet::new();
    for (index, text) in chunks.iter().enumerate() {
        let text = text.clone();
        tasks.spawn_blocking(move || (index, extract_keywords(&text)));
    }

    let mut keywords = vec![String::new(); chunks.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, extracted)) => {
                if let Some(slot) = keywords.get_mut(index) {
                    *slot = extracted;
                }
            }
            Err(e) => warn!("Keyword extraction task failed on page {}: {}", page_index, e),
        }
    }

    chunks
        .into_iter()
        .zip(keywords)
        .enumerate()
        .map(|(local_chunk_index, (text, keywords))| Chunk {
            text,
            keywords,
            page_index,
            local_chunk_index,
        })
        .collect()
}

/// Returns false once the consumer has gone away
pub(crate) async fn send_batch(tx: &mut BatchSender, chunks: Vec<Chunk>, progress: Progress) -> bool {
    if tx.send(Ok((chunks, progress))).await.is_err() {
        debug!("Ingestion consumer dropped, stopping at {:?}", progress);
        return false;
    }
    true
}

async fn chunk_whole_text(text: &str, options: IngestOptions) -> Vec<Chunk> {
    let tokens = tokenize(text, options.token_unit);
    let pieces = chunk_tokens(&tokens, &options.chunking);
    process_chunks(pieces, 0, options.strategy).await
}

async fn read_non_empty(path: &Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Err(RagError::FileEmpty(path.display().to_string()));
    }
    Ok(content)
}

async fn process_plain_text(path: &Path, options: IngestOptions, tx: &mut BatchSender) -> Result<()> {
    let content = read_non_empty(path).await?;
    let chunks = chunk_whole_text(&content, options).await;
    send_batch(tx, chunks, Progress::new(1, 1)).await;
    Ok(())
}

async fn process_json(path: &Path, options: IngestOptions, tx: &mut BatchSender) -> Result<()> {
    let content = tokio::fs::read_to_string(path).await?;
    let canonical = canonical_json(&content)?;
    let chunks = chunk_whole_text(&canonical, options).await;
    send_batch(tx, chunks, Progress::new(1, 1)).await;
    Ok(())
}

async fn process_csv(path: &Path, options: IngestOptions, tx: &mut BatchSender) -> Result<()> {
    let content = read_non_empty(path).await?;
    let lines = csv_lines(&content);
    let pieces = chunk_tokens(&lines, &options.chunking);
    let chunks = process_chunks(pieces, 0, options.strategy).await;
    send_batch(tx, chunks, Progress::new(1, 1)).await;
    Ok(())
}

/// Non-empty lines of a CSV document; each line is one token
pub(crate) fn csv_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a JSON object and re-serialize it with keys sorted at every level.
/// Arrays and scalars at the top level are rejected.
pub(crate) fn canonical_json(content: &str) -> Result<String> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| RagError::InvalidJsonFormat(e.to_string()))?;

    if !value.is_object() {
        return Err(RagError::InvalidJsonFormat(
            "top-level value must be an object".to_string(),
        ));
    }

    serde_json::to_string(&sort_keys(value)).map_err(|e| RagError::InvalidJsonFormat(e.to_string()))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
