//! Page-parallel PDF ingestion.
//!
//! Pages are split into batches of `max(1, page_count / available_parallelism)`
//! and each batch runs on its own task. A page's chunks are forwarded as soon as
//! that page is done, so progress arrives page by page in completion order.
//! Pages whose text cannot be extracted are logged and reported with no chunks.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use lopdf::Document;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{BatchSender, Chunk, IngestOptions, Progress, process_chunks, send_batch};
use crate::chunking::{chunk_tokens, tokenize};
use crate::{RagError, Result};

struct PageOutcome {
    page_index: usize,
    chunks: Vec<Chunk>,
}

/// Pages handled by one worker task
#[inline]
pub fn pages_per_batch(page_count: usize, workers: usize) -> usize {
    (page_count / workers.max(1)).max(1)
}

fn available_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

async fn load_document(path: &Path) -> Result<Document> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.is_empty() {
        return Err(RagError::FileEmpty(path.display().to_string()));
    }

    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || Document::load_mem(&bytes))
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("PDF load task failed: {e}")))?
        .map_err(|e| RagError::InvalidInput(format!("Failed to parse PDF {display}: {e}")))
}

/// Text of one page, or `None` when extraction fails
async fn extract_page_text(document: Arc<Document>, page_number: u32) -> Option<String> {
    let extracted =
        tokio::task::spawn_blocking(move || document.extract_text(&[page_number])).await;

    match extracted {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            warn!("Skipping unreadable PDF page {}: {}", page_number, e);
            None
        }
        Err(e) => {
            warn!("PDF page {} extraction task failed: {}", page_number, e);
            None
        }
    }
}

async fn process_page(
    document: Arc<Document>,
    page_number: u32,
    options: IngestOptions,
) -> PageOutcome {
    let page_index = page_number.saturating_sub(1) as usize;

    let chunks = match extract_page_text(document, page_number).await {
        Some(text) => {
            let tokens = tokenize(&text, options.token_unit);
            let pieces = chunk_tokens(&tokens, &options.chunking);
            process_chunks(pieces, page_index, options.strategy).await
        }
        None => Vec::new(),
    };

    PageOutcome { page_index, chunks }
}

pub(crate) async fn process_pdf(
    path: &Path,
    options: IngestOptions,
    tx: &mut BatchSender,
) -> Result<()> {
    let document = Arc::new(load_document(path).await?);
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(RagError::FileEmpty(path.display().to_string()));
    }

    let workers = available_workers();
    let batch_size = pages_per_batch(pages.len(), workers);
    let total_units = pages.len() as i64;
    info!(
        "Processing {} PDF pages from {} in batches of {} ({} workers)",
        pages.len(),
        path.display(),
        batch_size,
        workers
    );

    let (page_tx, mut page_rx) = mpsc::channel::<PageOutcome>(workers);
    let mut tasks = JoinSet::new();

    for batch in pages.chunks(batch_size) {
        let batch = batch.to_vec();
        let document = Arc::clone(&document);
        let mut page_tx = page_tx.clone();

        tasks.spawn(async move {
            for page_number in batch {
                if page_tx.is_closed() {
                    return;
                }
                let outcome = process_page(Arc::clone(&document), page_number, options).await;
                if page_tx.send(outcome).await.is_err() {
                    return;
                }
            }
        });
    }
    drop(page_tx);

    let mut completed_units = 0;
    while let Some(outcome) = page_rx.next().await {
        completed_units += 1;
        debug!(
            "PDF page {} produced {} chunks ({}/{})",
            outcome.page_index,
            outcome.chunks.len(),
            completed_units,
            total_units
        );

        let progress = Progress::new(total_units, completed_units);
        if !send_batch(tx, outcome.chunks, progress).await {
            tasks.abort_all();
            return Ok(());
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("PDF page worker failed: {}", e);
        }
    }

    Ok(())
}
