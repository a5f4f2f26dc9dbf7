use anyhow::{Context, Result};
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use uuid::Uuid;

use crate::RetrievalEngine;
use crate::config::Config;
use crate::database::SearchResult;
use crate::engine::{AddOptions, Source};

/// Build an engine from the loaded configuration
#[inline]
pub async fn open_engine(config: &Config) -> Result<RetrievalEngine> {
    let loader = config
        .model_loader()
        .context("Failed to set up the embedding backend")?;
    let engine = RetrievalEngine::new(config.engine_config(), loader)
        .await
        .context("Failed to open the retrieval engine")?;
    Ok(engine)
}

/// Ingest a file or a piece of text, drawing a progress bar while it runs
#[inline]
pub async fn add_document(
    engine: &RetrievalEngine,
    config: &Config,
    source: Source,
    id: Option<Uuid>,
    table: Option<String>,
) -> Result<Uuid> {
    let id = id.unwrap_or_else(Uuid::new_v4);
    let label = match &source {
        Source::File(path) => path.display().to_string(),
        Source::Text(_) => "text".to_string(),
    };
    info!("Adding {} as document {}", label, id);

    let options = AddOptions {
        table,
        ingest: config.ingest_options(),
    };
    let mut progress = engine.add(source, id, options).await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(1).with_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} Adding {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(label.clone());

    while let Some(update) = progress.next().await {
        match update {
            Ok(update) => {
                bar.set_length(u64::try_from(update.total_units).unwrap_or_default());
                bar.set_position(u64::try_from(update.completed_units).unwrap_or_default());
            }
            Err(e) => {
                bar.abandon();
                return Err(e).with_context(|| format!("Failed to add {label}"));
            }
        }
    }
    bar.finish_and_clear();

    println!(
        "{} {} as document {}",
        style("Added").green().bold(),
        label,
        style(id).cyan()
    );
    Ok(id)
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("{}", style("No matching chunks.").dim());
        return;
    }

    for result in results {
        println!(
            "{} {} {}",
            style(format!("#{}", result.row_id)).bold(),
            style(format!("{:.4}", result.score)).yellow(),
            style(result.id).dim()
        );
        println!("   {}", result.text);
        if !result.keywords.is_empty() {
            println!("   {} {}", style("keywords:").dim(), result.keywords);
        }
    }
}

#[inline]
pub async fn search(
    engine: &RetrievalEngine,
    query: &str,
    num_results: usize,
    threshold: f64,
    table: Option<&str>,
) -> Result<()> {
    let results = engine
        .search(query, num_results, threshold, table)
        .await
        .context("Search failed")?;
    print_results(&results);
    Ok(())
}

#[inline]
pub async fn search_all(
    engine: &RetrievalEngine,
    query: &str,
    num_results: usize,
    threshold: f64,
) -> Result<()> {
    let results = engine
        .search_everywhere(query, num_results, threshold)
        .await
        .context("Search failed")?;
    print_results(&results);
    Ok(())
}

#[inline]
pub async fn get_chunk(engine: &RetrievalEngine, row_id: u64, table: Option<&str>) -> Result<()> {
    let chunk = engine.get_chunk(row_id, table).await?;
    print_results(std::slice::from_ref(&chunk));
    Ok(())
}

#[inline]
pub async fn delete_document(engine: &RetrievalEngine, id: Uuid, table: Option<&str>) -> Result<()> {
    let removed = engine.delete(id, table).await?;
    if removed == 0 {
        println!("No chunks found for document {}", style(id).cyan());
    } else {
        println!(
            "{} {} chunks of document {}",
            style("Deleted").red().bold(),
            removed,
            style(id).cyan()
        );
    }
    Ok(())
}

#[inline]
pub async fn delete_table(engine: &RetrievalEngine, table: &str) -> Result<()> {
    engine.delete_table(table).await?;
    println!("{} table {}", style("Deleted").red().bold(), table);
    Ok(())
}

#[inline]
pub async fn delete_all(engine: &RetrievalEngine) -> Result<()> {
    engine.delete_all().await?;
    println!("{} all tables", style("Deleted").red().bold());
    Ok(())
}

/// Tables with their documents; only `table` when given
#[inline]
pub async fn list(engine: &RetrievalEngine, table: Option<&str>) -> Result<()> {
    let mut tables = match table {
        Some(table) => vec![table.to_string()],
        None => engine.list_tables().await?,
    };
    tables.sort();

    if tables.is_empty() {
        println!("No tables yet. Use 'local-rag add <path>' to add a document.");
        return Ok(());
    }

    for table in &tables {
        let documents = engine.list_documents(Some(table)).await?;
        let chunks = engine.count(Some(table)).await?;
        println!(
            "{} ({} documents, {} chunks)",
            style(table).bold(),
            documents.len(),
            chunks
        );
        for document in documents {
            println!(
                "   {} {} chunks, rows {}..={}, updated {}",
                style(document.id).cyan(),
                document.chunk_count,
                document.first_row_id,
                document.last_row_id,
                document.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;
    println!(
        "{} {}",
        style("Configuration file:").bold(),
        config.config_file_path().display()
    );
    println!();
    println!("{content}");
    Ok(())
}
