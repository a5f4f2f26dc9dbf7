use std::path::PathBuf;

use clap::{Parser, Subcommand};
use local_rag::commands::{
    add_document, delete_all, delete_document, delete_table, get_chunk, list, open_engine, search,
    search_all, show_config,
};
use local_rag::config::{Config, get_config_dir};
use local_rag::{RagError, Result, Source};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "local-rag")]
#[command(about = "Local document retrieval: chunk, embed, store and search")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (and, by default, the store)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configuration in effect
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a document from a file or inline text
    Add {
        /// File to ingest (.txt, .md, .json, .csv, .pdf)
        #[arg(required_unless_present = "text", conflicts_with = "text")]
        path: Option<PathBuf>,
        /// Ingest this text instead of a file
        #[arg(long)]
        text: Option<String>,
        /// Document id; a new one is generated when omitted
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        table: Option<String>,
    },
    /// Search one table
    Search {
        query: String,
        #[arg(long)]
        table: Option<String>,
        /// Number of results (defaults to [search].num_results)
        #[arg(short = 'n', long)]
        num_results: Option<usize>,
        /// Maximum distance (defaults to [search].threshold)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Search every table
    SearchAll {
        query: String,
        #[arg(short = 'n', long)]
        num_results: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Show one chunk by row id
    Get {
        row_id: u64,
        #[arg(long)]
        table: Option<String>,
    },
    /// Delete every chunk of a document
    Delete {
        id: Uuid,
        #[arg(long)]
        table: Option<String>,
    },
    /// Drop a table
    DeleteTable { table: String },
    /// Drop every table
    DeleteAll,
    /// List tables and their documents
    List {
        #[arg(long)]
        table: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let config = Config::load(&config_dir)?;

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&config)?;
        } else {
            println!(
                "Edit {} to change settings, or run with --show to print them.",
                config.config_file_path().display()
            );
        }
        return Ok(());
    }

    let engine = open_engine(&config).await?;
    match cli.command {
        Commands::Config { .. } => {}
        Commands::Add {
            path,
            text,
            id,
            table,
        } => {
            let source = match (path, text) {
                (Some(path), None) => Source::File(path),
                (None, Some(text)) => Source::Text(text),
                _ => {
                    return Err(RagError::InvalidInput(
                        "pass either a path or --text".to_string(),
                    ));
                }
            };
            add_document(&engine, &config, source, id, table).await?;
        }
        Commands::Search {
            query,
            table,
            num_results,
            threshold,
        } => {
            search(
                &engine,
                &query,
                num_results.unwrap_or(config.search.num_results),
                threshold.unwrap_or(config.search.threshold),
                table.as_deref(),
            )
            .await?;
        }
        Commands::SearchAll {
            query,
            num_results,
            threshold,
        } => {
            search_all(
                &engine,
                &query,
                num_results.unwrap_or(config.search.num_results),
                threshold.unwrap_or(config.search.threshold),
            )
            .await?;
        }
        Commands::Get { row_id, table } => {
            get_chunk(&engine, row_id, table.as_deref()).await?;
        }
        Commands::Delete { id, table } => {
            delete_document(&engine, id, table.as_deref()).await?;
        }
        Commands::DeleteTable { table } => {
            delete_table(&engine, &table).await?;
        }
        Commands::DeleteAll => {
            delete_all(&engine).await?;
        }
        Commands::List { table } => {
            list(&engine, table.as_deref()).await?;
        }
    }

    Ok(())
}
