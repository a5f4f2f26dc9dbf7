use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("File is empty: {0}")]
    FileEmpty(String),

    #[error("Invalid JSON format: {0}")]
    InvalidJsonFormat(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid table name: {0:?} (must match ^[A-Za-z_][A-Za-z0-9_]*$)")]
    InvalidTableName(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: expected {expected} vectors, got {actual}")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("Chunk {row_id} not found in table {table}")]
    ChunkNotFound { table: String, row_id: u64 },

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Rebuild this error for another receiver. Wrapped foreign errors that
    /// cannot be cloned keep their kind and message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Config(e) => Self::Config(e.replicate()),
            Self::FileEmpty(path) => Self::FileEmpty(path.clone()),
            Self::InvalidJsonFormat(m) => Self::InvalidJsonFormat(m.clone()),
            Self::UnsupportedFileType(m) => Self::UnsupportedFileType(m.clone()),
            Self::UnsupportedOperation(m) => Self::UnsupportedOperation(m.clone()),
            Self::InvalidTableName(name) => Self::InvalidTableName(name.clone()),
            Self::InvalidInput(m) => Self::InvalidInput(m.clone()),
            Self::Database(m) => Self::Database(m.clone()),
            Self::DimensionMismatch { expected, actual } => Self::DimensionMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::EmbeddingCountMismatch { expected, actual } => Self::EmbeddingCountMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::ChunkNotFound { table, row_id } => Self::ChunkNotFound {
                table: table.clone(),
                row_id: *row_id,
            },
            Self::ModelLoad(m) => Self::ModelLoad(m.clone()),
            Self::Embedding(m) => Self::Embedding(m.clone()),
            Self::Cancelled(m) => Self::Cancelled(m.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Other(e) => Self::Other(anyhow::anyhow!("{e:#}")),
        }
    }
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod ingest;

pub use engine::{AddOptions, EngineConfig, LoadingStrategy, RetrievalEngine, Source};
