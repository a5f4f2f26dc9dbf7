// Database module
// Vector tables in LanceDB, document catalog and row-id counters in SQLite

pub mod catalog;
pub mod vector_store;

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RagError, Result};

pub use catalog::{Catalog, DocumentRecord};
pub use vector_store::VectorStore;

static TABLE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Reject anything that is not a plain identifier
#[inline]
pub fn validate_table_name(name: &str) -> Result<()> {
    if TABLE_NAME_REGEX.is_match(name).unwrap_or(false) {
        Ok(())
    } else {
        Err(RagError::InvalidTableName(name.to_string()))
    }
}

/// Where the store keeps its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreLocation {
    /// Nothing touches the disk; everything is gone when the store stops
    InMemory,
    /// A fresh directory under the OS temp dir, removed when the store stops
    Temporary,
    /// Vectors under `<dir>/vectors`, catalog at `<dir>/catalog.db`
    Path(PathBuf),
}

impl fmt::Display for StoreLocation {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, "memory"),
            Self::Temporary => write!(f, "temporary"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One stored chunk, as returned by search and lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document (ingestion) id the chunk belongs to
    pub id: Uuid,
    pub text: String,
    pub keywords: String,
    /// Distance to the query, lower is closer; 0.0 for direct lookups
    pub score: f64,
    pub row_id: u64,
}
