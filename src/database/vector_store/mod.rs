//! Multi-table vector store.
//!
//! Every table is a LanceDB table with the columns
//! `row_id | embedding | id | original_text | keywords`. The store runs as a
//! single actor task that owns the LanceDB connection, the SQLite catalog and
//! the per-table row-id counters, so writes never interleave. Each mutating
//! operation holds a catalog write transaction (`BEGIN IMMEDIATE`) around its
//! LanceDB work and rolls it back on failure. A failed insert removes its
//! appended rows and a failed delete restores the table version it started
//! from. Dropped tables cannot be restored, so drops run last, right before
//! the commit.
//!
//! The actor keeps a handle to every table it opened or created. In-memory
//! tables only live as long as some handle does, and their connection cannot
//! list or drop them, so the handle map is the authority on which tables exist.
//!
//! Row ids start at 1, only ever grow, and are never handed out twice for the
//! same table, even after deletions or restarts.


use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::arrow::SendableRecordBatchStream;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, Table};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Catalog, DocumentRecord, SearchResult, StoreLocation, validate_table_name};
use crate::ingest::Chunk;
use crate::{RagError, Result};

const ROW_ID_COLUMN: &str = "row_id";
const EMBEDDING_COLUMN: &str = "embedding";
const ID_COLUMN: &str = "id";
const TEXT_COLUMN: &str = "original_text";
const KEYWORDS_COLUMN: &str = "keywords";
const DISTANCE_COLUMN: &str = "_distance";

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    EnsureTable {
        table: String,
        reply: Reply<()>,
    },
    Insert {
        table: String,
        id: Uuid,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        reply: Reply<Range<u64>>,
    },
    Search {
        table: String,
        query: Vec<f32>,
        limit: usize,
        threshold: f64,
        reply: Reply<Vec<SearchResult>>,
    },
    SearchEverywhere {
        query: Vec<f32>,
        limit: usize,
        threshold: f64,
        reply: Reply<Vec<SearchResult>>,
    },
    GetChunk {
        table: String,
        row_id: u64,
        reply: Reply<SearchResult>,
    },
    Delete {
        table: String,
        id: Uuid,
        reply: Reply<usize>,
    },
    DeleteTable {
        table: String,
        reply: Reply<()>,
    },
    DeleteAll {
        reply: Reply<()>,
    },
    Count {
        table: String,
        reply: Reply<usize>,
    },
    ListTables {
        reply: Reply<Vec<String>>,
    },
    ListDocuments {
        table: String,
        reply: Reply<Vec<DocumentRecord>>,
    },
}

/// Handle to the vector store actor
#[derive(Debug, Clone)]
pub struct VectorStore {
    sender: mpsc::UnboundedSender<Command>,
    dimension: usize,
    default_table: String,
}

impl VectorStore {
    /// Open the store and make sure `default_table` exists.
    /// Must be called inside a Tokio runtime.
    #[inline]
    pub async fn open(location: StoreLocation, dimension: usize, default_table: &str) -> Result<Self> {
        validate_table_name(default_table)?;
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "embedding dimension must be at least 1".to_string(),
            ));
        }

        info!(
            "Opening vector store ({}, {} dimensions, default table {})",
            location, dimension, default_table
        );
        let (connection, catalog, temp_dir) = connect(&location).await?;
        let existing = connection
            .table_names()
            .execute()
            .await
            .map_err(lance_error("list tables"))?;

        let mut actor = StoreActor {
            connection,
            catalog,
            dimension,
            default_table: default_table.to_string(),
            in_memory: matches!(location, StoreLocation::InMemory),
            tables: BTreeMap::new(),
            counters: HashMap::new(),
            _temp_dir: temp_dir,
        };
        for table in existing {
            actor.ensure_table(&table).await?;
        }
        actor.ensure_table(default_table).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(actor.run(receiver));

        Ok(Self {
            sender,
            dimension,
            default_table: default_table.to_string(),
        })
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn default_table(&self) -> &str {
        &self.default_table
    }

    /// Create `table` if it does not exist yet
    #[inline]
    pub async fn ensure_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        self.request(|reply| Command::EnsureTable {
            table: table.to_string(),
            reply,
        })
        .await
    }

    /// Store `chunks` with their `embeddings` under document `id`, all or nothing.
    /// Returns the block of row ids the chunks received.
    #[inline]
    pub async fn insert(
        &self,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        id: Uuid,
        table: &str,
    ) -> Result<Range<u64>> {
        validate_table_name(table)?;
        self.request(|reply| Command::Insert {
            table: table.to_string(),
            id,
            chunks,
            embeddings,
            reply,
        })
        .await
    }

    /// Nearest chunks in `table`, closest first, none farther than `threshold`
    #[inline]
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f64,
        table: &str,
    ) -> Result<Vec<SearchResult>> {
        validate_table_name(table)?;
        self.request(|reply| Command::Search {
            table: table.to_string(),
            query: query.to_vec(),
            limit,
            threshold,
            reply,
        })
        .await
    }

    /// Like [`search`](Self::search) over every table at once.
    /// Tables that fail are logged and left out.
    #[inline]
    pub async fn search_everywhere(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        self.request(|reply| Command::SearchEverywhere {
            query: query.to_vec(),
            limit,
            threshold,
            reply,
        })
        .await
    }

    #[inline]
    pub async fn get_chunk(&self, row_id: u64, table: &str) -> Result<SearchResult> {
        validate_table_name(table)?;
        self.request(|reply| Command::GetChunk {
            table: table.to_string(),
            row_id,
            reply,
        })
        .await
    }

    /// Remove every row of document `id`; returns how many rows went away
    #[inline]
    pub async fn delete(&self, id: Uuid, table: &str) -> Result<usize> {
        validate_table_name(table)?;
        self.request(|reply| Command::Delete {
            table: table.to_string(),
            id,
            reply,
        })
        .await
    }

    #[inline]
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        self.request(|reply| Command::DeleteTable {
            table: table.to_string(),
            reply,
        })
        .await
    }

    /// Drop every table, then re-create the default one
    #[inline]
    pub async fn delete_all(&self) -> Result<()> {
        self.request(|reply| Command::DeleteAll { reply }).await
    }

    #[inline]
    pub async fn count(&self, table: &str) -> Result<usize> {
        validate_table_name(table)?;
        self.request(|reply| Command::Count {
            table: table.to_string(),
            reply,
        })
        .await
    }

    #[inline]
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::ListTables { reply }).await
    }

    #[inline]
    pub async fn list_documents(&self, table: &str) -> Result<Vec<DocumentRecord>> {
        validate_table_name(table)?;
        self.request(|reply| Command::ListDocuments {
            table: table.to_string(),
            reply,
        })
        .await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender.send(command(reply)).map_err(|_| closed())?;
        response.await.map_err(|_| closed())?
    }
}

fn closed() -> RagError {
    RagError::Cancelled("vector store is shut down".to_string())
}

fn lance_error(action: &str) -> impl FnOnce(lancedb::Error) -> RagError + '_ {
    move |e| RagError::Database(format!("Failed to {action}: {e}"))
}

async fn connect(location: &StoreLocation) -> Result<(Connection, Catalog, Option<TempDir>)> {
    match location {
        StoreLocation::InMemory => {
            let uri = format!("memory://{}", Uuid::new_v4());
            let connection = lancedb::connect(&uri)
                .execute()
                .await
                .map_err(lance_error("open in-memory vector database"))?;
            let catalog = Catalog::open(None).await?;
            Ok((connection, catalog, None))
        }
        StoreLocation::Temporary => {
            let temp_dir = TempDir::with_prefix("local-rag-")?;
            let (connection, catalog) = open_directory(temp_dir.path()).await?;
            Ok((connection, catalog, Some(temp_dir)))
        }
        StoreLocation::Path(dir) => {
            let (connection, catalog) = open_directory(dir).await?;
            Ok((connection, catalog, None))
        }
    }
}

async fn open_directory(dir: &Path) -> Result<(Connection, Catalog)> {
    let vectors = dir.join("vectors");
    std::fs::create_dir_all(&vectors)?;
    debug!("Initializing LanceDB at path: {:?}", vectors);

    let uri = format!("file://{}", vectors.display());
    let connection = lancedb::connect(&uri)
        .execute()
        .await
        .map_err(lance_error("connect to LanceDB"))?;
    let catalog = Catalog::open(Some(&dir.join("catalog.db"))).await?;
    Ok((connection, catalog))
}

fn table_schema(dimension: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(ROW_ID_COLUMN, DataType::UInt64, false),
        Field::new(
            EMBEDDING_COLUMN,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
        Field::new(ID_COLUMN, DataType::Utf8, false),
        Field::new(TEXT_COLUMN, DataType::Utf8, false),
        Field::new(KEYWORDS_COLUMN, DataType::Utf8, false),
    ]))
}

fn record_batch(
    dimension: usize,
    rows: &Range<u64>,
    id: Uuid,
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
) -> Result<RecordBatch> {
    let id = id.to_string();
    let row_ids: Vec<u64> = rows.clone().collect();
    let ids = vec![id.as_str(); chunks.len()];
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let keywords: Vec<&str> = chunks.iter().map(|c| c.keywords.as_str()).collect();

    let flat_values: Vec<f32> = embeddings.iter().flatten().copied().collect();
    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| RagError::Database(format!("Failed to create vector array: {e}")))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(UInt64Array::from(row_ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(texts)),
        Arc::new(StringArray::from(keywords)),
    ];

    RecordBatch::try_new(table_schema(dimension), arrays)
        .map_err(|e| RagError::Database(format!("Failed to create record batch: {e}")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch.column_by_name(name)?.as_any().downcast_ref::<StringArray>()
}

/// Rows missing a required field or carrying an unparsable id are dropped
fn parse_batch(batch: &RecordBatch) -> Vec<SearchResult> {
    let row_ids = batch
        .column_by_name(ROW_ID_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>());
    let (Some(row_ids), Some(ids), Some(texts)) = (
        row_ids,
        string_column(batch, ID_COLUMN),
        string_column(batch, TEXT_COLUMN),
    ) else {
        warn!("Dropping result batch without the expected columns");
        return Vec::new();
    };
    let keywords = string_column(batch, KEYWORDS_COLUMN);
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    (0..batch.num_rows())
        .filter_map(|row| {
            if row_ids.is_null(row) || ids.is_null(row) || texts.is_null(row) {
                return None;
            }
            let Ok(id) = Uuid::parse_str(ids.value(row)) else {
                debug!("Dropping row {} with malformed id", row_ids.value(row));
                return None;
            };
            let keywords = keywords
                .filter(|k| !k.is_null(row))
                .map(|k| k.value(row).to_string())
                .unwrap_or_default();
            let score = distances
                .filter(|d| !d.is_null(row))
                .map_or(0.0, |d| f64::from(d.value(row)));

            Some(SearchResult {
                id,
                text: texts.value(row).to_string(),
                keywords,
                score,
                row_id: row_ids.value(row),
            })
        })
        .collect()
}

async fn collect_results(mut stream: SendableRecordBatchStream) -> Result<Vec<SearchResult>> {
    let mut results = Vec::new();
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(lance_error("read result stream"))?
    {
        results.extend(parse_batch(&batch));
    }
    Ok(results)
}

fn by_distance(results: &mut [SearchResult]) {
    results.sort_by(|a, b| a.score.total_cmp(&b.score));
}

struct StoreActor {
    connection: Connection,
    catalog: Catalog,
    dimension: usize,
    default_table: String,
    in_memory: bool,
    /// Open handle per existing table
    tables: BTreeMap<String, Table>,
    /// Next row id per table, seeded on first use
    counters: HashMap<String, u64>,
    _temp_dir: Option<TempDir>,
}

impl StoreActor {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            self.handle(command).await;
        }
        debug!("Vector store actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::EnsureTable { table, reply } => {
                let _ = reply.send(self.ensure_table(&table).await);
            }
            Command::Insert {
                table,
                id,
                chunks,
                embeddings,
                reply,
            } => {
                let _ = reply.send(self.insert(&table, id, &chunks, &embeddings).await);
            }
            Command::Search {
                table,
                query,
                limit,
                threshold,
                reply,
            } => {
                let _ = reply.send(self.search(&table, &query, limit, threshold).await);
            }
            Command::SearchEverywhere {
                query,
                limit,
                threshold,
                reply,
            } => {
                let _ = reply.send(self.search_everywhere(&query, limit, threshold).await);
            }
            Command::GetChunk {
                table,
                row_id,
                reply,
            } => {
                let _ = reply.send(self.get_chunk(&table, row_id).await);
            }
            Command::Delete { table, id, reply } => {
                let _ = reply.send(self.delete(&table, id).await);
            }
            Command::DeleteTable { table, reply } => {
                let _ = reply.send(self.delete_table(&table).await);
            }
            Command::DeleteAll { reply } => {
                let _ = reply.send(self.delete_all().await);
            }
            Command::Count { table, reply } => {
                let _ = reply.send(self.count(&table).await);
            }
            Command::ListTables { reply } => {
                let _ = reply.send(Ok(self.table_names()));
            }
            Command::ListDocuments { table, reply } => {
                let _ = reply.send(self.catalog.documents(&table).await);
            }
        }
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn open_table(&self, table: &str) -> Option<Table> {
        self.tables.get(table).cloned()
    }

    async fn ensure_table(&mut self, table: &str) -> Result<()> {
        validate_table_name(table)?;

        let opened = match self.open_table(table) {
            Some(opened) => opened,
            None => {
                let opened = match self.connection.open_table(table).execute().await {
                    Ok(existing) => {
                        self.check_dimension(&existing).await?;
                        existing
                    }
                    Err(lancedb::Error::TableNotFound { .. }) => {
                        info!("Creating vector table {}", table);
                        self.connection
                            .create_empty_table(table, table_schema(self.dimension))
                            .execute()
                            .await
                            .map_err(lance_error("create table"))?
                    }
                    Err(e) => return Err(lance_error("open table")(e)),
                };
                self.tables.insert(table.to_string(), opened.clone());
                opened
            }
        };

        if !self.counters.contains_key(table) {
            let stored_max = max_row_id(&opened).await?;
            let persisted = self.catalog.next_row_id(table).await?;
            let next = persisted
                .unwrap_or(1)
                .max(stored_max.map_or(1, |max| max + 1));
            debug!("Row ids for table {} continue at {}", table, next);
            self.counters.insert(table.to_string(), next);
        }
        Ok(())
    }

    async fn check_dimension(&self, table: &Table) -> Result<()> {
        let schema = table
            .schema()
            .await
            .map_err(lance_error("read table schema"))?;
        let field = schema
            .field_with_name(EMBEDDING_COLUMN)
            .map_err(|e| RagError::Database(format!("Table has no embedding column: {e}")))?;

        match field.data_type() {
            DataType::FixedSizeList(_, size) if *size as usize == self.dimension => Ok(()),
            DataType::FixedSizeList(_, size) => Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: *size as usize,
            }),
            other => Err(RagError::Database(format!(
                "Unexpected embedding column type {other}"
            ))),
        }
    }

    async fn insert(
        &mut self,
        table: &str,
        id: Uuid,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Range<u64>> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::EmbeddingCountMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.ensure_table(table).await?;
        if chunks.is_empty() {
            let next = self.counters.get(table).copied().unwrap_or(1);
            return Ok(next..next);
        }
        let Some(opened) = self.open_table(table) else {
            return Err(RagError::Database(format!("Table {table} vanished")));
        };

        self.catalog.begin().await?;
        let rows = match self.insert_rows(&opened, table, id, chunks, embeddings).await {
            Ok(rows) => rows,
            Err(e) => {
                self.catalog.rollback().await;
                return Err(e);
            }
        };
        if let Err(e) = self.catalog.commit().await {
            self.catalog.rollback().await;
            remove_rows(&opened, &rows).await;
            return Err(e);
        }

        debug!(
            "Inserted {} chunks of {} into {} (rows {}..{})",
            chunks.len(),
            id,
            table,
            rows.start,
            rows.end
        );
        Ok(rows)
    }

    /// The part of an insert that runs inside the catalog transaction
    async fn insert_rows(
        &mut self,
        opened: &Table,
        table: &str,
        id: Uuid,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Range<u64>> {
        let rows = self.reserve_rows(table, chunks.len() as u64).await?;
        let batch = record_batch(self.dimension, &rows, id, chunks, embeddings)?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        opened
            .add(reader)
            .execute()
            .await
            .map_err(lance_error("insert embeddings"))?;

        if let Err(e) = self.catalog.record_document(id, table, rows.clone()).await {
            remove_rows(opened, &rows).await;
            return Err(e);
        }
        Ok(rows)
    }

    /// Hand out `count` consecutive row ids. Must run inside a catalog transaction.
    async fn reserve_rows(&mut self, table: &str, count: u64) -> Result<Range<u64>> {
        let start = self.counters.get(table).copied().unwrap_or(1);
        let end = start + count;
        self.catalog.set_next_row_id(table, end).await?;
        self.counters.insert(table.to_string(), end);
        Ok(start..end)
    }

    async fn search(
        &self,
        table: &str,
        query: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(opened) = self.open_table(table) else {
            debug!("Search against absent table {}", table);
            return Ok(Vec::new());
        };

        let stream = opened
            .vector_search(query)
            .map_err(lance_error("create vector search"))?
            .column(EMBEDDING_COLUMN)
            .limit(limit)
            .execute()
            .await
            .map_err(lance_error("execute search"))?;

        let mut results = collect_results(stream).await?;
        results.retain(|result| result.score <= threshold);
        by_distance(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn search_everywhere(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let mut combined = Vec::new();
        for table in self.table_names() {
            match self.search(&table, query, limit, threshold).await {
                Ok(results) => combined.extend(results),
                Err(e) => warn!("Skipping table {} in cross-table search: {}", table, e),
            }
        }
        by_distance(&mut combined);
        combined.truncate(limit);
        Ok(combined)
    }

    async fn get_chunk(&self, table: &str, row_id: u64) -> Result<SearchResult> {
        let not_found = || RagError::ChunkNotFound {
            table: table.to_string(),
            row_id,
        };
        let Some(opened) = self.open_table(table) else {
            return Err(not_found());
        };

        let stream = opened
            .query()
            .only_if(format!("{ROW_ID_COLUMN} = {row_id}"))
            .limit(1)
            .execute()
            .await
            .map_err(lance_error("look up chunk"))?;

        collect_results(stream)
            .await?
            .into_iter()
            .next()
            .map(|result| SearchResult {
                score: 0.0,
                ..result
            })
            .ok_or_else(not_found)
    }

    async fn delete(&mut self, table: &str, id: Uuid) -> Result<usize> {
        let Some(opened) = self.open_table(table) else {
            debug!("Delete of {} from absent table {} is a no-op", id, table);
            return Ok(0);
        };
        let predicate = format!("{ID_COLUMN} = '{id}'");
        let version = opened
            .version()
            .await
            .map_err(lance_error("read table version"))?;

        self.catalog.begin().await?;
        let outcome = self.delete_rows(&opened, table, id, &predicate).await;
        let deleted = match self.finish(outcome).await {
            Ok(deleted) => deleted,
            Err(e) => {
                restore_version(&opened, version).await;
                return Err(e);
            }
        };
        info!("Deleted {} rows of {} from {}", deleted, id, table);
        Ok(deleted)
    }

    async fn delete_rows(
        &mut self,
        opened: &Table,
        table: &str,
        id: Uuid,
        predicate: &str,
    ) -> Result<usize> {
        self.catalog.remove_document(id, table).await?;
        let matching = opened
            .count_rows(Some(predicate.to_string()))
            .await
            .map_err(lance_error("count rows"))?;
        if matching > 0 {
            opened
                .delete(predicate)
                .await
                .map_err(lance_error("delete rows"))?;
        }
        Ok(matching)
    }

    async fn delete_table(&mut self, table: &str) -> Result<()> {
        self.catalog.begin().await?;
        let outcome = self.drop_table(table).await;
        self.finish(outcome).await?;
        self.tables.remove(table);
        self.counters.remove(table);
        Ok(())
    }

    /// Catalog rows go first so a failed drop leaves both sides intact
    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.catalog.remove_table(table).await?;
        if self.in_memory {
            // the connection cannot reach in-memory tables, empty them in place
            if let Some(opened) = self.open_table(table) {
                opened
                    .delete(&format!("{ROW_ID_COLUMN} >= 0"))
                    .await
                    .map_err(lance_error("empty table"))?;
            }
            return Ok(());
        }
        match self.connection.drop_table(table).await {
            Ok(()) => {
                info!("Dropped vector table {}", table);
                Ok(())
            }
            Err(lancedb::Error::TableNotFound { .. }) => Ok(()),
            Err(e) => Err(lance_error("drop table")(e)),
        }
    }

    async fn delete_all(&mut self) -> Result<()> {
        self.catalog.begin().await?;
        let outcome = self.drop_all_tables().await;
        self.finish(outcome).await?;
        self.tables.clear();
        self.counters.clear();

        let default_table = self.default_table.clone();
        self.ensure_table(&default_table).await
    }

    async fn drop_all_tables(&mut self) -> Result<()> {
        self.catalog.remove_all().await?;
        for table in self.table_names() {
            self.drop_table(&table).await?;
        }
        Ok(())
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                if let Err(e) = self.catalog.commit().await {
                    self.catalog.rollback().await;
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                self.catalog.rollback().await;
                Err(e)
            }
        }
    }

    async fn count(&self, table: &str) -> Result<usize> {
        let Some(opened) = self.open_table(table) else {
            return Ok(0);
        };
        opened
            .count_rows(None)
            .await
            .map_err(lance_error("count rows"))
    }
}

async fn max_row_id(table: &Table) -> Result<Option<u64>> {
    let rows = table
        .count_rows(None)
        .await
        .map_err(lance_error("count rows"))?;
    if rows == 0 {
        return Ok(None);
    }

    let mut stream = table
        .query()
        .select(Select::columns(&[ROW_ID_COLUMN]))
        .limit(rows)
        .execute()
        .await
        .map_err(lance_error("scan row ids"))?;

    let mut max = None;
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(lance_error("scan row ids"))?
    {
        let Some(column) = batch
            .column_by_name(ROW_ID_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        else {
            continue;
        };
        for value in column.iter().flatten() {
            max = Some(max.map_or(value, |current: u64| current.max(value)));
        }
    }
    Ok(max)
}

/// Roll `table` back to `version` after its catalog transaction failed
async fn restore_version(table: &Table, version: u64) {
    match table.version().await {
        Ok(current) if current == version => return,
        Ok(_) => {}
        Err(e) => warn!("Failed to read table version before restore: {}", e),
    }
    if let Err(e) = table.checkout(version).await {
        warn!("Failed to check out version {} for restore: {}", version, e);
        return;
    }
    if let Err(e) = table.restore().await {
        warn!("Failed to restore table to version {}: {}", version, e);
    }
}

/// Undo an append whose catalog transaction failed
async fn remove_rows(table: &Table, rows: &Range<u64>) {
    let predicate = format!(
        "{ROW_ID_COLUMN} >= {} AND {ROW_ID_COLUMN} < {}",
        rows.start, rows.end
    );
    if let Err(e) = table.delete(&predicate).await {
        warn!(
            "Failed to remove rows {}..{} after aborted insert: {}",
            rows.start, rows.end, e
        );
    }
}
