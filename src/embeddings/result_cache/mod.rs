//! LRU cache of embedding vectors keyed by model configuration and exact text.
//!
//! Like the model cache, the entries are owned by one actor task; the handle
//! only sends lookups and stores. The `compute` callback runs on the caller's
//! task so a slow model never blocks other cache users.


use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::ModelConfigurationKey;
use crate::{RagError, Result};

pub type TextDigest = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingCacheKey {
    pub model: ModelConfigurationKey,
    pub text_hash: TextDigest,
}

impl EmbeddingCacheKey {
    #[inline]
    pub fn new(model: &ModelConfigurationKey, text: &str) -> Self {
        Self {
            model: model.clone(),
            text_hash: digest(text),
        }
    }
}

/// SHA-256 of the UTF-8 bytes
#[inline]
pub fn digest(text: &str) -> TextDigest {
    Sha256::digest(text.as_bytes()).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub max_entries: i64,
}

enum Command {
    Lookup {
        keys: Vec<EmbeddingCacheKey>,
        reply: oneshot::Sender<Vec<Option<Vec<f32>>>>,
    },
    Store {
        entries: Vec<(EmbeddingCacheKey, Vec<f32>)>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

struct Entry {
    vector: Vec<f32>,
    last_used: u64,
}

struct Lru {
    max_entries: usize,
    entries: HashMap<EmbeddingCacheKey, Entry>,
    /// Recency index: use tick -> key, oldest first
    recency: BTreeMap<u64, EmbeddingCacheKey>,
    tick: u64,
    stats: CacheStats,
}

impl Lru {
    fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, key: &EmbeddingCacheKey) -> Option<Vec<f32>> {
        let tick = self.next_tick();
        let Some(entry) = self.entries.get_mut(key) else {
            self.stats.misses += 1;
            return None;
        };
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, key.clone());
        self.stats.hits += 1;
        Some(entry.vector.clone())
    }

    fn put(&mut self, key: EmbeddingCacheKey, vector: Vec<f32>) {
        let tick = self.next_tick();
        if let Some(previous) = self.entries.insert(
            key.clone(),
            Entry {
                vector,
                last_used: tick,
            },
        ) {
            self.recency.remove(&previous.last_used);
        }
        self.recency.insert(tick, key);

        while self.entries.len() > self.max_entries {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

async fn run(mut lru: Lru, mut receiver: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Lookup { keys, reply } => {
                let found = keys.iter().map(|key| lru.get(key)).collect();
                let _ = reply.send(found);
            }
            Command::Store { entries } => {
                for (key, vector) in entries {
                    lru.put(key, vector);
                }
            }
            Command::Stats { reply } => {
                let _ = reply.send(lru.stats());
            }
            Command::Clear { reply } => {
                lru.clear();
                let _ = reply.send(());
            }
        }
    }
    debug!("Embedding cache actor stopped");
}

/// Handle to the embedding result cache
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    max_entries: i64,
    sender: Option<mpsc::UnboundedSender<Command>>,
}

impl EmbeddingCache {
    /// A cache holding at most `max_entries` vectors. Zero or negative sizes
    /// give a pass-through cache that never stores anything.
    #[inline]
    pub fn new(max_entries: i64) -> Self {
        let sender = usize::try_from(max_entries)
            .ok()
            .filter(|&max| max > 0)
            .map(|max| {
                let (sender, receiver) = mpsc::unbounded_channel();
                tokio::spawn(run(Lru::new(max), receiver));
                sender
            });
        Self {
            max_entries,
            sender,
        }
    }

    #[inline]
    pub const fn is_pass_through(&self) -> bool {
        self.sender.is_none()
    }

    /// Embeddings for `texts`, in input order, computing only what is missing.
    ///
    /// `compute` is called at most once, with each missing text appearing once
    /// in first-seen order. It must return one vector per text it was given.
    pub async fn embeddings<F, Fut>(
        &self,
        texts: &[String],
        model: &ModelConfigurationKey,
        compute: F,
    ) -> Result<Vec<Vec<f32>>>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<Vec<f32>>>>,
    {
        let Some(sender) = &self.sender else {
            return checked(texts.len(), compute(texts.to_vec()).await?);
        };
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<EmbeddingCacheKey> = texts
            .iter()
            .map(|text| EmbeddingCacheKey::new(model, text))
            .collect();

        let (reply, response) = oneshot::channel();
        sender
            .send(Command::Lookup {
                keys: keys.clone(),
                reply,
            })
            .map_err(|_| closed())?;
        let mut found = response.await.map_err(|_| closed())?;

        let mut missing = Vec::new();
        let mut missing_slots: HashMap<TextDigest, usize> = HashMap::new();
        for ((text, key), slot) in texts.iter().zip(&keys).zip(&found) {
            if slot.is_none() && !missing_slots.contains_key(&key.text_hash) {
                missing_slots.insert(key.text_hash, missing.len());
                missing.push(text.clone());
            }
        }

        if !missing.is_empty() {
            debug!(
                "Embedding cache: {} of {} texts missing ({} unique)",
                found.iter().filter(|slot| slot.is_none()).count(),
                texts.len(),
                missing.len()
            );
            let computed = checked(missing.len(), compute(missing).await?)?;

            for (key, slot) in keys.iter().zip(found.iter_mut()) {
                if slot.is_none() {
                    *slot = missing_slots
                        .get(&key.text_hash)
                        .and_then(|&index| computed.get(index).cloned());
                }
            }

            let entries = missing_slots
                .into_iter()
                .filter_map(|(text_hash, index)| {
                    let vector = computed.get(index)?.clone();
                    let key = EmbeddingCacheKey {
                        model: model.clone(),
                        text_hash,
                    };
                    Some((key, vector))
                })
                .collect();
            sender
                .send(Command::Store { entries })
                .map_err(|_| closed())?;
        }

        found
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| RagError::Embedding("missing embedding after compute".to_string()))
            })
            .collect()
    }

    #[inline]
    pub async fn stats(&self) -> Result<CacheStats> {
        let Some(sender) = &self.sender else {
            return Ok(CacheStats {
                max_entries: self.max_entries,
                ..CacheStats::default()
            });
        };
        let (reply, response) = oneshot::channel();
        sender
            .send(Command::Stats { reply })
            .map_err(|_| closed())?;
        let stats = response.await.map_err(|_| closed())?;
        Ok(CacheStats {
            max_entries: self.max_entries,
            ..stats
        })
    }

    /// Drop every cached vector; hit/miss counters are kept
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Ok(());
        };
        let (reply, response) = oneshot::channel();
        sender
            .send(Command::Clear { reply })
            .map_err(|_| closed())?;
        response.await.map_err(|_| closed())
    }
}

fn checked(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(RagError::EmbeddingCountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    Ok(vectors)
}

fn closed() -> RagError {
    RagError::Cancelled("embedding cache is shut down".to_string())
}
