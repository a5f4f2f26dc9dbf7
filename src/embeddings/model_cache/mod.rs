//! Model-handle cache with request coalescing.
//!
//! A single actor task owns both the loaded models and the loads in flight.
//! Callers talk to it through [`ModelCache`], a cheap cloneable handle. While a
//! load for some configuration is running, further requests for the same key
//! wait on that load instead of starting another one. Failed loads are not
//! cached, so the next request retries.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, info, warn};

use super::{ModelConfiguration, ModelConfigurationKey, ModelHandle, ModelLoader};
use crate::{RagError, Result};

type LoadOutcome = (
    ModelConfigurationKey,
    u64,
    std::result::Result<Result<ModelHandle>, JoinError>,
);

enum Command {
    Get {
        config: ModelConfiguration,
        reply: oneshot::Sender<Result<ModelHandle>>,
    },
    IsCached {
        key: ModelConfigurationKey,
        reply: oneshot::Sender<bool>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

struct InFlight {
    waiters: Vec<oneshot::Sender<Result<ModelHandle>>>,
    abort: AbortHandle,
}

struct ModelCacheActor {
    loader: Arc<dyn ModelLoader>,
    receiver: mpsc::UnboundedReceiver<Command>,
    cache: HashMap<ModelConfigurationKey, ModelHandle>,
    in_flight: HashMap<ModelConfigurationKey, InFlight>,
    loads: FuturesUnordered<BoxFuture<'static, LoadOutcome>>,
    /// Bumped on reset so loads started before it are ignored
    generation: u64,
}

/// Handle to the model cache actor
#[derive(Clone, Debug)]
pub struct ModelCache {
    sender: mpsc::UnboundedSender<Command>,
}

impl ModelCache {
    /// Spawn the cache actor. Must be called inside a Tokio runtime.
    #[inline]
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = ModelCacheActor {
            loader,
            receiver,
            cache: HashMap::new(),
            in_flight: HashMap::new(),
            loads: FuturesUnordered::new(),
            generation: 0,
        };
        tokio::spawn(actor.run());
        Self { sender }
    }

    /// Return the model for `config`, loading it at most once
    #[inline]
    pub async fn model(&self, config: &ModelConfiguration) -> Result<ModelHandle> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Get {
            config: config.clone(),
            reply,
        })?;
        response
            .await
            .map_err(|_| RagError::Cancelled(format!("load of {} was cancelled", config.hub_repo_id)))?
    }

    #[inline]
    pub async fn is_cached(&self, config: &ModelConfiguration) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::IsCached {
            key: config.key(),
            reply,
        })?;
        response.await.map_err(|_| closed())
    }

    /// Cancel every in-flight load and forget every cached model
    #[inline]
    pub async fn reset(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reset { reply })?;
        response.await.map_err(|_| closed())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sender.send(command).map_err(|_| closed())
    }
}

fn closed() -> RagError {
    RagError::Cancelled("model cache is shut down".to_string())
}

impl ModelCacheActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some((key, generation, outcome)) = self.loads.next(), if !self.loads.is_empty() => {
                    self.finish_load(key, generation, outcome);
                }
            }
        }

        for (_, in_flight) in self.in_flight.drain() {
            in_flight.abort.abort();
        }
        debug!("Model cache actor stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Get { config, reply } => self.get(config, reply),
            Command::IsCached { key, reply } => {
                let _ = reply.send(self.cache.contains_key(&key));
            }
            Command::Reset { reply } => {
                self.reset();
                let _ = reply.send(());
            }
        }
    }

    fn get(&mut self, config: ModelConfiguration, reply: oneshot::Sender<Result<ModelHandle>>) {
        let key = config.key();

        if let Some(model) = self.cache.get(&key) {
            let _ = reply.send(Ok(Arc::clone(model)));
            return;
        }

        if let Some(in_flight) = self.in_flight.get_mut(&key) {
            debug!("Joining in-flight load of {}", key);
            in_flight.waiters.push(reply);
            return;
        }

        info!("Loading embedding model {}", key);
        let loader = Arc::clone(&self.loader);
        let handle = tokio::spawn(async move { loader.load(&config).await });
        let abort = handle.abort_handle();
        let generation = self.generation;
        let load_key = key.clone();
        self.loads
            .push(Box::pin(async move { (load_key, generation, handle.await) }));
        self.in_flight.insert(
            key,
            InFlight {
                waiters: vec![reply],
                abort,
            },
        );
    }

    fn finish_load(
        &mut self,
        key: ModelConfigurationKey,
        generation: u64,
        outcome: std::result::Result<Result<ModelHandle>, JoinError>,
    ) {
        if generation != self.generation {
            debug!("Ignoring load of {} started before reset", key);
            return;
        }
        let Some(in_flight) = self.in_flight.remove(&key) else {
            return;
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => Err(RagError::ModelLoad(format!("load task failed: {e}"))),
        };

        match outcome {
            Ok(model) => {
                info!(
                    "Loaded embedding model {} ({} dimensions)",
                    key,
                    model.dimension()
                );
                self.cache.insert(key, Arc::clone(&model));
                for waiter in in_flight.waiters {
                    let _ = waiter.send(Ok(Arc::clone(&model)));
                }
            }
            Err(e) => {
                warn!("Failed to load embedding model {}: {}", key, e);
                let mut waiters = in_flight.waiters;
                let last = waiters.pop();
                for waiter in waiters {
                    let _ = waiter.send(Err(e.replicate()));
                }
                if let Some(last) = last {
                    let _ = last.send(Err(e));
                }
            }
        }
    }

    fn reset(&mut self) {
        info!(
            "Resetting model cache ({} cached, {} loading)",
            self.cache.len(),
            self.in_flight.len()
        );
        for (_, in_flight) in self.in_flight.drain() {
            in_flight.abort.abort();
        }
        self.cache.clear();
        self.generation += 1;
    }
}
