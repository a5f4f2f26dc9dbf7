use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::embeddings::EmbeddingModel;

#[derive(Debug)]
struct StubModel {
    dimension: usize,
}

#[async_trait]
impl EmbeddingModel for StubModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimension])
    }
}

#[derive(Default)]
struct CountingLoader {
    loads: AtomicUsize,
    fail_next: AtomicBool,
    delay: Duration,
}

impl CountingLoader {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for CountingLoader {
    async fn load(&self, _config: &ModelConfiguration) -> Result<ModelHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RagError::ModelLoad("weights missing".to_string()));
        }
        Ok(Arc::new(StubModel { dimension: 4 }))
    }
}

#[tokio::test]
async fn concurrent_requests_share_one_load() {
    let loader = CountingLoader::with_delay(Duration::from_millis(50));
    let cache = ModelCache::new(loader.clone());
    let config = ModelConfiguration::new("org/minilm");

    let requests = (0..8).map(|_| {
        let cache = cache.clone();
        let config = config.clone();
        tokio::spawn(async move { cache.model(&config).await })
    });
    let handles: Vec<ModelHandle> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(loader.loads(), 1);
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
}

#[tokio::test]
async fn cached_model_is_returned_without_reloading() {
    let loader = CountingLoader::with_delay(Duration::ZERO);
    let cache = ModelCache::new(loader.clone());
    let config = ModelConfiguration::new("org/minilm");

    assert!(!cache.is_cached(&config).await.unwrap());
    let first = cache.model(&config).await.unwrap();
    assert!(cache.is_cached(&config).await.unwrap());
    let second = cache.model(&config).await.unwrap();

    assert_eq!(loader.loads(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.dimension(), 4);
}

#[tokio::test]
async fn distinct_configurations_load_separately() {
    let loader = CountingLoader::with_delay(Duration::ZERO);
    let cache = ModelCache::new(loader.clone());

    let plain = ModelConfiguration::new("org/minilm");
    let background = plain.clone().with_background_session(true);
    let a = cache.model(&plain).await.unwrap();
    let b = cache.model(&background).await.unwrap();

    assert_eq!(loader.loads(), 2);
    assert!(!Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn failed_load_is_reported_to_every_waiter_and_not_cached() {
    let loader = CountingLoader::with_delay(Duration::from_millis(30));
    loader.fail_next.store(true, Ordering::SeqCst);
    let cache = ModelCache::new(loader.clone());
    let config = ModelConfiguration::new("org/minilm");

    let (first, second) = tokio::join!(cache.model(&config), cache.model(&config));
    assert!(matches!(first, Err(RagError::ModelLoad(ref m)) if m == "weights missing"));
    assert!(matches!(second, Err(RagError::ModelLoad(ref m)) if m == "weights missing"));
    assert_eq!(loader.loads(), 1);
    assert!(!cache.is_cached(&config).await.unwrap());

    cache.model(&config).await.unwrap();
    assert_eq!(loader.loads(), 2);
}

#[derive(Debug)]
struct MismatchedLoader;

#[async_trait]
impl ModelLoader for MismatchedLoader {
    async fn load(&self, _config: &ModelConfiguration) -> Result<ModelHandle> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Err(RagError::DimensionMismatch {
            expected: 384,
            actual: 768,
        })
    }
}

#[tokio::test]
async fn every_waiter_sees_the_loader_error_variant() {
    let cache = ModelCache::new(Arc::new(MismatchedLoader));
    let config = ModelConfiguration::new("org/mpnet");

    let (first, second, third) = tokio::join!(
        cache.model(&config),
        cache.model(&config),
        cache.model(&config)
    );
    for outcome in [first, second, third] {
        assert!(matches!(
            outcome,
            Err(RagError::DimensionMismatch {
                expected: 384,
                actual: 768
            })
        ));
    }
}

#[tokio::test]
async fn reset_forgets_models_and_cancels_loads() {
    let loader = CountingLoader::with_delay(Duration::from_millis(200));
    let cache = ModelCache::new(loader.clone());
    let config = ModelConfiguration::new("org/minilm");

    let pending = {
        let cache = cache.clone();
        let config = config.clone();
        tokio::spawn(async move { cache.model(&config).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.reset().await.unwrap();

    let cancelled = pending.await.unwrap();
    assert!(matches!(cancelled, Err(RagError::Cancelled(_))));
    assert!(!cache.is_cached(&config).await.unwrap());

    let fast = CountingLoader::with_delay(Duration::ZERO);
    let cache = ModelCache::new(fast.clone());
    cache.model(&config).await.unwrap();
    cache.reset().await.unwrap();
    assert!(!cache.is_cached(&config).await.unwrap());
    cache.model(&config).await.unwrap();
    assert_eq!(fast.loads(), 2);
}
