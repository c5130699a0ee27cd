//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bike_vss::catalog::parse_catalog;
use bike_vss::{
    AppConfig, CatalogRecord, CatalogSource, DocumentStore, EmbeddingProvider, Error, IndexStats,
    KnnQuery, MemoryStore, Result, SearchHit, Searcher, Seeder, WriteOp,
};
use serde_json::Value as JsonValue;

pub const BIKES_JSON: &str = include_str!("../fixtures/bikes.json");

pub fn fixture_records() -> Vec<CatalogRecord> {
    parse_catalog(BIKES_JSON).expect("fixture parses")
}

/// Default configuration; the memory store needs no connection settings.
pub fn test_config() -> AppConfig {
    AppConfig::default()
}

/// Deterministic bag-of-words embedder: each token is hashed into a bucket
/// and the result is L2-normalized.
pub struct KeywordEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_batch` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dim as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let token = token.trim_end_matches('s');
            vector[self.bucket(token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

/// Provider that claims one dimension but produces another.
pub struct LyingEmbedder {
    pub claimed: usize,
    pub produced: usize,
}

impl EmbeddingProvider for LyingEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.1; self.produced]).collect())
    }

    fn dimension(&self) -> usize {
        self.claimed
    }

    fn model_name(&self) -> &str {
        "lying-test"
    }
}

/// In-memory catalog source that counts fetches.
pub struct StaticCatalog {
    records: Vec<CatalogRecord>,
    fetches: AtomicUsize,
    fail: bool,
}

impl StaticCatalog {
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self {
            records,
            fetches: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A source whose every fetch fails with a transport error.
    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            fetches: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Transport("connection refused".into()));
        }
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Memory store whose `fail_on`-th pipeline (1-based) is rejected.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    fail_on: usize,
    pipelines: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            pipelines: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<JsonValue>> {
        self.inner.get_field(key, field).await
    }

    async fn get_fields(&self, keys: &[String], field: &str) -> Result<Vec<Option<JsonValue>>> {
        self.inner.get_fields(keys, field).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_keys(prefix).await
    }

    async fn execute(&self, ops: Vec<WriteOp>) -> Result<()> {
        let n = self.pipelines.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(Error::StoreWrite(format!("pipeline {} rejected", n)));
        }
        self.inner.execute(ops).await
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        self.inner.index_exists(name).await
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        self.inner.drop_index(name).await
    }

    async fn index_stats(&self, name: &str) -> Result<IndexStats> {
        self.inner.index_stats(name).await
    }

    async fn search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>> {
        self.inner.search(index, query).await
    }
}

/// Everything a workflow test needs, wired the way `main` wires it.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<StaticCatalog>,
    pub provider: Arc<KeywordEmbedder>,
    pub config: AppConfig,
}

impl Harness {
    pub fn new() -> Self {
        let config = test_config();
        Self {
            store: Arc::new(MemoryStore::new()),
            source: Arc::new(StaticCatalog::new(fixture_records())),
            provider: Arc::new(KeywordEmbedder::new(config.embedding.dimension)),
            config,
        }
    }

    pub fn seeder(&self) -> Seeder {
        Seeder::new(
            self.store.clone(),
            self.source.clone(),
            self.provider.clone(),
            self.config.clone(),
        )
        .expect("seeder")
    }

    pub fn searcher(&self) -> Searcher {
        Searcher::new(self.store.clone(), self.provider.clone(), self.config.clone())
            .expect("searcher")
    }
}
