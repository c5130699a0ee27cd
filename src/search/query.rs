//! KNN query construction and the query workflow.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::embedding::{ensure_dimension, vector_to_bytes, EmbeddingProvider};
use crate::config::{AppConfig, SortDirection};
use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// Name of the bound parameter carrying the query vector.
pub const QUERY_VECTOR_PARAM: &str = "query_vector";

/// A filter-then-KNN query against the vector field.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnQuery {
    /// Pre-filter expression; `*` matches all documents.
    pub filter: String,
    pub k: usize,
    /// Alias of the indexed vector field.
    pub vector_alias: String,
    /// Name the distance is returned under.
    pub score_alias: String,
    pub return_fields: Vec<String>,
    pub sort: SortDirection,
    /// Query vector as little-endian `f32` bytes.
    pub vector: Vec<u8>,
}

impl KnnQuery {
    /// Query with the configured defaults and the given vector.
    pub fn from_config(config: &AppConfig, vector: &[f32]) -> Self {
        Self {
            filter: config.search.filter.clone(),
            k: config.search.k,
            vector_alias: config.index.vector_alias.clone(),
            score_alias: config.search.score_alias.clone(),
            return_fields: config.search.return_fields.clone(),
            sort: config.search.sort,
            vector: vector_to_bytes(vector),
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// The query expression, e.g.
    /// `(*)=>[KNN 3 @vector $query_vector AS vector_score]`.
    pub fn expression(&self) -> String {
        let filter = match self.filter.trim() {
            "" => "*",
            f => f,
        };
        format!(
            "({})=>[KNN {} @{} ${} AS {}]",
            filter, self.k, self.vector_alias, QUERY_VECTOR_PARAM, self.score_alias
        )
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document key.
    pub id: String,
    /// Cosine distance to the query vector (0 = identical direction).
    pub score: f32,
    /// Returned fields, stringified.
    pub fields: BTreeMap<String, String>,
}

impl SearchHit {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn brand(&self) -> Option<&str> {
        self.field("brand")
    }

    pub fn model(&self) -> Option<&str> {
        self.field("model")
    }

    pub fn description(&self) -> Option<&str> {
        self.field("description")
    }
}

/// Hits for one query of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReport {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

/// Encodes query text and runs KNN searches against the catalog index.
pub struct Searcher {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: AppConfig,
}

impl Searcher {
    /// Fails if the provider's dimension differs from the index dimension.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: AppConfig,
    ) -> Result<Self> {
        ensure_dimension(provider.as_ref(), config.embedding.dimension)?;
        Ok(Self {
            store,
            provider,
            config,
        })
    }

    /// Top `k` documents closest to `query_text`.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.search_filtered(query_text, &self.config.search.filter, k)
            .await
    }

    /// Top `k` documents closest to `query_text` among those matching `filter`.
    pub async fn search_filtered(
        &self,
        query_text: &str,
        filter: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(Error::Config("k must be at least 1".into()));
        }
        let started = Instant::now();
        let vector = self.encode(query_text).await?;
        let query = KnnQuery::from_config(&self.config, &vector)
            .with_k(k)
            .with_filter(filter);
        debug!(expression = %query.expression(), "Running KNN query");
        let hits = self.store.search(&self.config.index.name, &query).await?;
        debug!(
            query = query_text,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search complete"
        );
        Ok(hits)
    }

    /// Run every query with the configured `k`.
    pub async fn run_report(&self, queries: &[String]) -> Result<Vec<QueryReport>> {
        let mut reports = Vec::with_capacity(queries.len());
        for query in queries {
            let hits = self.search(query, self.config.search.k).await?;
            reports.push(QueryReport {
                query: query.clone(),
                hits,
            });
        }
        info!(queries = reports.len(), "Report complete");
        Ok(reports)
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let provider = Arc::clone(&self.provider);
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || provider.embed(&text))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {}", e)))??;
        if vector.len() != self.config.embedding.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.embedding.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
