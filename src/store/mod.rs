//! Document store abstraction.
//!
//! The store persists catalog documents as JSON and owns the search index.
//! Two backends implement the same contract:
//! - [`RedisStore`]: Redis with the JSON and Search modules
//! - [`MemoryStore`]: in-process, exact cosine KNN, used for demos and tests

mod memory;
mod redis;
pub mod schema;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use schema::{FieldKind, IndexDefinition, SchemaField};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::search::{KnnQuery, SearchHit};

/// A write queued into a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the whole document at `key`.
    PutDocument { key: String, document: JsonValue },
    /// Set one top-level field of an existing document.
    SetField {
        key: String,
        field: String,
        value: JsonValue,
    },
    /// Create a search index.
    CreateIndex(IndexDefinition),
}

impl WriteOp {
    pub fn key(&self) -> Option<&str> {
        match self {
            WriteOp::PutDocument { key, .. } | WriteOp::SetField { key, .. } => Some(key),
            WriteOp::CreateIndex(_) => None,
        }
    }
}

/// Index statistics reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    /// Documents currently in the index.
    pub num_docs: u64,
    /// Documents the store failed to index (e.g. wrong vector length).
    pub indexing_failures: u64,
}

/// Operations the workflows need from the document store.
///
/// Pipelined writes are applied in order; each write is idempotent under
/// key overwrite. A failure can leave earlier writes of the same pipeline
/// applied.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name, for logging.
    fn backend_name(&self) -> &'static str;

    /// Read one top-level field of a document. `None` if the document or
    /// the field is missing.
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<JsonValue>>;

    /// Read one field from many documents in a single round trip, in key order.
    async fn get_fields(&self, keys: &[String], field: &str) -> Result<Vec<Option<JsonValue>>>;

    /// Keys starting with `prefix`, in no particular order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Submit writes as one pipeline. Fails with `Error::StoreWrite`.
    async fn execute(&self, ops: Vec<WriteOp>) -> Result<()>;

    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Drop an index, keeping its documents. Fails with
    /// `Error::IndexAbsent` when there is no such index.
    async fn drop_index(&self, name: &str) -> Result<()>;

    async fn index_stats(&self, name: &str) -> Result<IndexStats>;

    /// Run a KNN query against an index.
    async fn search(&self, index: &str, query: &KnnQuery) -> Result<Vec<SearchHit>>;
}

/// Open the configured store.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.url()).await?;
            info!(host = %config.host, port = config.port, "Connected to Redis");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            info!("Using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
