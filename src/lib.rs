//! bike-vss: vector similarity search over a bike catalog.
//!
//! Loads a JSON bike catalog into a document store, embeds each
//! description with a local sentence-embedding model, builds a hybrid
//! text+vector index and answers KNN queries against it.
//!
//! The store client and the embedding provider are built once by the
//! caller and handed to [`Seeder`] and [`Searcher`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod search;
pub mod seed;
pub mod store;

pub use catalog::{CatalogRecord, CatalogSource, HttpCatalogClient};
pub use config::{AppConfig, SortDirection, StoreBackend};
pub use error::{Error, Result};
pub use search::{
    EmbeddingModelKind, EmbeddingProvider, FastEmbedProvider, KnnQuery, QueryReport, SearchHit,
    Searcher,
};
pub use seed::{SeedOptions, SeedOutcome, SeedPhase, SeedReport, Seeder};
pub use store::{DocumentStore, IndexDefinition, IndexStats, MemoryStore, RedisStore, WriteOp};
