//! Semantic search over the bike catalog.
//!
//! Provides vector-based similarity search using:
//! - FastEmbed for embedding generation (ONNX-based, lightweight)
//! - The document store's KNN search over a FLAT cosine vector field
//! - Optional text/tag pre-filters combined with vector ranking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────────┐
//! │   Query text    │────▶│ EmbeddingProvider │
//! │                 │     │    (FastEmbed)    │
//! └─────────────────┘     └─────────┬─────────┘
//!                                   │
//!                                   ▼
//!                           ┌──────────────┐
//!                           │  Vec<f32>    │
//!                           │  → LE bytes  │
//!                           └──────┬───────┘
//!                                  │
//!                                  ▼
//!              ┌───────────────────────────────────┐
//!              │ (filter)=>[KNN k @vector          │
//!              │   $query_vector AS vector_score]  │
//!              └─────────────────┬─────────────────┘
//!                                │
//!                                ▼
//!                        ┌──────────────┐
//!                        │  SearchHit   │
//!                        │  (ranked)    │
//!                        └──────────────┘
//! ```

mod embedding;
mod query;

pub use embedding::{
    bytes_to_vector, ensure_dimension, vector_to_bytes, EmbeddingModelKind, EmbeddingProvider,
    FastEmbedProvider,
};
pub use query::{KnnQuery, QueryReport, SearchHit, Searcher, QUERY_VECTOR_PARAM};
