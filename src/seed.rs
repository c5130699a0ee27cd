//! Idempotent seed-and-index workflow.
//!
//! ```text
//! Checking ──(already seeded)──────────────────────────────▶ Done
//!    │
//!    ▼
//! Fetching ──▶ Writing ──▶ Embedding ──▶ Indexing ──▶ Done
//!    │            │            │            │
//!    └────────────┴────────────┴────────────┴──────────▶ Failed
//! ```
//!
//! Each store-facing phase submits a single pipeline. Nothing is retried
//! or rolled back.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::catalog::{document_key, CatalogRecord, CatalogSource};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::search::{ensure_dimension, EmbeddingProvider};
use crate::store::{DocumentStore, IndexDefinition, WriteOp};

/// Phases of a seeding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedPhase {
    Checking,
    Fetching,
    Writing,
    Embedding,
    Indexing,
    Done,
    Failed,
}

impl fmt::Display for SeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeedPhase::Checking => "checking",
            SeedPhase::Fetching => "fetching",
            SeedPhase::Writing => "writing",
            SeedPhase::Embedding => "embedding",
            SeedPhase::Indexing => "indexing",
            SeedPhase::Done => "done",
            SeedPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedOutcome {
    /// The store already held embedded documents; nothing was done.
    AlreadySeeded,
    /// Documents were written, embedded and indexed.
    Seeded,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub outcome: SeedOutcome,
    /// Documents written in this run (0 when skipped).
    pub records: usize,
    pub dimension: usize,
    /// Phases entered, in order, ending with `Done`.
    pub phases: Vec<SeedPhase>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeedOptions {
    /// Re-seed even if the store looks seeded.
    pub force: bool,
}

/// Whether the previous index was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDrop {
    Dropped,
    NotFound,
}

/// Drop an index, treating "no such index" as success.
pub async fn drop_index_if_present(store: &dyn DocumentStore, name: &str) -> Result<IndexDrop> {
    match store.drop_index(name).await {
        Ok(()) => Ok(IndexDrop::Dropped),
        Err(e) if e.is_index_absent() => {
            debug!(index = name, "No existing index to drop");
            Ok(IndexDrop::NotFound)
        }
        Err(e) => Err(e),
    }
}

/// Loads the catalog into the store, embeds descriptions and builds the index.
pub struct Seeder {
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn CatalogSource>,
    provider: Arc<dyn EmbeddingProvider>,
    config: AppConfig,
}

impl Seeder {
    /// Fails if the provider's dimension differs from the configured one.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        source: Arc<dyn CatalogSource>,
        provider: Arc<dyn EmbeddingProvider>,
        config: AppConfig,
    ) -> Result<Self> {
        ensure_dimension(provider.as_ref(), config.embedding.dimension)?;
        Ok(Self {
            store,
            source,
            provider,
            config,
        })
    }

    /// Run the workflow to completion.
    pub async fn run(&self, options: SeedOptions) -> Result<SeedReport> {
        let started = Instant::now();
        let mut phase = SeedPhase::Checking;
        let mut phases = vec![phase];
        let mut records: Vec<CatalogRecord> = Vec::new();
        let mut outcome = SeedOutcome::Seeded;

        while phase != SeedPhase::Done {
            info!(phase = %phase, "Seeding");
            let step = match phase {
                SeedPhase::Checking => {
                    if options.force {
                        info!("Forced re-seed requested");
                        Ok(SeedPhase::Fetching)
                    } else {
                        self.is_seeded().await.map(|seeded| {
                            if seeded {
                                outcome = SeedOutcome::AlreadySeeded;
                                SeedPhase::Done
                            } else {
                                SeedPhase::Fetching
                            }
                        })
                    }
                }
                SeedPhase::Fetching => match self.source.fetch_catalog().await {
                    Ok(fetched) => self.check_record_count(&fetched).map(|_| {
                        records = fetched;
                        SeedPhase::Writing
                    }),
                    Err(e) => Err(e),
                },
                SeedPhase::Writing => self
                    .write_records(&records)
                    .await
                    .map(|_| SeedPhase::Embedding),
                SeedPhase::Embedding => self.embed_descriptions().await.map(|_| SeedPhase::Indexing),
                SeedPhase::Indexing => self.rebuild_index().await.map(|_| SeedPhase::Done),
                SeedPhase::Done | SeedPhase::Failed => break,
            };
            match step {
                Ok(next) => {
                    phase = next;
                    phases.push(next);
                }
                Err(e) => {
                    error!(phase = %phase, next = %SeedPhase::Failed, "Seeding failed: {}", e);
                    return Err(e);
                }
            }
        }

        if outcome == SeedOutcome::AlreadySeeded {
            info!(
                key = %self.last_key(),
                "Store already seeded; skipping fetch, embedding and indexing"
            );
        } else {
            info!(
                records = records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Seeding complete"
            );
            self.log_index_stats().await;
        }

        Ok(SeedReport {
            outcome,
            records: records.len(),
            dimension: self.config.embedding.dimension,
            phases,
        })
    }

    /// Key of the last record the catalog is expected to produce.
    pub fn last_key(&self) -> String {
        document_key(
            &self.config.catalog.key_prefix,
            self.config.catalog.expected_records,
            self.config.catalog.key_width,
        )
    }

    /// True if the expected last record carries an embedding of the
    /// configured dimension.
    pub async fn is_seeded(&self) -> Result<bool> {
        let key = self.last_key();
        let embedding = self
            .store
            .get_field(&key, &self.config.embedding.field)
            .await?;
        let seeded = match embedding {
            Some(JsonValue::Array(values)) => {
                if values.len() == self.config.embedding.dimension {
                    true
                } else {
                    warn!(
                        key = %key,
                        stored = values.len(),
                        configured = self.config.embedding.dimension,
                        "Stored embedding has a different dimension; re-seeding"
                    );
                    false
                }
            }
            _ => false,
        };
        debug!(key = %key, seeded, "Checked seed state");
        Ok(seeded)
    }

    /// The seed check reads the record at `expected_records`, so the
    /// catalog must produce exactly that many.
    fn check_record_count(&self, records: &[CatalogRecord]) -> Result<()> {
        let expected = self.config.catalog.expected_records;
        if records.len() != expected {
            return Err(Error::Format(format!(
                "catalog has {} records, catalog.expected_records is {}",
                records.len(),
                expected
            )));
        }
        Ok(())
    }

    async fn write_records(&self, records: &[CatalogRecord]) -> Result<()> {
        let ops = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                Ok(WriteOp::PutDocument {
                    key: document_key(
                        &self.config.catalog.key_prefix,
                        i + 1,
                        self.config.catalog.key_width,
                    ),
                    document: record.to_document()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.store.execute(ops).await?;
        info!(records = records.len(), "Wrote catalog documents");
        Ok(())
    }

    async fn embed_descriptions(&self) -> Result<()> {
        let mut keys = self.store.list_keys(&self.config.catalog.key_prefix).await?;
        // Zero-padded keys sort numerically.
        keys.sort();

        let source_field = &self.config.embedding.source_field;
        let values = self.store.get_fields(&keys, source_field).await?;
        let texts = keys
            .iter()
            .zip(values)
            .map(|(key, value)| match value {
                Some(JsonValue::String(text)) => Ok(text),
                _ => Err(Error::Format(format!(
                    "{} has no text field '{}'",
                    key, source_field
                ))),
            })
            .collect::<Result<Vec<String>>>()?;

        let started = Instant::now();
        let provider = Arc::clone(&self.provider);
        let vectors = tokio::task::spawn_blocking(move || provider.embed_batch(&texts))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {}", e)))??;
        if vectors.len() != keys.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                keys.len(),
                vectors.len()
            )));
        }
        info!(
            documents = keys.len(),
            model = self.provider.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Embedded descriptions"
        );

        let expected = self.config.embedding.dimension;
        let ops = keys
            .into_iter()
            .zip(vectors)
            .map(|(key, vector)| {
                if vector.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                Ok(WriteOp::SetField {
                    key,
                    field: self.config.embedding.field.clone(),
                    value: serde_json::to_value(vector)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.store.execute(ops).await
    }

    async fn rebuild_index(&self) -> Result<()> {
        let definition = IndexDefinition::for_catalog(&self.config);
        definition.validate()?;
        let dropped = drop_index_if_present(self.store.as_ref(), &definition.name).await?;
        debug!(index = %definition.name, ?dropped, "Previous index");
        let name = definition.name.clone();
        self.store
            .execute(vec![WriteOp::CreateIndex(definition)])
            .await?;
        info!(index = %name, "Created search index");
        Ok(())
    }

    async fn log_index_stats(&self) {
        match self.store.index_stats(&self.config.index.name).await {
            Ok(stats) => {
                info!(
                    index = %stats.name,
                    num_docs = stats.num_docs,
                    indexing_failures = stats.indexing_failures,
                    "Index stats"
                );
                if stats.indexing_failures > 0 {
                    warn!(
                        failures = stats.indexing_failures,
                        "Some documents could not be indexed"
                    );
                }
            }
            Err(e) => warn!("Could not read index stats: {}", e),
        }
    }
}
