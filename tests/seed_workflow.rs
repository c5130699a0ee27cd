mod support;

use std::sync::Arc;

use bike_vss::search::{bytes_to_vector, vector_to_bytes};
use bike_vss::{
    DocumentStore, EmbeddingProvider, Error, MemoryStore, SeedOptions, SeedOutcome, SeedPhase,
    Seeder, WriteOp,
};
use serde_json::json;
use support::{fixture_records, FlakyStore, Harness, LyingEmbedder, StaticCatalog};

#[tokio::test]
async fn test_seed_writes_keys_in_catalog_order() {
    let harness = Harness::new();
    let report = harness.seeder().run(SeedOptions::default()).await.unwrap();

    assert_eq!(report.outcome, SeedOutcome::Seeded);
    assert_eq!(report.records, 11);
    assert_eq!(
        report.phases,
        vec![
            SeedPhase::Checking,
            SeedPhase::Fetching,
            SeedPhase::Writing,
            SeedPhase::Embedding,
            SeedPhase::Indexing,
            SeedPhase::Done,
        ]
    );

    for (i, record) in fixture_records().iter().enumerate() {
        let key = format!("bikes:{:03}", i + 1);
        let doc = harness.store.document(&key).await.expect("document exists");
        assert_eq!(doc["model"], record.model.as_str(), "key {}", key);
        assert_eq!(doc["brand"], record.brand.as_str());
        assert_eq!(doc["type"], record.kind.as_str());
        assert!(doc["specs"].is_object(), "extra fields are preserved");
    }

    let mut keys = harness.store.list_keys("bikes:").await.unwrap();
    keys.sort();
    assert_eq!(keys.len(), 11);
    assert_eq!(keys.first().map(String::as_str), Some("bikes:001"));
    assert_eq!(keys.last().map(String::as_str), Some("bikes:011"));
}

#[tokio::test]
async fn test_every_document_has_embedding_of_provider_dimension() {
    let harness = Harness::new();
    harness.seeder().run(SeedOptions::default()).await.unwrap();

    let keys = harness.store.list_keys("bikes:").await.unwrap();
    let embeddings = harness
        .store
        .get_fields(&keys, "description_embedding")
        .await
        .unwrap();
    for (key, embedding) in keys.iter().zip(embeddings) {
        let embedding = embedding.unwrap_or_else(|| panic!("{} has no embedding", key));
        assert_eq!(
            embedding.as_array().map(Vec::len),
            Some(harness.provider.dimension()),
            "{}",
            key
        );
    }

    let stats = harness.store.index_stats("idx:bikes_vss").await.unwrap();
    assert_eq!(stats.num_docs, 11);
    assert_eq!(stats.indexing_failures, 0);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let harness = Harness::new();
    let seeder = harness.seeder();

    let first = seeder.run(SeedOptions::default()).await.unwrap();
    let pipelines = harness.store.pipelines_executed().await;
    let docs = harness.store.list_keys("bikes:").await.unwrap().len();

    let second = seeder.run(SeedOptions::default()).await.unwrap();
    assert_eq!(first.outcome, SeedOutcome::Seeded);
    assert_eq!(second.outcome, SeedOutcome::AlreadySeeded);
    assert_eq!(second.phases, vec![SeedPhase::Checking, SeedPhase::Done]);
    assert_eq!(second.records, 0);
    assert_eq!(second.dimension, first.dimension);

    assert_eq!(harness.source.fetches(), 1);
    assert_eq!(harness.provider.calls(), 1);
    assert_eq!(harness.store.indexes_created().await, 1);
    assert_eq!(harness.store.pipelines_executed().await, pipelines);
    assert_eq!(harness.store.list_keys("bikes:").await.unwrap().len(), docs);
}

#[tokio::test]
async fn test_force_reseeds_and_replaces_existing_index() {
    let harness = Harness::new();
    let seeder = harness.seeder();
    seeder.run(SeedOptions::default()).await.unwrap();

    let report = seeder.run(SeedOptions { force: true }).await.unwrap();
    assert_eq!(report.outcome, SeedOutcome::Seeded);
    assert_eq!(harness.source.fetches(), 2);
    assert_eq!(harness.store.indexes_created().await, 2);
    assert!(harness.store.index_exists("idx:bikes_vss").await.unwrap());
}

#[tokio::test]
async fn test_missing_index_does_not_fail_indexing() {
    let harness = Harness::new();
    assert!(!harness.store.index_exists("idx:bikes_vss").await.unwrap());

    let report = harness.seeder().run(SeedOptions::default()).await;
    assert!(report.is_ok(), "indexing on an empty store: {:?}", report);
    assert!(harness.store.index_exists("idx:bikes_vss").await.unwrap());
}

#[tokio::test]
async fn test_stale_dimension_triggers_reseed() {
    let harness = Harness::new();
    harness
        .store
        .execute(vec![WriteOp::PutDocument {
            key: "bikes:011".into(),
            document: json!({
                "description": "old",
                "description_embedding": vec![0.0f32; 768],
            }),
        }])
        .await
        .unwrap();

    let seeder = harness.seeder();
    assert!(!seeder.is_seeded().await.unwrap());
    let report = seeder.run(SeedOptions::default()).await.unwrap();
    assert_eq!(report.outcome, SeedOutcome::Seeded);
    assert!(seeder.is_seeded().await.unwrap());
}

#[tokio::test]
async fn test_stored_vectors_round_trip_through_bytes() {
    let harness = Harness::new();
    harness.seeder().run(SeedOptions::default()).await.unwrap();

    let records = fixture_records();
    let expected = harness
        .provider
        .embed(&records[2].description)
        .unwrap();
    let stored = harness
        .store
        .get_field("bikes:003", "description_embedding")
        .await
        .unwrap()
        .unwrap();
    let stored: Vec<f32> = serde_json::from_value(stored).unwrap();

    let decoded = bytes_to_vector(&vector_to_bytes(&stored)).unwrap();
    assert_eq!(decoded.len(), expected.len());
    for (a, b) in decoded.iter().zip(&expected) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_fetch_failure_aborts_before_writing() {
    let harness = Harness::new();
    let source = Arc::new(StaticCatalog::failing());
    let seeder = Seeder::new(
        harness.store.clone(),
        source.clone(),
        harness.provider.clone(),
        harness.config.clone(),
    )
    .unwrap();

    let err = seeder.run(SeedOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(source.fetches(), 1);
    assert!(harness.store.list_keys("bikes:").await.unwrap().is_empty());
    assert_eq!(harness.provider.calls(), 0);
}

#[tokio::test]
async fn test_provider_dimension_is_checked_at_construction() {
    let harness = Harness::new();
    let provider = Arc::new(LyingEmbedder {
        claimed: 768,
        produced: 768,
    });
    let result = Seeder::new(
        harness.store.clone(),
        harness.source.clone(),
        provider,
        harness.config.clone(),
    );
    assert!(matches!(
        result,
        Err(Error::DimensionMismatch {
            expected: 384,
            actual: 768
        })
    ));
}

#[tokio::test]
async fn test_wrong_vector_length_fails_before_indexing() {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness::new();
    let provider = Arc::new(LyingEmbedder {
        claimed: 384,
        produced: 12,
    });
    let seeder = Seeder::new(
        store.clone(),
        harness.source.clone(),
        provider,
        harness.config.clone(),
    )
    .unwrap();

    let err = seeder.run(SeedOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 384,
            actual: 12
        }
    ));
    // Documents from the write phase stay; nothing is rolled back.
    assert_eq!(store.list_keys("bikes:").await.unwrap().len(), 11);
    assert!(!store.index_exists("idx:bikes_vss").await.unwrap());
}

#[tokio::test]
async fn test_short_catalog_is_rejected_before_writing() {
    let harness = Harness::new();
    let source = Arc::new(StaticCatalog::new(fixture_records()[..5].to_vec()));
    let seeder = Seeder::new(
        harness.store.clone(),
        source.clone(),
        harness.provider.clone(),
        harness.config.clone(),
    )
    .unwrap();

    let err = seeder.run(SeedOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Format(_)), "{:?}", err);
    assert!(err.to_string().contains("expected_records"));
    assert!(harness.store.list_keys("bikes:").await.unwrap().is_empty());
    assert_eq!(harness.provider.calls(), 0);
    assert!(!harness.store.index_exists("idx:bikes_vss").await.unwrap());
}

#[tokio::test]
async fn test_smaller_catalog_is_idempotent_when_configured() {
    let harness = Harness::new();
    let mut config = harness.config.clone();
    config.catalog.expected_records = 5;
    let source = Arc::new(StaticCatalog::new(fixture_records()[..5].to_vec()));
    let seeder = Seeder::new(
        harness.store.clone(),
        source.clone(),
        harness.provider.clone(),
        config,
    )
    .unwrap();

    let first = seeder.run(SeedOptions::default()).await.unwrap();
    let second = seeder.run(SeedOptions::default()).await.unwrap();
    assert_eq!(first.outcome, SeedOutcome::Seeded);
    assert_eq!(second.outcome, SeedOutcome::AlreadySeeded);
    assert_eq!(source.fetches(), 1);
    assert_eq!(harness.provider.calls(), 1);
    assert_eq!(harness.store.indexes_created().await, 1);
}

#[tokio::test]
async fn test_document_write_failure_aborts_run() {
    let harness = Harness::new();
    let store = Arc::new(FlakyStore::new(harness.store.clone(), 1));
    let seeder = Seeder::new(
        store,
        harness.source.clone(),
        harness.provider.clone(),
        harness.config.clone(),
    )
    .unwrap();

    let err = seeder.run(SeedOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::StoreWrite(_)), "{:?}", err);
    assert!(harness.store.list_keys("bikes:").await.unwrap().is_empty());
    assert_eq!(harness.provider.calls(), 0);
    assert!(!harness.store.index_exists("idx:bikes_vss").await.unwrap());
}

#[tokio::test]
async fn test_embedding_write_failure_keeps_documents_and_skips_index() {
    let harness = Harness::new();
    let store = Arc::new(FlakyStore::new(harness.store.clone(), 2));
    let seeder = Seeder::new(
        store,
        harness.source.clone(),
        harness.provider.clone(),
        harness.config.clone(),
    )
    .unwrap();

    let err = seeder.run(SeedOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::StoreWrite(_)), "{:?}", err);

    // Documents from the writing phase are not rolled back.
    let keys = harness.store.list_keys("bikes:").await.unwrap();
    assert_eq!(keys.len(), 11);
    let embeddings = harness
        .store
        .get_fields(&keys, "description_embedding")
        .await
        .unwrap();
    assert!(embeddings.iter().all(Option::is_none));
    assert_eq!(harness.provider.calls(), 1);
    assert!(!harness.store.index_exists("idx:bikes_vss").await.unwrap());
}
