//! Integration tests for the similarity pipeline.
//!
//! These run the full partition, compute and write path against the
//! in-memory store.

use std::collections::{HashMap, HashSet};

use docsim_similarity::{
    CommitPolicy, DocumentId, DocumentVector, MemoryStore, RetryPolicy, SimilarityConfig,
    SimilarityEntry, SimilarityError, SimilarityPipeline, StoreError, WriteMode, dot_product,
};
use pretty_assertions::assert_eq;

fn doc(id: &str, vector: &[f32]) -> DocumentVector {
    DocumentVector::new(id, vector.to_vec())
}

/// Deterministic, non-trivial vectors.
fn corpus(n: usize, dimension: usize) -> Vec<DocumentVector> {
    (0..n)
        .map(|i| {
            let vector = (0..dimension)
                .map(|k| ((i * 7 + k * 3) % 11) as f32 / 10.0 - 0.5)
                .collect();
            DocumentVector::new(format!("doc-{i}"), vector)
        })
        .collect()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
    }
}

fn canonical(entry: &SimilarityEntry) -> (DocumentId, DocumentId) {
    let (a, b) = entry.canonical_pair();
    (a.clone(), b.clone())
}

#[tokio::test]
async fn test_single_group_scenario() {
    let documents = vec![
        doc("d1", &[1.0, 0.0]),
        doc("d2", &[0.0, 1.0]),
        doc("d3", &[1.0, 1.0]),
    ];
    let mut store = MemoryStore::new(documents);

    let stats = SimilarityPipeline::new(SimilarityConfig::default())
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(stats.groups, 1);
    assert_eq!(stats.group_pairs, 1);
    assert_eq!(
        store.entries(),
        vec![
            SimilarityEntry::new("d1".into(), "d2".into(), 0.0),
            SimilarityEntry::new("d1".into(), "d3".into(), 1.0),
            SimilarityEntry::new("d2".into(), "d3".into(), 1.0),
        ]
    );
}

#[tokio::test]
async fn test_two_groups_scenario() {
    let documents = vec![
        doc("d1", &[1.0, 0.0]),
        doc("d2", &[0.0, 1.0]),
        doc("d3", &[2.0, 1.0]),
        doc("d4", &[1.0, 3.0]),
    ];
    let mut store = MemoryStore::new(documents);
    let config = SimilarityConfig::new().with_group_size(2);

    let stats = SimilarityPipeline::new(config).run(&mut store).await.unwrap();

    assert_eq!(stats.groups, 2);
    assert_eq!(stats.group_pairs, 3);
    assert_eq!(stats.entries_written, 6);
    assert_eq!(stats.commits, 3);

    let scores: HashMap<(DocumentId, DocumentId), f32> = store
        .entries()
        .iter()
        .map(|e| ((e.document_id_a.clone(), e.document_id_b.clone()), e.score))
        .collect();
    let expected = [
        ("d1", "d2", 0.0),
        ("d1", "d3", 2.0),
        ("d1", "d4", 1.0),
        ("d2", "d3", 1.0),
        ("d2", "d4", 3.0),
        ("d3", "d4", 5.0),
    ];
    assert_eq!(scores.len(), expected.len());
    for (a, b, score) in expected {
        assert_eq!(scores[&(a.into(), b.into())], score, "pair ({a}, {b})");
    }
}

#[tokio::test]
async fn test_empty_document_set() {
    let mut store = MemoryStore::new(Vec::new());

    let stats = SimilarityPipeline::new(SimilarityConfig::default())
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(stats.groups, 0);
    assert_eq!(stats.entries_written, 0);
    assert_eq!(stats.commits, 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_dimension_mismatch_aborts_before_writing() {
    let documents = vec![
        doc("d1", &[1.0, 0.0]),
        doc("d2", &[0.0, 1.0]),
        doc("d3", &[1.0, 1.0, 1.0]),
    ];
    let mut store = MemoryStore::new(documents);
    let config = SimilarityConfig::new().with_group_size(1);

    let err = SimilarityPipeline::new(config)
        .run(&mut store)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SimilarityError::DimensionMismatch {
            expected: 2,
            actual: 3,
            ..
        }
    ));
    assert_eq!(store.insert_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_zero_group_size_is_rejected() {
    let mut store = MemoryStore::new(corpus(3, 2));
    let config = SimilarityConfig::new().with_group_size(0);

    let err = SimilarityPipeline::new(config)
        .run(&mut store)
        .await
        .unwrap_err();
    assert!(matches!(err, SimilarityError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn test_every_unordered_pair_written_once() {
    for n in [0, 1, 2, 5, 7, 10] {
        for group_size in [1, 2, 3, 4, 100] {
            let documents = corpus(n, 4);
            let vectors: HashMap<DocumentId, Vec<f32>> = documents
                .iter()
                .map(|d| (d.document_id.clone(), d.vector.clone()))
                .collect();

            let mut store = MemoryStore::new(documents.clone());
            let config = SimilarityConfig::new().with_group_size(group_size);
            let stats = SimilarityPipeline::new(config).run(&mut store).await.unwrap();

            let entries = store.entries();
            assert_eq!(entries.len(), n * n.saturating_sub(1) / 2, "n={n} g={group_size}");
            assert_eq!(stats.entries_written, entries.len());

            let mut seen = HashSet::new();
            for entry in &entries {
                assert_ne!(entry.document_id_a, entry.document_id_b, "self-pair written");
                assert!(seen.insert(canonical(entry)), "duplicate pair written");

                let expected = dot_product(
                    &vectors[&entry.document_id_a],
                    &vectors[&entry.document_id_b],
                )
                .unwrap();
                assert!((entry.score - expected).abs() < 1e-5);
            }

            for (i, a) in documents.iter().enumerate() {
                for b in &documents[i + 1..] {
                    let (x, y) = if a.document_id <= b.document_id {
                        (&a.document_id, &b.document_id)
                    } else {
                        (&b.document_id, &a.document_id)
                    };
                    assert!(seen.contains(&(x.clone(), y.clone())));
                }
            }
        }
    }
}

#[tokio::test]
async fn test_per_entry_commits_match_reference_behaviour() {
    let mut store = MemoryStore::new(corpus(5, 3));
    let config = SimilarityConfig::new()
        .with_group_size(2)
        .with_commit(CommitPolicy::PerEntry);

    let stats = SimilarityPipeline::new(config).run(&mut store).await.unwrap();

    assert_eq!(stats.entries_written, 10);
    assert_eq!(stats.commits, 10);
    assert_eq!(store.commit_count(), 10);
}

#[tokio::test]
async fn test_end_of_run_commits_once() {
    let mut store = MemoryStore::new(corpus(6, 3));
    let config = SimilarityConfig::new()
        .with_group_size(2)
        .with_commit(CommitPolicy::EndOfRun);

    let stats = SimilarityPipeline::new(config).run(&mut store).await.unwrap();

    assert_eq!(stats.commits, 1);
    assert_eq!(store.len(), 15);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mut store = MemoryStore::new(corpus(4, 2))
        .with_transient_insert_failures(2)
        .with_transient_commit_failures(1);
    let config = SimilarityConfig::new()
        .with_group_size(2)
        .with_retry(fast_retry());

    let stats = SimilarityPipeline::new(config).run(&mut store).await.unwrap();

    assert_eq!(stats.retries, 3);
    assert_eq!(store.len(), 6);
}

#[tokio::test]
async fn test_permanent_failure_aborts_remaining_pairs() {
    let mut store = MemoryStore::new(corpus(6, 2)).with_rejection_after(3);
    let config = SimilarityConfig::new()
        .with_group_size(2)
        .with_retry(fast_retry());

    let err = SimilarityPipeline::new(config)
        .run(&mut store)
        .await
        .unwrap_err();

    match err {
        SimilarityError::PersistenceFailure { context, source } => {
            assert!(context.starts_with("inserting similarity ("), "{context}");
            assert!(matches!(source, StoreError::Rejected(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.insert_count(), 3);
    // Group pair (0, 0) was committed, the half-written (0, 1) rolled back.
    assert_eq!(store.len(), 1);
    assert_eq!(store.pending_len(), 0);
}

#[tokio::test]
async fn test_resume_skips_completed_group_pairs() {
    let documents = corpus(6, 3);
    let config = SimilarityConfig::new()
        .with_group_size(2)
        .with_resume(true)
        .with_retry(fast_retry());
    let pipeline = SimilarityPipeline::new(config);

    // Pairs (0, 0) and (0, 1) complete, then (0, 2) fails on its second insert.
    let mut store = MemoryStore::new(documents).with_rejection_after(6);
    assert!(pipeline.run(&mut store).await.is_err());
    assert_eq!(store.len(), 5);
    assert_eq!(store.pending_len(), 0);

    store.clear_rejection();

    let stats = pipeline.run(&mut store).await.unwrap();
    assert_eq!(stats.group_pairs_skipped, 2);
    assert_eq!(stats.group_pairs, 4);
    assert_eq!(stats.entries_written, 10);
    assert_eq!(store.len(), 15);

    // Everything is recorded now, so a third run has nothing to do.
    let stats = pipeline.run(&mut store).await.unwrap();
    assert_eq!(stats.group_pairs_skipped, 6);
    assert_eq!(stats.entries_written, 0);
}

#[tokio::test]
async fn test_append_rerun_fails_loudly() {
    let mut store = MemoryStore::new(corpus(4, 2));
    let pipeline = SimilarityPipeline::new(SimilarityConfig::new().with_group_size(2));

    pipeline.run(&mut store).await.unwrap();
    let err = pipeline.run(&mut store).await.unwrap_err();

    assert!(matches!(
        err,
        SimilarityError::PersistenceFailure {
            source: StoreError::Duplicate { .. },
            ..
        }
    ));
    assert_eq!(store.len(), 6);
}

#[tokio::test]
async fn test_upsert_rerun_is_idempotent() {
    let mut store = MemoryStore::new(corpus(5, 2));
    let config = SimilarityConfig::new()
        .with_group_size(2)
        .with_write_mode(WriteMode::Upsert);
    let pipeline = SimilarityPipeline::new(config);

    pipeline.run(&mut store).await.unwrap();
    let first = store.entries();
    pipeline.run(&mut store).await.unwrap();

    assert_eq!(store.entries(), first);
    assert_eq!(store.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_computation_matches_sequential() {
    let documents = corpus(23, 8);

    let mut sequential = MemoryStore::new(documents.clone());
    SimilarityPipeline::new(SimilarityConfig::new().with_group_size(4))
        .run(&mut sequential)
        .await
        .unwrap();

    let mut concurrent = MemoryStore::new(documents);
    let stats = SimilarityPipeline::new(
        SimilarityConfig::new()
            .with_group_size(4)
            .with_max_in_flight(4),
    )
    .run(&mut concurrent)
    .await
    .unwrap();

    assert_eq!(stats.group_pairs, 21);
    assert_eq!(concurrent.entries(), sequential.entries());
    assert_eq!(concurrent.len(), 23 * 22 / 2);
}
