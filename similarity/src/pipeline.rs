//! The similarity run: partition, enumerate group pairs, compute, write.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::SimilarityConfig;
use crate::error::{Result, SimilarityError};
use crate::group::{Group, partition};
use crate::matrix::{ScoreMatrix, self_similarity_matrix, similarity_matrix};
use crate::progress::{GroupPair, RunFingerprint};
use crate::store::SimilarityStore;
use crate::writer::DeduplicatingWriter;

/// Every group pair `(i, j)` with `0 <= i <= j < groups`, each exactly once.
pub fn group_pairs(groups: usize) -> impl Iterator<Item = GroupPair> {
    (0..groups).flat_map(move |i| (i..groups).map(move |j| GroupPair::new(i, j)))
}

/// Statistics about a similarity run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Documents read from the store.
    pub documents: usize,

    /// Groups the documents were split into.
    pub groups: usize,

    /// Group pairs computed and written in this run.
    pub group_pairs: usize,

    /// Group pairs skipped because an earlier run completed them.
    pub group_pairs_skipped: usize,

    /// Similarity entries written.
    pub entries_written: usize,

    /// Commits issued.
    pub commits: usize,

    /// Store operations retried after transient failures.
    pub retries: usize,

    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

fn compute_scores(groups: &[Group], pair: GroupPair) -> Result<ScoreMatrix> {
    let row = groups[pair.row].embeddings();
    if pair.is_same_group() {
        Ok(self_similarity_matrix(row))
    } else {
        similarity_matrix(row, groups[pair.col].embeddings())
    }
}

/// Computes and persists all pairwise similarities of a store's documents.
pub struct SimilarityPipeline {
    config: SimilarityConfig,
}

impl SimilarityPipeline {
    /// Create a pipeline with the given configuration.
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Run over every document in `store`, writing results back into it.
    ///
    /// Any failure aborts the run. Entries committed before the failure stay
    /// in the store; with `resume` enabled, completed group pairs are skipped
    /// by the next run.
    pub async fn run<S: SimilarityStore + ?Sized>(&self, store: &mut S) -> Result<RunStats> {
        let started = Instant::now();
        self.config.validate()?;

        info!(
            "Starting similarity run on {} store (group size {}, commit {}, {} in flight)",
            store.name(),
            self.config.group_size,
            self.config.commit,
            self.config.max_in_flight
        );

        let documents = store
            .fetch_all_documents()
            .await
            .map_err(|e| SimilarityError::persistence("fetching documents", e))?;
        let groups = Arc::new(partition(&documents, self.config.group_size)?);
        let fingerprint = self
            .config
            .resume
            .then(|| RunFingerprint::compute(&documents, self.config.group_size));

        let mut stats = RunStats {
            documents: documents.len(),
            groups: groups.len(),
            ..RunStats::default()
        };
        drop(documents);

        let completed = match &fingerprint {
            Some(fingerprint) => store
                .completed_group_pairs(fingerprint)
                .await
                .map_err(|e| SimilarityError::persistence("reading run progress", e))?,
            None => HashSet::new(),
        };

        let mut pending = Vec::new();
        for pair in group_pairs(groups.len()) {
            if completed.contains(&pair) {
                stats.group_pairs_skipped += 1;
            } else {
                pending.push(pair);
            }
        }
        if stats.group_pairs_skipped > 0 {
            info!(
                "Resuming: {} group pairs already complete, {} remaining",
                stats.group_pairs_skipped,
                pending.len()
            );
        }

        let mut writer = DeduplicatingWriter::new(store, &self.config);
        let mut computed = stream::iter(pending)
            .map(|pair| {
                let groups = Arc::clone(&groups);
                async move {
                    let scores = tokio::task::spawn_blocking(move || compute_scores(&groups, pair))
                        .await
                        .map_err(|e| SimilarityError::Task(format!("group pair {pair}: {e}")))??;
                    Ok::<_, SimilarityError>((pair, scores))
                }
            })
            .buffered(self.config.max_in_flight);

        let outcome: Result<()> = async {
            while let Some(result) = computed.next().await {
                let (pair, scores) = result?;
                let row = &groups[pair.row];
                let col = &groups[pair.col];

                let written = writer
                    .write_matrix(
                        &scores,
                        row.document_ids(),
                        col.document_ids(),
                        pair.is_same_group(),
                    )
                    .await
                    .inspect_err(|err| error!("Aborting at group pair {pair}: {err}"))?;
                writer
                    .finish_group_pair(fingerprint.as_ref(), pair)
                    .await
                    .inspect_err(|err| error!("Aborting at group pair {pair}: {err}"))?;

                stats.group_pairs += 1;
                info!("Group pair {pair}: wrote {written} entries");
            }
            writer.commit().await
        }
        .await;

        if let Err(err) = outcome {
            // Nothing from the failed run survives past its last commit.
            if let Err(rollback_err) = writer.rollback().await {
                error!("Rollback after failed run also failed: {rollback_err}");
            }
            return Err(err);
        }

        stats.entries_written = writer.entries_written();
        stats.commits = writer.commits();
        stats.retries = writer.retries();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "Similarity run finished: {} entries over {} group pairs in {}ms",
            stats.entries_written, stats.group_pairs, stats.elapsed_ms
        );
        Ok(stats)
    }
}
