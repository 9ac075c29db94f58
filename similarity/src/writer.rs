//! Writing score matrices as deduplicated similarity entries.
//!
//! A matrix computed between two different groups contributes every cell.
//! A matrix computed for a group against itself contributes only the cells
//! strictly above the diagonal: the diagonal holds self-pairs and the lower
//! triangle repeats the upper one.

use tracing::debug;

use crate::config::{CommitPolicy, RetryPolicy, SimilarityConfig, WriteMode};
use crate::document::{DocumentId, SimilarityEntry};
use crate::error::{Result, SimilarityError};
use crate::matrix::ScoreMatrix;
use crate::progress::{GroupPair, RunFingerprint};
use crate::retry::Backoff;
use crate::store::SimilarityStore;

/// Cells `(i, j)` of a `rows × cols` matrix that map to distinct unordered pairs.
pub fn deduplicated_cells(
    rows: usize,
    cols: usize,
    same_group: bool,
) -> impl Iterator<Item = (usize, usize)> {
    (0..rows).flat_map(move |i| {
        let start = if same_group { i + 1 } else { 0 };
        (start..cols).map(move |j| (i, j))
    })
}

fn check_shape(
    scores: &ScoreMatrix,
    row_ids: &[DocumentId],
    col_ids: &[DocumentId],
) -> Result<()> {
    if scores.rows() != row_ids.len() {
        return Err(SimilarityError::ShapeMismatch {
            axis: "rows",
            matrix: scores.rows(),
            ids: row_ids.len(),
        });
    }
    if scores.cols() != col_ids.len() {
        return Err(SimilarityError::ShapeMismatch {
            axis: "columns",
            matrix: scores.cols(),
            ids: col_ids.len(),
        });
    }
    Ok(())
}

/// The entries a matrix contributes, without writing them anywhere.
pub fn entries(
    scores: &ScoreMatrix,
    row_ids: &[DocumentId],
    col_ids: &[DocumentId],
    same_group: bool,
) -> Result<Vec<SimilarityEntry>> {
    check_shape(scores, row_ids, col_ids)?;
    Ok(deduplicated_cells(scores.rows(), scores.cols(), same_group)
        .map(|(i, j)| {
            SimilarityEntry::new(row_ids[i].clone(), col_ids[j].clone(), scores.get(i, j))
        })
        .collect())
}

/// Streams entries into a store, committing per the configured policy.
pub struct DeduplicatingWriter<'s, S: SimilarityStore + ?Sized> {
    store: &'s mut S,
    commit_policy: CommitPolicy,
    write_mode: WriteMode,
    retry: RetryPolicy,

    /// Entries inserted since the last commit.
    uncommitted: usize,

    /// Whether anything (entries or progress) awaits a commit.
    dirty: bool,

    entries_written: usize,
    commits: usize,
    retries: usize,
}

impl<'s, S: SimilarityStore + ?Sized> DeduplicatingWriter<'s, S> {
    /// Create a writer over `store`.
    pub fn new(store: &'s mut S, config: &SimilarityConfig) -> Self {
        Self {
            store,
            commit_policy: config.commit,
            write_mode: config.write_mode,
            retry: config.retry,
            uncommitted: 0,
            dirty: false,
            entries_written: 0,
            commits: 0,
            retries: 0,
        }
    }

    /// Write the entries of one score matrix.
    ///
    /// `row_ids` and `col_ids` must match the matrix shape; this is checked
    /// before anything is written. Returns the number of entries written.
    pub async fn write_matrix(
        &mut self,
        scores: &ScoreMatrix,
        row_ids: &[DocumentId],
        col_ids: &[DocumentId],
        same_group: bool,
    ) -> Result<usize> {
        check_shape(scores, row_ids, col_ids)?;

        let mut written = 0;
        for (i, j) in deduplicated_cells(scores.rows(), scores.cols(), same_group) {
            let entry =
                SimilarityEntry::new(row_ids[i].clone(), col_ids[j].clone(), scores.get(i, j));
            self.insert(&entry).await?;
            written += 1;
        }
        Ok(written)
    }

    async fn insert(&mut self, entry: &SimilarityEntry) -> Result<()> {
        let operation = || {
            format!(
                "inserting similarity ({}, {})",
                entry.document_id_a, entry.document_id_b
            )
        };
        let mut backoff = Backoff::new(self.retry);
        loop {
            let err = match self.store.insert_similarity(entry, self.write_mode).await {
                Ok(()) => break,
                Err(err) => err,
            };
            if !backoff.retry(&err, &operation()).await {
                return Err(SimilarityError::persistence(operation(), err));
            }
            self.retries += 1;
        }

        debug!(
            "Wrote similarity ({}, {}) = {}",
            entry.document_id_a, entry.document_id_b, entry.score
        );
        self.entries_written += 1;
        self.uncommitted += 1;
        self.dirty = true;

        match self.commit_policy {
            CommitPolicy::PerEntry => self.commit().await,
            CommitPolicy::EveryN { entries } if self.uncommitted >= entries => self.commit().await,
            _ => Ok(()),
        }
    }

    /// Mark a group pair as written.
    ///
    /// Records progress when a fingerprint is given, and commits under the
    /// per-group-pair policy.
    pub async fn finish_group_pair(
        &mut self,
        fingerprint: Option<&RunFingerprint>,
        pair: GroupPair,
    ) -> Result<()> {
        if let Some(fingerprint) = fingerprint {
            let operation = format!("recording group pair {pair}");
            let mut backoff = Backoff::new(self.retry);
            loop {
                let err = match self.store.record_group_pair(fingerprint, pair).await {
                    Ok(()) => break,
                    Err(err) => err,
                };
                if !backoff.retry(&err, &operation).await {
                    return Err(SimilarityError::persistence(operation, err));
                }
                self.retries += 1;
            }
            self.dirty = true;
        }

        if self.commit_policy == CommitPolicy::PerGroupPair {
            self.commit().await?;
        }
        Ok(())
    }

    /// Commit everything written so far.
    pub async fn commit(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let operation = format!("committing {} entries", self.uncommitted);
        let mut backoff = Backoff::new(self.retry);
        loop {
            let err = match self.store.commit().await {
                Ok(()) => break,
                Err(err) => err,
            };
            if !backoff.retry(&err, &operation).await {
                return Err(SimilarityError::persistence(operation, err));
            }
            self.retries += 1;
        }

        self.commits += 1;
        self.uncommitted = 0;
        self.dirty = false;
        Ok(())
    }

    /// Discard everything written since the last commit.
    pub async fn rollback(&mut self) -> Result<()> {
        let operation = format!("rolling back {} entries", self.uncommitted);
        self.store
            .rollback()
            .await
            .map_err(|e| SimilarityError::persistence(operation, e))?;

        self.entries_written -= self.uncommitted;
        self.uncommitted = 0;
        self.dirty = false;
        Ok(())
    }

    /// Entries written so far.
    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Commits issued so far.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Retries performed so far.
    pub fn retries(&self) -> usize {
        self.retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn ids(names: &[&str]) -> Vec<DocumentId> {
        names.iter().map(|n| DocumentId::from(*n)).collect()
    }

    fn square(n: usize) -> ScoreMatrix {
        let data = (0..n * n).map(|v| v as f32).collect();
        Matrix::from_flat(data, n, n).unwrap()
    }

    #[test]
    fn test_same_group_cells_are_strict_upper_triangle() {
        let cells: Vec<_> = deduplicated_cells(3, 3, true).collect();
        assert_eq!(cells, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_cross_group_cells_cover_everything() {
        let cells: Vec<_> = deduplicated_cells(2, 3, false).collect();
        assert_eq!(cells.len(), 6);
        assert!(cells.contains(&(1, 0)));
    }

    #[test]
    fn test_entries_use_row_and_column_ids() {
        let scores = square(3);
        let names = ids(&["a", "b", "c"]);
        let out = entries(&scores, &names, &names, true).unwrap();
        assert_eq!(
            out,
            vec![
                SimilarityEntry::new("a".into(), "b".into(), 1.0),
                SimilarityEntry::new("a".into(), "c".into(), 2.0),
                SimilarityEntry::new("b".into(), "c".into(), 5.0),
            ]
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let scores = square(2);
        let err = entries(&scores, &ids(&["a", "b", "c"]), &ids(&["a", "b"]), false).unwrap_err();
        assert!(matches!(
            err,
            SimilarityError::ShapeMismatch {
                axis: "rows",
                matrix: 2,
                ids: 3
            }
        ));

        let err = entries(&scores, &ids(&["a", "b"]), &ids(&["a"]), false).unwrap_err();
        assert!(matches!(err, SimilarityError::ShapeMismatch { axis: "columns", .. }));
    }

    #[tokio::test]
    async fn test_shape_mismatch_writes_nothing() {
        let mut store = MemoryStore::default();
        let config = SimilarityConfig::default();
        let mut writer = DeduplicatingWriter::new(&mut store, &config);

        let result = writer
            .write_matrix(&square(2), &ids(&["a"]), &ids(&["a", "b"]), false)
            .await;
        assert!(result.is_err());
        assert_eq!(writer.entries_written(), 0);
        assert_eq!(store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_per_entry_commits_each_write() {
        let mut store = MemoryStore::default();
        let config = SimilarityConfig::new().with_commit(CommitPolicy::PerEntry);
        let names = ids(&["a", "b", "c"]);

        let mut writer = DeduplicatingWriter::new(&mut store, &config);
        let written = writer.write_matrix(&square(3), &names, &names, true).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(writer.commits(), 3);

        assert_eq!(store.len(), 3);
        assert_eq!(store.commit_count(), 3);
    }

    #[tokio::test]
    async fn test_every_n_commits_in_batches() {
        let mut store = MemoryStore::default();
        let config = SimilarityConfig::new().with_commit(CommitPolicy::EveryN { entries: 2 });

        let mut writer = DeduplicatingWriter::new(&mut store, &config);
        writer
            .write_matrix(&square(3), &ids(&["a", "b", "c"]), &ids(&["x", "y", "z"]), false)
            .await
            .unwrap();
        assert_eq!(writer.commits(), 4);
        writer.commit().await.unwrap();
        assert_eq!(writer.commits(), 5);

        assert_eq!(store.len(), 9);
        assert_eq!(store.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_commit_without_writes_is_a_no_op() {
        let mut store = MemoryStore::default();
        let config = SimilarityConfig::default();
        let mut writer = DeduplicatingWriter::new(&mut store, &config);
        writer.commit().await.unwrap();
        assert_eq!(writer.commits(), 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_uncommitted_entries() {
        let mut store = MemoryStore::default();
        let config = SimilarityConfig::new().with_commit(CommitPolicy::EveryN { entries: 2 });
        let names = ids(&["a", "b", "c"]);

        let mut writer = DeduplicatingWriter::new(&mut store, &config);
        writer.write_matrix(&square(3), &names, &names, true).await.unwrap();
        assert_eq!(writer.commits(), 1);

        writer.rollback().await.unwrap();
        assert_eq!(writer.entries_written(), 2);
        writer.commit().await.unwrap();
        assert_eq!(writer.commits(), 1);

        assert_eq!(store.len(), 2);
        assert_eq!(store.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_transient_insert_failure_is_retried() {
        let mut store = MemoryStore::default().with_transient_insert_failures(2);
        let config = SimilarityConfig::new().with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        });

        let mut writer = DeduplicatingWriter::new(&mut store, &config);
        let names = ids(&["a", "b"]);
        writer.write_matrix(&square(2), &names, &names, true).await.unwrap();
        writer.commit().await.unwrap();
        assert_eq!(writer.retries(), 2);

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_names_pair() {
        let mut store = MemoryStore::default().with_rejection_after(1);
        let config = SimilarityConfig::default();
        let names = ids(&["a", "b", "c"]);

        let mut writer = DeduplicatingWriter::new(&mut store, &config);
        let err = writer
            .write_matrix(&square(3), &names, &names, true)
            .await
            .unwrap_err();
        match err {
            SimilarityError::PersistenceFailure { context, .. } => {
                assert_eq!(context, "inserting similarity (a, c)");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(writer.entries_written(), 1);
    }
}
