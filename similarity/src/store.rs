//! Persistence sinks for similarity entries.
//!
//! The pipeline talks to storage only through [`SimilarityStore`], passed
//! explicitly into each run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use crate::config::WriteMode;
use crate::document::{DocumentId, DocumentVector, SimilarityEntry};
use crate::error::{StoreError, StoreResult};
use crate::progress::{GroupPair, RunFingerprint};

/// Trait for stores that supply documents and accept similarity entries.
#[async_trait]
pub trait SimilarityStore: Send {
    /// Get the name of this store.
    fn name(&self) -> &str;

    /// Every document with its embedding, in a stable order.
    async fn fetch_all_documents(&mut self) -> StoreResult<Vec<DocumentVector>>;

    /// Insert one entry. Must fail rather than drop the entry.
    async fn insert_similarity(
        &mut self,
        entry: &SimilarityEntry,
        mode: WriteMode,
    ) -> StoreResult<()>;

    /// Make all prior inserts durable.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard every insert and progress record since the last commit.
    async fn rollback(&mut self) -> StoreResult<()>;

    /// Group pairs recorded as complete for this fingerprint.
    async fn completed_group_pairs(
        &mut self,
        _fingerprint: &RunFingerprint,
    ) -> StoreResult<HashSet<GroupPair>> {
        Ok(HashSet::new())
    }

    /// Record a group pair as complete. Durable with the next commit.
    async fn record_group_pair(
        &mut self,
        _fingerprint: &RunFingerprint,
        _pair: GroupPair,
    ) -> StoreResult<()> {
        Ok(())
    }
}

type PairKey = (DocumentId, DocumentId);

fn pair_key(entry: &SimilarityEntry) -> PairKey {
    let (a, b) = entry.canonical_pair();
    (a.clone(), b.clone())
}

/// In-memory store with transactional semantics.
///
/// Inserts stay pending until [`SimilarityStore::commit`]. Unordered pairs
/// are unique, like the canonical-pair index of the SQLite store. Failures
/// can be injected to exercise retry and abort paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Vec<DocumentVector>,

    /// Committed entries keyed by canonical pair.
    committed: BTreeMap<PairKey, SimilarityEntry>,

    /// Uncommitted entries in insertion order.
    pending: Vec<SimilarityEntry>,

    committed_progress: HashMap<RunFingerprint, BTreeSet<GroupPair>>,
    pending_progress: Vec<(RunFingerprint, GroupPair)>,

    inserts: usize,
    commits: usize,

    /// Next N inserts fail with a transient error.
    transient_insert_failures: u32,

    /// Next N commits fail with a transient error.
    transient_commit_failures: u32,

    /// Inserts fail permanently once this many have succeeded.
    reject_after: Option<usize>,
}

impl MemoryStore {
    /// Create a store holding `documents`.
    pub fn new(documents: Vec<DocumentVector>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    /// Fail the next `count` inserts with [`StoreError::Unavailable`].
    pub fn with_transient_insert_failures(mut self, count: u32) -> Self {
        self.transient_insert_failures = count;
        self
    }

    /// Fail the next `count` commits with [`StoreError::Unavailable`].
    pub fn with_transient_commit_failures(mut self, count: u32) -> Self {
        self.transient_commit_failures = count;
        self
    }

    /// Reject every insert after `count` successful ones.
    pub fn with_rejection_after(mut self, count: usize) -> Self {
        self.reject_after = Some(count);
        self
    }

    /// Stop injecting permanent failures.
    pub fn clear_rejection(&mut self) {
        self.reject_after = None;
    }

    /// Committed entries ordered by canonical pair.
    pub fn entries(&self) -> Vec<SimilarityEntry> {
        self.committed.values().cloned().collect()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    /// Whether nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Number of uncommitted entries.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Successful inserts so far.
    pub fn insert_count(&self) -> usize {
        self.inserts
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    fn pending_position(&self, key: &PairKey) -> Option<usize> {
        self.pending.iter().position(|e| &pair_key(e) == key)
    }
}

#[async_trait]
impl SimilarityStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_all_documents(&mut self) -> StoreResult<Vec<DocumentVector>> {
        Ok(self.documents.clone())
    }

    async fn insert_similarity(
        &mut self,
        entry: &SimilarityEntry,
        mode: WriteMode,
    ) -> StoreResult<()> {
        if self.transient_insert_failures > 0 {
            self.transient_insert_failures -= 1;
            return Err(StoreError::Unavailable("injected transient failure".to_string()));
        }
        if self.reject_after.is_some_and(|limit| self.inserts >= limit) {
            return Err(StoreError::Rejected("injected permanent failure".to_string()));
        }
        if entry.score.is_nan() {
            return Err(StoreError::Rejected(format!(
                "score for ({}, {}) is NaN",
                entry.document_id_a, entry.document_id_b
            )));
        }
        if entry.document_id_a == entry.document_id_b {
            return Err(StoreError::Rejected(format!(
                "self-pair for document {}",
                entry.document_id_a
            )));
        }

        let key = pair_key(entry);
        let pending_at = self.pending_position(&key);
        let exists = pending_at.is_some() || self.committed.contains_key(&key);

        match (mode, pending_at) {
            (WriteMode::Append, _) if exists => {
                return Err(StoreError::Duplicate {
                    a: entry.document_id_a.clone(),
                    b: entry.document_id_b.clone(),
                });
            }
            (WriteMode::Upsert, Some(idx)) => self.pending[idx] = entry.clone(),
            _ => self.pending.push(entry.clone()),
        }

        self.inserts += 1;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.transient_commit_failures > 0 {
            self.transient_commit_failures -= 1;
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let count = self.pending.len();
        for entry in self.pending.drain(..) {
            self.committed.insert(pair_key(&entry), entry);
        }
        for (fingerprint, pair) in self.pending_progress.drain(..) {
            self.committed_progress
                .entry(fingerprint)
                .or_default()
                .insert(pair);
        }

        self.commits += 1;
        debug!("Committed {count} entries to memory store");
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        debug!(
            "Rolled back {} uncommitted entries in memory store",
            self.pending.len()
        );
        self.pending.clear();
        self.pending_progress.clear();
        Ok(())
    }

    async fn completed_group_pairs(
        &mut self,
        fingerprint: &RunFingerprint,
    ) -> StoreResult<HashSet<GroupPair>> {
        Ok(self
            .committed_progress
            .get(fingerprint)
            .map(|pairs| pairs.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn record_group_pair(
        &mut self,
        fingerprint: &RunFingerprint,
        pair: GroupPair,
    ) -> StoreResult<()> {
        self.pending_progress.push((fingerprint.clone(), pair));
        Ok(())
    }
}
