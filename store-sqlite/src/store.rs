//! SQLite implementation of the similarity store.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, ffi, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docsim_similarity::{
    DocumentId, DocumentVector, GroupPair, RunFingerprint, SimilarityEntry, SimilarityStore,
    StoreError, StoreResult, WriteMode,
};

use crate::codec::{decode_vector, encode_vector};
use crate::schema;

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn store_error(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StoreError::Unavailable(err.to_string())
        }
        Some(ErrorCode::ConstraintViolation) => StoreError::Rejected(err.to_string()),
        _ => StoreError::Database(err.to_string()),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Row counts of the store's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub documents: usize,
    pub similarities: usize,
    pub completed_group_pairs: usize,
}

/// Similarity store backed by a SQLite database.
///
/// Inserts open a transaction that stays open until
/// [`SimilarityStore::commit`]; dropping the store without committing rolls
/// the pending inserts back.
///
/// SQLite may abandon a transaction by itself (for example on `SQLITE_BUSY`
/// while spilling its cache). Once that happens with uncommitted writes, every
/// later write and the next commit fail with [`StoreError::RolledBack`] until
/// [`SimilarityStore::rollback`] acknowledges the loss.
pub struct SqliteStore {
    conn: Connection,

    /// Writes went into the current transaction and are not yet committed.
    pending_writes: bool,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(store_error)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(store_error)?;

        let store = Self {
            conn,
            pending_writes: false,
        };
        store.init_schema()?;
        info!("Opened similarity store at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        let store = Self {
            conn,
            pending_writes: false,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create the tables and indexes if they do not exist.
    pub fn init_schema(&self) -> StoreResult<()> {
        for statement in schema::ALL {
            self.conn.execute(statement, []).map_err(store_error)?;
        }
        Ok(())
    }

    /// How long statements wait on a locked database.
    pub fn set_busy_timeout(&self, timeout: Duration) -> StoreResult<()> {
        self.conn.busy_timeout(timeout).map_err(store_error)
    }

    /// Whether uncommitted writes were lost to a transaction SQLite ended.
    fn transaction_lost(&self) -> bool {
        self.pending_writes && self.conn.is_autocommit()
    }

    fn begin_if_needed(&self) -> StoreResult<()> {
        if self.transaction_lost() {
            return Err(StoreError::RolledBack(
                "transaction ended before commit".to_string(),
            ));
        }
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN").map_err(store_error)?;
        }
        Ok(())
    }

    /// Map a failed write, refusing to call it transient if the transaction
    /// holding earlier writes went down with it.
    fn write_error(&self, err: rusqlite::Error) -> StoreError {
        if self.transaction_lost() {
            StoreError::RolledBack(err.to_string())
        } else {
            store_error(err)
        }
    }

    /// Add documents, appended after the existing ones in grouping order.
    ///
    /// Re-adding an id replaces its vector but keeps its position.
    pub fn insert_documents(&mut self, documents: &[DocumentVector]) -> StoreResult<usize> {
        let tx = self.conn.transaction().map_err(store_error)?;
        {
            let mut stmt = tx.prepare(schema::INSERT_DOCUMENT).map_err(store_error)?;
            for doc in documents {
                stmt.execute(params![doc.document_id.as_str(), encode_vector(&doc.vector)])
                    .map_err(store_error)?;
            }
        }
        tx.commit().map_err(store_error)?;

        debug!("Inserted {} documents", documents.len());
        Ok(documents.len())
    }

    /// All stored similarity entries in insertion order.
    pub fn similarities(&self) -> StoreResult<Vec<SimilarityEntry>> {
        let mut stmt = self
            .conn
            .prepare(schema::SELECT_SIMILARITIES)
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], |row| {
                let a: String = row.get(0)?;
                let b: String = row.get(1)?;
                let score: f64 = row.get(2)?;
                Ok(SimilarityEntry::new(a.into(), b.into(), score as f32))
            })
            .map_err(store_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    /// Row counts of the documents, similarities and progress tables.
    pub fn counts(&self) -> StoreResult<StoreCounts> {
        let count = |table: &str| -> StoreResult<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(store_error)?;
            Ok(n as usize)
        };

        Ok(StoreCounts {
            documents: count("document_embeddings")?,
            similarities: count("similarities")?,
            completed_group_pairs: count("similarity_progress")?,
        })
    }
}

#[async_trait]
impl SimilarityStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_all_documents(&mut self) -> StoreResult<Vec<DocumentVector>> {
        let mut stmt = self
            .conn
            .prepare(schema::SELECT_DOCUMENTS)
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })
            .map_err(store_error)?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, bytes) = row.map_err(store_error)?;
            let document_id = DocumentId::from(id);
            let vector = decode_vector(&bytes).ok_or_else(|| StoreError::InvalidVector {
                document_id: document_id.clone(),
                reason: format!("blob of {} bytes is not a sequence of f32", bytes.len()),
            })?;
            documents.push(DocumentVector {
                document_id,
                vector,
            });
        }

        info!("Fetched {} documents", documents.len());
        Ok(documents)
    }

    async fn insert_similarity(
        &mut self,
        entry: &SimilarityEntry,
        mode: WriteMode,
    ) -> StoreResult<()> {
        self.begin_if_needed()?;

        let a = entry.document_id_a.as_str();
        let b = entry.document_id_b.as_str();
        if mode == WriteMode::Upsert {
            self.conn
                .execute(schema::DELETE_SIMILARITY_PAIR, params![a, b])
                .map_err(|err| self.write_error(err))?;
        }

        self.conn
            .execute(schema::INSERT_SIMILARITY, params![a, b, f64::from(entry.score)])
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate {
                        a: entry.document_id_a.clone(),
                        b: entry.document_id_b.clone(),
                    }
                } else {
                    self.write_error(err)
                }
            })?;
        self.pending_writes = true;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.transaction_lost() {
            return Err(StoreError::RolledBack(
                "transaction ended before commit".to_string(),
            ));
        }
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|err| self.write_error(err))?;
        }
        self.pending_writes = false;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK").map_err(store_error)?;
        }
        if self.pending_writes {
            warn!("Rolled back uncommitted similarity writes");
        }
        self.pending_writes = false;
        Ok(())
    }

    async fn completed_group_pairs(
        &mut self,
        fingerprint: &RunFingerprint,
    ) -> StoreResult<HashSet<GroupPair>> {
        let mut stmt = self
            .conn
            .prepare(schema::SELECT_PROGRESS)
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![fingerprint.as_str()], |row| {
                let row_group: i64 = row.get(0)?;
                let col_group: i64 = row.get(1)?;
                Ok(GroupPair::new(row_group as usize, col_group as usize))
            })
            .map_err(store_error)?;

        rows.collect::<Result<HashSet<_>, _>>().map_err(store_error)
    }

    async fn record_group_pair(
        &mut self,
        fingerprint: &RunFingerprint,
        pair: GroupPair,
    ) -> StoreResult<()> {
        self.begin_if_needed()?;
        self.conn
            .execute(
                schema::INSERT_PROGRESS,
                params![fingerprint.as_str(), pair.row as i64, pair.col as i64],
            )
            .map_err(|err| self.write_error(err))?;
        self.pending_writes = true;
        Ok(())
    }
}
