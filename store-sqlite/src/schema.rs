//! Table definitions.

/// Input embeddings. `position` fixes the order documents are grouped in.
pub const CREATE_DOCUMENT_EMBEDDINGS: &str = "
    CREATE TABLE IF NOT EXISTS document_embeddings (
        document_id TEXT PRIMARY KEY,
        position INTEGER NOT NULL,
        vector BLOB NOT NULL
    )";

pub const CREATE_SIMILARITIES: &str = "
    CREATE TABLE IF NOT EXISTS similarities (
        document_id_a TEXT NOT NULL,
        document_id_b TEXT NOT NULL,
        score REAL NOT NULL,
        CHECK (document_id_a <> document_id_b)
    )";

/// One row per unordered pair, whichever way round it was written.
pub const CREATE_SIMILARITIES_PAIR_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_similarities_pair ON similarities (
        min(document_id_a, document_id_b),
        max(document_id_a, document_id_b)
    )";

pub const CREATE_PROGRESS: &str = "
    CREATE TABLE IF NOT EXISTS similarity_progress (
        fingerprint TEXT NOT NULL,
        row_group INTEGER NOT NULL,
        col_group INTEGER NOT NULL,
        PRIMARY KEY (fingerprint, row_group, col_group)
    )";

pub const INSERT_DOCUMENT: &str = "
    INSERT INTO document_embeddings (document_id, position, vector)
    VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM document_embeddings), ?2)
    ON CONFLICT (document_id) DO UPDATE SET vector = excluded.vector";

pub const SELECT_DOCUMENTS: &str = "
    SELECT document_id, vector FROM document_embeddings ORDER BY position, document_id";

pub const INSERT_SIMILARITY: &str = "
    INSERT INTO similarities (document_id_a, document_id_b, score) VALUES (?1, ?2, ?3)";

pub const DELETE_SIMILARITY_PAIR: &str = "
    DELETE FROM similarities
    WHERE min(document_id_a, document_id_b) = min(?1, ?2)
      AND max(document_id_a, document_id_b) = max(?1, ?2)";

pub const SELECT_SIMILARITIES: &str = "
    SELECT document_id_a, document_id_b, score FROM similarities ORDER BY rowid";

pub const INSERT_PROGRESS: &str = "
    INSERT OR IGNORE INTO similarity_progress (fingerprint, row_group, col_group)
    VALUES (?1, ?2, ?3)";

pub const SELECT_PROGRESS: &str = "
    SELECT row_group, col_group FROM similarity_progress WHERE fingerprint = ?1";

/// Every statement needed to create the schema, in order.
pub const ALL: [&str; 4] = [
    CREATE_DOCUMENT_EMBEDDINGS,
    CREATE_SIMILARITIES,
    CREATE_SIMILARITIES_PAIR_INDEX,
    CREATE_PROGRESS,
];
