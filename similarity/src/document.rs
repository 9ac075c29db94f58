//! Documents and the similarity entries computed between them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Embedding;

/// Opaque, stable identifier of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new document id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// A document and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVector {
    /// Document identifier.
    pub document_id: DocumentId,

    /// The embedding vector.
    pub vector: Embedding,
}

impl DocumentVector {
    /// Create a new document vector.
    pub fn new(document_id: impl Into<DocumentId>, vector: Embedding) -> Self {
        Self {
            document_id: document_id.into(),
            vector,
        }
    }

    /// Dimension of the embedding.
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A persisted similarity row.
///
/// `document_id_a` comes from the row group and `document_id_b` from the
/// column group; the order carries no meaning beyond that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEntry {
    pub document_id_a: DocumentId,
    pub document_id_b: DocumentId,
    pub score: f32,
}

impl SimilarityEntry {
    /// Create a new similarity entry.
    pub fn new(a: DocumentId, b: DocumentId, score: f32) -> Self {
        Self {
            document_id_a: a,
            document_id_b: b,
            score,
        }
    }

    /// The pair in canonical (sorted) order, used as the uniqueness key.
    pub fn canonical_pair(&self) -> (&DocumentId, &DocumentId) {
        if self.document_id_a <= self.document_id_b {
            (&self.document_id_a, &self.document_id_b)
        } else {
            (&self.document_id_b, &self.document_id_a)
        }
    }
}
