//! Progress bookkeeping for resumable runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::DocumentVector;

/// Indices of a row group and a column group, with `row <= col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupPair {
    pub row: usize,
    pub col: usize,
}

impl GroupPair {
    /// Create a new group pair.
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Whether both sides are the same group.
    pub fn is_same_group(&self) -> bool {
        self.row == self.col
    }
}

impl fmt::Display for GroupPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Identifies the grouping a run used.
///
/// Group indices only mean the same thing across runs when the group size
/// and the ordered document ids are the same, so both feed the hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunFingerprint(String);

impl RunFingerprint {
    /// Fingerprint a run over `documents` with `group_size`.
    pub fn compute(documents: &[DocumentVector], group_size: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((group_size as u64).to_le_bytes());
        hasher.update((documents.len() as u64).to_le_bytes());
        for doc in documents {
            let id = doc.document_id.as_str().as_bytes();
            hasher.update((id.len() as u64).to_le_bytes());
            hasher.update(id);
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Hex-encoded digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunFingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RunFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
