//! Error types for the similarity pipeline.

use thiserror::Error;

use crate::DocumentId;

/// Result type alias for similarity operations.
pub type Result<T> = std::result::Result<T, SimilarityError>;

/// Result type alias for persistence sink operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while computing or persisting similarities.
#[derive(Error, Debug)]
pub enum SimilarityError {
    /// Configuration rejected before any computation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Embedding dimensionality differs from the rest of the document set.
    #[error("dimension mismatch at {location}: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        location: String,
    },

    /// An embedding holds NaN or an infinity.
    #[error("non-finite value in {location}")]
    NonFiniteValue { location: String },

    /// A score matrix disagrees with the id list it is paired with.
    #[error("shape mismatch: matrix has {matrix} {axis} but {ids} ids were given")]
    ShapeMismatch {
        axis: &'static str,
        matrix: usize,
        ids: usize,
    },

    /// The persistence sink rejected a read, write or commit.
    #[error("persistence failure while {context}: {source}")]
    PersistenceFailure {
        context: String,
        #[source]
        source: StoreError,
    },

    /// A blocking computation task did not complete.
    #[error("compute task failed: {0}")]
    Task(String),

    /// Failed to parse a configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimilarityError {
    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize, location: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected,
            actual,
            location: location.into(),
        }
    }

    /// Wrap a store error with the operation that was in flight.
    pub fn persistence(context: impl Into<String>, source: StoreError) -> Self {
        Self::PersistenceFailure {
            context: context.into(),
            source,
        }
    }
}

/// Errors reported by a persistence sink.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An entry for this unordered pair already exists.
    #[error("similarity entry for ({a}, {b}) already exists")]
    Duplicate { a: DocumentId, b: DocumentId },

    /// The store is temporarily unreachable or busy.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored vector could not be decoded.
    #[error("invalid vector for document {document_id}: {reason}")]
    InvalidVector {
        document_id: DocumentId,
        reason: String,
    },

    /// The store refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend abandoned the open transaction on its own, losing writes
    /// that were never committed.
    #[error("transaction rolled back, uncommitted writes were lost: {0}")]
    RolledBack(String),

    /// Backend database error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
