//! # Document Similarity
//!
//! This crate computes pairwise dot-product similarities between document
//! embeddings and streams them into a persistence sink.
//!
//! ## Features
//!
//! - **Blocking**: The document set is split into fixed-size groups so peak
//!   memory is bounded by the group size, not the document count
//! - **Deduplication**: Exactly one entry per unordered document pair, never
//!   a self-pair
//! - **Batched commits**: Commit per entry, every N entries, per group pair or
//!   once per run
//! - **Resumable runs**: Completed group pairs are recorded and skipped on rerun
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Similarity Pipeline                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  SimilarityStore ──► partition ──► Group pairs (i <= j)         │
//! │        ▲                                 │                      │
//! │        │                                 ▼                      │
//! │  DeduplicatingWriter ◄── ScoreMatrix ◄── similarity_matrix      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod group;
pub mod matrix;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod store;
pub mod writer;

pub use config::{CommitPolicy, RetryPolicy, SimilarityConfig, WriteMode};
pub use document::{DocumentId, DocumentVector, SimilarityEntry};
pub use error::{Result, SimilarityError, StoreError, StoreResult};
pub use group::{Group, partition};
pub use matrix::{
    Matrix, ScoreMatrix, dot_product, normalize, self_similarity_matrix, similarity_matrix,
};
pub use pipeline::{RunStats, SimilarityPipeline, group_pairs};
pub use progress::{GroupPair, RunFingerprint};
pub use store::{MemoryStore, SimilarityStore};
pub use writer::{DeduplicatingWriter, deduplicated_cells, entries};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Default number of documents per group.
pub const DEFAULT_GROUP_SIZE: usize = 1000;
