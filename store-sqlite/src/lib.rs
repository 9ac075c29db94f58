//! # SQLite Store
//!
//! SQLite-backed [`SimilarityStore`](docsim_similarity::SimilarityStore).
//!
//! Document embeddings are read from `document_embeddings` and similarity
//! entries are written to `similarities`. A unique index over the canonical
//! (sorted) document pair makes the one-entry-per-unordered-pair rule hold
//! at the database level, so an append-only rerun fails instead of silently
//! duplicating rows.

mod codec;
pub mod schema;
pub mod store;

pub use codec::{decode_vector, encode_vector};
pub use store::{SqliteStore, StoreCounts};
