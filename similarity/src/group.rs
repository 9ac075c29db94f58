//! Splitting the document set into fixed-size groups.

use tracing::debug;

use crate::document::{DocumentId, DocumentVector};
use crate::error::{Result, SimilarityError};
use crate::matrix::Matrix;

/// A contiguous slice of the document set.
///
/// Row `k` of `embeddings` is the vector of `document_ids[k]`.
#[derive(Debug, Clone)]
pub struct Group {
    embeddings: Matrix,
    document_ids: Vec<DocumentId>,
}

impl Group {
    /// Build a group from a slice of documents sharing one dimension.
    fn from_documents(documents: &[DocumentVector], dimension: usize) -> Result<Self> {
        let mut embeddings = Matrix::with_columns(dimension);
        let mut document_ids = Vec::with_capacity(documents.len());
        for doc in documents {
            embeddings.push_row(&doc.vector)?;
            document_ids.push(doc.document_id.clone());
        }
        Ok(Self {
            embeddings,
            document_ids,
        })
    }

    /// The stacked embeddings.
    pub fn embeddings(&self) -> &Matrix {
        &self.embeddings
    }

    /// Ids parallel to the embedding rows.
    pub fn document_ids(&self) -> &[DocumentId] {
        &self.document_ids
    }

    /// Number of documents in the group.
    pub fn len(&self) -> usize {
        self.document_ids.len()
    }

    /// Whether the group holds no documents.
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }
}

/// Split `documents` into groups of `group_size`, preserving order.
///
/// Every group is full except possibly the last one. Fails if `group_size`
/// is zero, if any vector's dimension differs from the first document's, or
/// if any vector holds NaN or an infinity.
pub fn partition(documents: &[DocumentVector], group_size: usize) -> Result<Vec<Group>> {
    if group_size == 0 {
        return Err(SimilarityError::InvalidConfiguration(
            "group size must be positive".to_string(),
        ));
    }

    let Some(first) = documents.first() else {
        return Ok(Vec::new());
    };

    let dimension = first.dimension();
    if let Some(bad) = documents.iter().find(|d| d.dimension() != dimension) {
        return Err(SimilarityError::dimension_mismatch(
            dimension,
            bad.dimension(),
            format!("document {}", bad.document_id),
        ));
    }

    if let Some(bad) = documents
        .iter()
        .find(|d| d.vector.iter().any(|v| !v.is_finite()))
    {
        return Err(SimilarityError::NonFiniteValue {
            location: format!("document {}", bad.document_id),
        });
    }

    let groups = documents
        .chunks(group_size)
        .map(|chunk| Group::from_documents(chunk, dimension))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "Partitioned {} documents into {} groups of up to {group_size}",
        documents.len(),
        groups.len()
    );
    Ok(groups)
}
