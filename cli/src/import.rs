//! Reading documents from JSON Lines.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use docsim_similarity::{DocumentId, DocumentVector, Embedding, normalize};

/// Ids may be written as JSON strings or integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for DocumentId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(id) => DocumentId::from(id),
            RawId::Number(id) => DocumentId::from(id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Record {
    document_id: RawId,
    vector: Embedding,
}

/// Parse one `{"document_id": ..., "vector": [...]}` object per line.
///
/// Blank lines are skipped. Integer ids are stored in decimal text form, so
/// `7` and `"7"` name the same document; defining an id twice in one file is
/// an error, as is a vector value outside the `f32` range. With
/// `normalize_vectors`, every vector is scaled to unit length.
pub fn read_documents(
    reader: impl BufRead,
    normalize_vectors: bool,
) -> Result<Vec<DocumentVector>> {
    let mut documents = Vec::new();
    let mut seen: HashMap<DocumentId, usize> = HashMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let line_no = idx + 1;
        let record: Record =
            serde_json::from_str(&line).with_context(|| format!("line {line_no}"))?;
        let document_id = DocumentId::from(record.document_id);
        if let Some(first) = seen.insert(document_id.clone(), line_no) {
            bail!("line {line_no}: document id {document_id} already defined on line {first}");
        }
        if record.vector.iter().any(|v| !v.is_finite()) {
            bail!("line {line_no}: vector for {document_id} has a non-finite value");
        }

        let mut vector = record.vector;
        if normalize_vectors {
            normalize(&mut vector);
        }
        documents.push(DocumentVector::new(document_id, vector));
    }
    Ok(documents)
}
