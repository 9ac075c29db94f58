//! Dense matrices and the dot-product similarity engine.

use crate::error::{Result, SimilarityError};

/// A dense row-major matrix of `f32`.
///
/// Used both for stacked group embeddings (`rows × dimension`) and for the
/// score matrix between two groups (`rows × cols`).
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Data in row-major order: `data[row * cols + col]`.
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

/// Scores between a row group and a column group.
pub type ScoreMatrix = Matrix;

impl Matrix {
    /// Create an empty matrix whose rows will have `cols` columns.
    pub fn with_columns(cols: usize) -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            cols,
        }
    }

    /// Create a matrix from flat row-major data.
    pub fn from_flat(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(SimilarityError::dimension_mismatch(
                rows * cols,
                data.len(),
                format!("flat {rows}x{cols} matrix"),
            ));
        }
        Ok(Self { data, rows, cols })
    }

    /// Create a matrix by stacking rows.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut matrix = Self::with_columns(cols);
        matrix.data.reserve(rows.len() * cols);
        for row in rows {
            matrix.push_row(row.as_ref())?;
        }
        Ok(matrix)
    }

    /// Append a row.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.cols {
            return Err(SimilarityError::dimension_mismatch(
                self.cols,
                row.len(),
                format!("matrix row {}", self.rows),
            ));
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// Slice of one row.
    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(SimilarityError::dimension_mismatch(
            a.len(),
            b.len(),
            "dot product operands",
        ));
    }

    Ok(dot(a, b))
}

/// Compute the scores between every row of `a` and every row of `b`.
///
/// Entry `(i, j)` of the result is the dot product of row `i` of `a` and
/// row `j` of `b`. Vectors are not normalized here.
pub fn similarity_matrix(a: &Matrix, b: &Matrix) -> Result<ScoreMatrix> {
    if a.cols != b.cols {
        return Err(SimilarityError::dimension_mismatch(
            a.cols,
            b.cols,
            "similarity matrix operands",
        ));
    }

    let mut scores = Vec::with_capacity(a.rows * b.rows);
    for i in 0..a.rows {
        let row = a.row(i);
        for j in 0..b.rows {
            scores.push(dot(row, b.row(j)));
        }
    }

    Ok(Matrix {
        data: scores,
        rows: a.rows,
        cols: b.rows,
    })
}

/// Compute the scores of a matrix against itself.
///
/// Equal to `similarity_matrix(a, a)`, but only the upper triangle is
/// computed and then mirrored.
pub fn self_similarity_matrix(a: &Matrix) -> ScoreMatrix {
    let n = a.rows;
    let mut scores = Matrix {
        data: vec![0.0; n * n],
        rows: n,
        cols: n,
    };

    for i in 0..n {
        let row = a.row(i);
        for j in i..n {
            let score = dot(row, a.row(j));
            scores.set(i, j, score);
            scores.set(j, i, score);
        }
    }

    scores
}

/// Normalize an embedding to unit length.
///
/// Dot products of normalized embeddings are cosine similarities.
pub fn normalize(embedding: &mut [f32]) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}
