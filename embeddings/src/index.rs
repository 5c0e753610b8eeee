//! Exact nearest-neighbor index over a dense vector matrix.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::IndexError;
use crate::similarity::squared_euclidean;

/// A single search hit: the position of an indexed vector and its distance
/// to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Position of the vector in build order.
    pub position: usize,

    /// Squared euclidean distance to the query.
    pub distance: f32,
}

/// Row-major storage for the built index.
#[derive(Debug, Clone)]
struct Matrix {
    dimension: usize,
    rows: usize,
    data: Vec<f32>,
}

impl Matrix {
    fn row(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.data[start..start + self.dimension]
    }
}

/// A brute-force vector index.
///
/// Vectors keep the position they were given at build time, so position `i`
/// always refers to the `i`-th input vector. Searches compare the query
/// against every stored row and rank by squared euclidean distance.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    matrix: Option<Matrix>,
}

impl FlatIndex {
    /// Create an index that has not been built yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and build an index in one step.
    pub fn from_vectors(vectors: Vec<Embedding>) -> Result<Self, IndexError> {
        let mut index = Self::new();
        index.build(vectors)?;
        Ok(index)
    }

    /// Replace the contents of the index with `vectors`.
    ///
    /// On error the previous contents are left untouched.
    pub fn build(&mut self, vectors: Vec<Embedding>) -> Result<(), IndexError> {
        let Some(first) = vectors.first() else {
            return Err(IndexError::NoVectors);
        };
        let dimension = first.len();

        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let rows = vectors.len();
        let mut data = Vec::with_capacity(rows * dimension);
        for vector in vectors {
            data.extend(vector);
        }

        self.matrix = Some(Matrix {
            dimension,
            rows,
            data,
        });
        debug!("Built flat index with {rows} vectors of dimension {dimension}");

        Ok(())
    }

    /// Whether `build` has succeeded at least once.
    pub fn is_built(&self) -> bool {
        self.matrix.is_some()
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.matrix.as_ref().map_or(0, |m| m.rows)
    }

    /// Check if the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector length, once built.
    pub fn dimension(&self) -> Option<usize> {
        self.matrix.as_ref().map(|m| m.dimension)
    }

    /// The vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let matrix = self.matrix.as_ref()?;
        (position < matrix.rows).then(|| matrix.row(position))
    }

    /// All vectors in position order.
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.matrix
            .iter()
            .flat_map(|m| (0..m.rows).map(move |i| m.row(i)))
    }

    /// Find the `k` nearest vectors to `query`.
    ///
    /// Results are ordered by ascending distance; equal distances are ordered
    /// by ascending position. When `k` exceeds the number of indexed vectors
    /// every vector is returned.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        let matrix = self.matrix.as_ref().ok_or(IndexError::EmptyIndex)?;

        if k == 0 {
            return Err(IndexError::InvalidK(k));
        }
        if query.len() != matrix.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: matrix.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(OrderedFloat<f32>, usize)> = Vec::with_capacity(matrix.rows);
        for position in 0..matrix.rows {
            let distance = squared_euclidean(query, matrix.row(position))?;
            scored.push((OrderedFloat(distance), position));
        }

        // Tuple ordering gives distance first, then position.
        scored.sort_unstable();
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, position)| Neighbor {
                position,
                distance: distance.0,
            })
            .collect())
    }
}
