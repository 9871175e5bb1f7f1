//! Connectivity matrices and their vectorized upper-triangular representation.
//!
//! A connectivity matrix over `n` nodes is symmetric with a unit diagonal, hence it is fully
//! described by the `n * (n - 1) / 2` entries of its strict upper triangle. Sites exchange
//! observations in this vectorized form, taken row by row.

use std::convert::TryFrom;

use derive_more::{AsRef, Into};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::estimator::MalformedInputError;

/// The tolerance used when checking the symmetry and the diagonal of a matrix.
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Infers the number of nodes from the number of edges of a connectivity matrix.
///
/// # Errors
/// Fails if `num_edges` is not a triangular number, i.e. `n^2 - n - 2 * num_edges = 0` has no
/// integer root.
pub fn node_count(num_edges: usize) -> Result<usize, MalformedInputError> {
    let root = (1. + (1. + 8. * num_edges as f64).sqrt()) / 2.;
    let num_nodes = root.round() as usize;
    if num_nodes * (num_nodes - 1) / 2 == num_edges {
        Ok(num_nodes)
    } else {
        Err(MalformedInputError::EdgeCount(num_edges))
    }
}

/// Reshapes a vectorized strict upper triangle into a symmetric matrix with a unit diagonal.
///
/// See [`ConnectivityMatrix::from_upper_triangle`].
pub fn vec_to_mat(values: &[f64]) -> Result<ConnectivityMatrix, MalformedInputError> {
    ConnectivityMatrix::from_upper_triangle(values)
}

/// Vectorizes the strict upper triangle of a matrix, the inverse of [`vec_to_mat`].
pub fn mat_to_vec(matrix: &ConnectivityMatrix) -> Vec<f64> {
    matrix.upper_triangle()
}

#[derive(Debug, Clone, PartialEq, AsRef, Into, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
/// A square matrix, serialized as a list of rows.
pub struct ConnectivityMatrix(Array2<f64>);

impl Default for ConnectivityMatrix {
    fn default() -> Self {
        Self(Array2::zeros((0, 0)))
    }
}

impl ConnectivityMatrix {
    /// Builds the matrix from its strict upper triangle.
    ///
    /// The values are placed row by row above the diagonal, mirrored below it and the diagonal is
    /// set to `1`.
    ///
    /// # Errors
    /// Fails if the number of values does not correspond to an integer number of nodes.
    pub fn from_upper_triangle(values: &[f64]) -> Result<Self, MalformedInputError> {
        let num_nodes = node_count(values.len())?;
        let mut matrix = Array2::eye(num_nodes);
        let mut values = values.iter();
        for row in 0..num_nodes {
            for col in row + 1..num_nodes {
                // the edge count was checked above
                let value = values.next().copied().unwrap_or_default();
                matrix[[row, col]] = value;
                matrix[[col, row]] = value;
            }
        }
        Ok(Self(matrix))
    }

    /// Gets the strict upper triangle of the matrix, row by row.
    pub fn upper_triangle(&self) -> Vec<f64> {
        let n = self.dim();
        let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for row in 0..n {
            for col in row + 1..n {
                values.push(self.0[[row, col]]);
            }
        }
        values
    }

    /// Gets the number of rows (and columns) of the matrix.
    pub fn dim(&self) -> usize {
        self.0.nrows()
    }

    /// Gets the underlying array.
    pub fn as_array(&self) -> &Array2<f64> {
        &self.0
    }

    /// Checks that all entries are finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|value| value.is_finite())
    }

    /// Checks that the matrix equals its transpose.
    pub fn is_symmetric(&self) -> bool {
        let n = self.dim();
        (0..n).all(|row| {
            (row + 1..n)
                .all(|col| (self.0[[row, col]] - self.0[[col, row]]).abs() <= SYMMETRY_TOLERANCE)
        })
    }

    /// Checks that every diagonal entry is `1`.
    pub fn has_unit_diagonal(&self) -> bool {
        self.0
            .diag()
            .iter()
            .all(|value| (value - 1.).abs() <= SYMMETRY_TOLERANCE)
    }

    /// Checks that all off-diagonal entries lie in `[-bound, bound]`.
    pub fn is_bounded_by(&self, bound: f64) -> bool {
        self.0
            .indexed_iter()
            .all(|((row, col), value)| row == col || value.abs() <= bound + SYMMETRY_TOLERANCE)
    }

    /// Clips all entries to `[-bound, bound]` and resets the diagonal to `1`.
    pub(crate) fn clip_to_correlation(&mut self, bound: f64) {
        self.0.mapv_inplace(|value| value.max(-bound).min(bound));
        self.0.diag_mut().fill(1.);
    }
}

impl TryFrom<Vec<Vec<f64>>> for ConnectivityMatrix {
    type Error = MalformedInputError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        let n = rows.len();
        let mut matrix = Array2::zeros((n, n));
        let targets = matrix.axis_iter_mut(Axis(0));
        for (index, (row, mut target)) in rows.into_iter().zip(targets).enumerate() {
            if row.len() != n {
                return Err(MalformedInputError::NotSquare {
                    row: index,
                    expected: n,
                    found: row.len(),
                });
            }
            target
                .iter_mut()
                .zip(row)
                .for_each(|(entry, value)| *entry = value);
        }
        Ok(Self(matrix))
    }
}

impl TryFrom<Array2<f64>> for ConnectivityMatrix {
    type Error = MalformedInputError;

    fn try_from(array: Array2<f64>) -> Result<Self, Self::Error> {
        let (rows, cols) = array.dim();
        if rows == cols {
            Ok(Self(array))
        } else {
            Err(MalformedInputError::NotSquare {
                row: 0,
                expected: rows,
                found: cols,
            })
        }
    }
}

impl From<ConnectivityMatrix> for Vec<Vec<f64>> {
    fn from(matrix: ConnectivityMatrix) -> Self {
        matrix.0.outer_iter().map(|row| row.to_vec()).collect()
    }
}
