//! Low-rank approximation by a truncated singular value decomposition.

use nalgebra::DMatrix;
use ndarray::Array2;
use tracing::warn;

fn to_dmatrix(matrix: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = matrix.dim();
    DMatrix::from_fn(rows, cols, |row, col| matrix[[row, col]])
}

fn to_array(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(matrix.shape(), |(row, col)| matrix[(row, col)])
}

/// Gets the singular values of a matrix in descending order.
pub fn singular_values(matrix: &Array2<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = to_dmatrix(matrix)
        .svd(false, false)
        .singular_values
        .iter()
        .copied()
        .collect();
    values.sort_by(|a, b| b.total_cmp(a));
    values
}

/// Reconstructs a matrix from its `k` largest singular triplets.
fn truncate(matrix: &Array2<f64>, k: usize) -> Array2<f64> {
    let mut svd = to_dmatrix(matrix).svd(true, true);

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[j].total_cmp(&svd.singular_values[i]));
    for &index in order.iter().skip(k) {
        svd.singular_values[index] = 0.;
    }

    match svd.recompose() {
        Ok(recomposed) => to_array(&recomposed),
        Err(err) => {
            warn!("failed to recompose the truncated svd: {}", err);
            matrix.clone()
        }
    }
}

/// Approximates a matrix by its `k` largest singular components.
///
/// The matrix is returned unchanged if `k` is at least its number of columns.
pub fn low_rank(matrix: &Array2<f64>, k: usize) -> Array2<f64> {
    if k >= matrix.ncols() {
        return matrix.clone();
    }
    truncate(matrix, k)
}
