//! Aggregation of the site contributions at the coordinator.
//!
//! The accepted contributions are averaged with their subject counts as weights. The average is
//! then denoised by keeping only its largest singular components, clipped to the clipping bound
//! and its diagonal is reset to `1`.

mod svd;

use std::convert::TryFrom;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use self::svd::{low_rank, singular_values};
use crate::{
    estimator::{MalformedInputError, SiteContribution},
    matrix::ConnectivityMatrix,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// The global estimate of a round.
pub struct GlobalAggregate {
    /// The denoised weighted mean of the site contributions.
    #[serde(rename = "dp_fc_mean")]
    pub mean_matrix: ConnectivityMatrix,
    /// The subject counts of the contributing sites.
    pub counts: Vec<u64>,
}

impl GlobalAggregate {
    /// Checks whether this is the neutral aggregate of an empty round.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.mean_matrix.dim() == 0
    }
}

/// Combines the contributions into the global estimate.
///
/// The low-rank components and the clipping bound are taken from the first contribution. An empty
/// slice or a total subject count of zero yields [`GlobalAggregate::default()`].
///
/// # Errors
/// Fails if the matrices of the contributions differ in dimension.
pub fn aggregate(contributions: &[SiteContribution]) -> Result<GlobalAggregate, MalformedInputError> {
    let first = match contributions.first() {
        Some(first) => first,
        None => return Ok(GlobalAggregate::default()),
    };
    let total_count = contributions
        .iter()
        .map(|contribution| contribution.subject_count)
        .sum::<u64>();
    if total_count == 0 {
        return Ok(GlobalAggregate::default());
    }

    let n = first.mean_matrix.dim();
    let mut mean = Array2::<f64>::zeros((n, n));
    for contribution in contributions {
        let found = contribution.mean_matrix.dim();
        if found != n {
            return Err(MalformedInputError::Dimension { expected: n, found });
        }
        mean.scaled_add(
            contribution.subject_count as f64,
            contribution.mean_matrix.as_array(),
        );
    }
    mean /= total_count as f64;

    debug!(
        "denoising the {}x{} mean of {} subjects with {} components",
        n, n, total_count, first.low_rank_components,
    );
    let mut mean_matrix = ConnectivityMatrix::try_from(low_rank(&mean, first.low_rank_components))?;
    mean_matrix.clip_to_correlation(first.clipping_bound);

    Ok(GlobalAggregate {
        mean_matrix,
        counts: contributions
            .iter()
            .map(|contribution| contribution.subject_count)
            .collect(),
    })
}
