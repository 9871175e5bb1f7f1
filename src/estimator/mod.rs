//! The local estimator run by every site.
//!
//! A site never shares its raw observations. Instead it computes a differentially private mean of
//! them:
//!
//! 1. every observation is clipped element-wise to `[-bound, bound]`,
//! 2. the clipped observations are averaged,
//! 3. the add/remove-one sensitivity of the mean, `bound * sqrt(num_edges) / num_subjects`, is
//!    turned into a noise scale by the [analytic Gaussian mechanism](crate::privacy::calibrate),
//! 4. Gaussian noise of that scale is added to every entry of the mean, which is clipped again,
//! 5. the noisy mean is reshaped into a symmetric matrix with a unit diagonal.
//!
//! The resulting [`SiteContribution`] also carries the subject count and the parameters it was
//! computed with.

mod input;

use displaydoc::Display;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use self::input::SiteInput;
use crate::{
    matrix::{node_count, vec_to_mat, ConnectivityMatrix},
    privacy::{calibrate, ParameterError, PrivacyParameters},
};

/// Errors raised when the input of a computation is malformed.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum MalformedInputError {
    /// no subjects: at least one observation is required
    NoSubjects,
    /// {0} edges do not form the strict upper triangle of a square matrix
    EdgeCount(usize),
    /// observation {index} has {found} entries, expected {expected}
    RaggedObservation {
        index: usize,
        expected: usize,
        found: usize,
    },
    /// row {row} of the matrix has {found} entries, expected {expected}
    NotSquare {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// the input contains non-finite values
    NonFinite,
    /// the matrix is not symmetric
    Asymmetric,
    /// the diagonal of the matrix is not 1
    Diagonal,
    /// an off-diagonal entry exceeds the clipping bound {0}
    OutOfBound(f64),
    /// expected a {expected}x{expected} matrix, got {found}x{found}
    Dimension { expected: usize, found: usize },
    /// the {0} of the contribution does not match the round parameters
    ParameterMismatch(&'static str),
    /// failed to parse the input: {0}
    Parse(String),
}

/// Errors raised by the local estimator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),
    #[error("malformed input: {0}")]
    MalformedInput(#[from] MalformedInputError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The differentially private contribution of a single site to a round.
pub struct SiteContribution {
    /// The noisy mean connectivity matrix.
    #[serde(rename = "dp_fc_mean")]
    pub mean_matrix: ConnectivityMatrix,
    /// The number of subjects the mean was computed from.
    #[serde(rename = "count")]
    pub subject_count: u64,
    pub epsilon: f64,
    pub delta: f64,
    #[serde(rename = "pre_processing_bound")]
    pub clipping_bound: f64,
    #[serde(rename = "post_processing_components")]
    pub low_rank_components: usize,
}

impl SiteContribution {
    /// Checks that the contribution is well-formed and was computed with the given parameters.
    ///
    /// # Errors
    /// Fails if the contribution has no subjects, its matrix is not a bounded correlation-like
    /// matrix or its parameters differ from `params`.
    pub fn validate(&self, params: &PrivacyParameters) -> Result<(), MalformedInputError> {
        if self.subject_count == 0 {
            return Err(MalformedInputError::NoSubjects);
        }

        let matrix = &self.mean_matrix;
        if !matrix.is_finite() {
            return Err(MalformedInputError::NonFinite);
        }
        if !matrix.is_symmetric() {
            return Err(MalformedInputError::Asymmetric);
        }
        if !matrix.has_unit_diagonal() {
            return Err(MalformedInputError::Diagonal);
        }
        if !matrix.is_bounded_by(params.clipping_bound) {
            return Err(MalformedInputError::OutOfBound(params.clipping_bound));
        }

        if !approx_eq(self.epsilon, params.epsilon) {
            return Err(MalformedInputError::ParameterMismatch("epsilon"));
        }
        if !approx_eq(self.delta, params.delta) {
            return Err(MalformedInputError::ParameterMismatch("delta"));
        }
        if !approx_eq(self.clipping_bound, params.clipping_bound) {
            return Err(MalformedInputError::ParameterMismatch("clipping bound"));
        }
        match params.low_rank_components {
            _ if self.low_rank_components == 0 => {
                Err(MalformedInputError::ParameterMismatch("number of low-rank components"))
            }
            Some(components) if components != self.low_rank_components => {
                Err(MalformedInputError::ParameterMismatch("number of low-rank components"))
            }
            _ => Ok(()),
        }
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs())
}

/// Computes the differentially private contribution of a site.
///
/// `observations` holds one vectorized connectivity matrix per subject. The noise is drawn from
/// `rng`.
///
/// # Errors
/// Fails with [`EstimatorError::MalformedInput`] if there are no observations, if they differ in
/// length, contain non-finite values or their length is not a triangular number. Fails with
/// [`EstimatorError::InvalidParameter`] if the parameters are out of range.
pub fn compute_local<R>(
    observations: &[Vec<f64>],
    params: &PrivacyParameters,
    rng: &mut R,
) -> Result<SiteContribution, EstimatorError>
where
    R: Rng + ?Sized,
{
    params.validate()?;
    let (num_subjects, num_edges, num_nodes) = shape(observations)?;
    let bound = params.clipping_bound;

    let mean = clipped_mean(observations, bound);
    let sensitivity = sensitivity(bound, num_edges, num_subjects);
    let sigma = calibrate(params.epsilon, params.delta, sensitivity)?;
    debug!(
        "{} subjects, {} nodes: sensitivity {}, noise scale {}",
        num_subjects, num_nodes, sensitivity, sigma,
    );

    let noisy = add_noise(mean, sigma, bound, rng)?;
    let mean_matrix = vec_to_mat(&noisy)?;

    Ok(SiteContribution {
        mean_matrix,
        subject_count: num_subjects as u64,
        epsilon: params.epsilon,
        delta: params.delta,
        clipping_bound: bound,
        low_rank_components: params.low_rank_components.unwrap_or(num_nodes),
    })
}

/// Checks the observations and returns the number of subjects, edges and nodes.
fn shape(observations: &[Vec<f64>]) -> Result<(usize, usize, usize), MalformedInputError> {
    let first = observations.first().ok_or(MalformedInputError::NoSubjects)?;
    let num_edges = first.len();
    for (index, observation) in observations.iter().enumerate() {
        if observation.len() != num_edges {
            return Err(MalformedInputError::RaggedObservation {
                index,
                expected: num_edges,
                found: observation.len(),
            });
        }
        if observation.iter().any(|value| !value.is_finite()) {
            return Err(MalformedInputError::NonFinite);
        }
    }
    let num_nodes = node_count(num_edges)?;
    Ok((observations.len(), num_edges, num_nodes))
}

/// Clips a value to `[-bound, bound]`.
fn clip(value: f64, bound: f64) -> f64 {
    value.max(-bound).min(bound)
}

/// Averages the observations after clipping them element-wise to `[-bound, bound]`.
///
/// The observations must be non-empty and of equal length.
pub fn clipped_mean(observations: &[Vec<f64>], bound: f64) -> Vec<f64> {
    let num_edges = observations.first().map(Vec::len).unwrap_or_default();
    let mut sum = vec![0.; num_edges];
    for observation in observations {
        for (acc, value) in sum.iter_mut().zip(observation) {
            *acc += clip(*value, bound);
        }
    }
    let num_subjects = observations.len() as f64;
    sum.iter_mut().for_each(|acc| *acc /= num_subjects);
    sum
}

/// The L2 sensitivity of the clipped mean when a single subject is added or removed.
pub fn sensitivity(bound: f64, num_edges: usize, num_subjects: usize) -> f64 {
    bound * (num_edges as f64).sqrt() / num_subjects as f64
}

/// Adds `N(0, sigma^2)` noise to every value and clips the result to `[-bound, bound]`.
fn add_noise<R>(
    mut values: Vec<f64>,
    sigma: f64,
    bound: f64,
    rng: &mut R,
) -> Result<Vec<f64>, ParameterError>
where
    R: Rng + ?Sized,
{
    let normal = Normal::new(0., sigma).map_err(|_| ParameterError::NoiseScale(sigma))?;
    for value in values.iter_mut() {
        *value = clip(*value + normal.sample(rng), bound);
    }
    Ok(values)
}
