//! Privacy parameters shared by all sites of a round and the calibration of the Gaussian noise.
//!
//! The [`PrivacyParameters`] are loaded once by the coordinator when a round starts and forwarded
//! unchanged to every site. They are never mutated while the round is running, which is why the
//! coordinator hands them out behind an `Arc`.

pub mod calibration;

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::calibration::{calibrate, calibrate_with_tolerance, threshold_delta, DEFAULT_TOLERANCE};

/// The default clipping bound applied to the observations before averaging.
pub const DEFAULT_CLIPPING_BOUND: f64 = 1.0;

/// Errors raised when a privacy parameter is out of its valid range.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq)]
pub enum ParameterError {
    /// epsilon must be a positive finite number, got {0}
    Epsilon(f64),
    /// delta must lie in the open interval (0, 1), got {0}
    Delta(f64),
    /// sensitivity must be a non-negative finite number, got {0}
    Sensitivity(f64),
    /// the clipping bound must be a finite number, got {0}
    ClippingBound(f64),
    /// at least one low-rank component must be kept
    LowRankComponents,
    /// the calibrated noise scale {0} is not a valid standard deviation
    NoiseScale(f64),
}

/// Errors raised while loading the shared parameters file.
#[derive(Debug, Error)]
pub enum ParametersError {
    #[error("failed to read parameters from {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse parameters: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameters: {0}")]
    Invalid(#[from] ParameterError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// The differential privacy budget and the pre/post-processing parameters of a round.
pub struct PrivacyParameters {
    /// The target epsilon (`epsilon > 0`).
    pub epsilon: f64,
    /// The target delta (`0 < delta < 1`).
    pub delta: f64,
    /// The magnitude limit applied to every observation before averaging.
    ///
    /// The value is stored as `min(|bound|, 1)`.
    #[serde(rename = "pre_processing_bound", default = "default_clipping_bound")]
    pub clipping_bound: f64,
    /// The number of singular values kept by the low-rank denoising.
    ///
    /// When absent, each site uses the node count inferred from its observations.
    #[serde(
        rename = "post_processing_components",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub low_rank_components: Option<usize>,
}

fn default_clipping_bound() -> f64 {
    DEFAULT_CLIPPING_BOUND
}

/// Caps the magnitude of a clipping bound at `1`.
pub fn cap_clipping_bound(bound: f64) -> f64 {
    bound.abs().min(DEFAULT_CLIPPING_BOUND)
}

impl PrivacyParameters {
    /// Creates validated privacy parameters.
    ///
    /// # Errors
    /// Fails if any of the parameters is out of its valid range.
    pub fn new(
        epsilon: f64,
        delta: f64,
        clipping_bound: f64,
        low_rank_components: Option<usize>,
    ) -> Result<Self, ParameterError> {
        // `f64::min` would turn a NaN bound into the cap
        if !clipping_bound.is_finite() {
            return Err(ParameterError::ClippingBound(clipping_bound));
        }
        let params = Self {
            epsilon,
            delta,
            clipping_bound: cap_clipping_bound(clipping_bound),
            low_rank_components,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks the parameter ranges.
    pub fn validate(&self) -> Result<(), ParameterError> {
        validate_budget(self.epsilon, self.delta)?;
        if !self.clipping_bound.is_finite() {
            return Err(ParameterError::ClippingBound(self.clipping_bound));
        }
        if self.low_rank_components == Some(0) {
            return Err(ParameterError::LowRankComponents);
        }
        Ok(())
    }

    /// Parses and validates parameters from their JSON representation.
    ///
    /// The clipping bound is capped at `1` the same way the per-site input is.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ParametersError> {
        let params: Self = serde_json::from_slice(bytes)?;
        Ok(Self::new(
            params.epsilon,
            params.delta,
            params.clipping_bound,
            params.low_rank_components,
        )?)
    }

    /// Loads the parameters from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ParametersError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ParametersError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&bytes)
    }
}

/// Checks an `(epsilon, delta)` budget.
pub(crate) fn validate_budget(epsilon: f64, delta: f64) -> Result<(), ParameterError> {
    if !(epsilon.is_finite() && epsilon > 0.) {
        return Err(ParameterError::Epsilon(epsilon));
    }
    if !(delta > 0. && delta < 1.) {
        return Err(ParameterError::Delta(delta));
    }
    Ok(())
}

#[async_trait]
/// A source of the shared privacy parameters, read once when a round starts.
pub trait ParametersSource: Send + Sync {
    /// Loads the parameters.
    async fn load(&self) -> Result<PrivacyParameters, ParametersError>;
}

#[async_trait]
impl ParametersSource for PathBuf {
    async fn load(&self) -> Result<PrivacyParameters, ParametersError> {
        PrivacyParameters::load(self).await
    }
}

#[async_trait]
impl ParametersSource for PrivacyParameters {
    /// Validates the parameters and caps the clipping bound like a parameters file would.
    async fn load(&self) -> Result<PrivacyParameters, ParametersError> {
        Ok(PrivacyParameters::new(
            self.epsilon,
            self.delta,
            self.clipping_bound,
            self.low_rank_components,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_caps_clipping_bound() {
        let params = PrivacyParameters::new(1., 1e-5, -3., None).unwrap();
        assert_eq!(params.clipping_bound, 1.);

        let params = PrivacyParameters::new(1., 1e-5, -0.25, Some(3)).unwrap();
        assert_eq!(params.clipping_bound, 0.25);
        assert_eq!(params.low_rank_components, Some(3));
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            PrivacyParameters::new(0., 1e-5, 1., None),
            Err(ParameterError::Epsilon(0.))
        );
        assert_eq!(
            PrivacyParameters::new(1., 1., 1., None),
            Err(ParameterError::Delta(1.))
        );
        assert_eq!(
            PrivacyParameters::new(1., 0., 1., None),
            Err(ParameterError::Delta(0.))
        );
        assert_eq!(
            PrivacyParameters::new(1., 0.1, 1., Some(0)),
            Err(ParameterError::LowRankComponents)
        );
        assert!(PrivacyParameters::new(1., 0.1, f64::NAN, None).is_err());
    }

    #[test]
    fn test_from_json_defaults() {
        let params = PrivacyParameters::from_json(br#"{"epsilon": 2.0, "delta": 0.001}"#).unwrap();
        assert_eq!(params.epsilon, 2.);
        assert_eq!(params.delta, 0.001);
        assert_eq!(params.clipping_bound, DEFAULT_CLIPPING_BOUND);
        assert_eq!(params.low_rank_components, None);

        let params = PrivacyParameters::from_json(
            br#"{"epsilon": 2.0, "delta": 0.001, "pre_processing_bound": 7, "post_processing_components": 4}"#,
        )
        .unwrap();
        assert_eq!(params.clipping_bound, 1.);
        assert_eq!(params.low_rank_components, Some(4));
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            PrivacyParameters::from_json(br#"{"delta": 0.001}"#),
            Err(ParametersError::Json(_))
        ));
        assert!(matches!(
            PrivacyParameters::from_json(br#"{"epsilon": -1.0, "delta": 0.001}"#),
            Err(ParametersError::Invalid(ParameterError::Epsilon(_)))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let source = PathBuf::from("does/not/exist.json");
        assert!(matches!(source.load().await, Err(ParametersError::Io { .. })));
    }

    #[tokio::test]
    async fn test_load_parameters_file() {
        let params = PathBuf::from("configs/parameters.json").load().await.unwrap();
        assert_eq!(params.epsilon, 1.);
        assert_eq!(params.low_rank_components, Some(3));
    }

    #[test]
    fn test_nan_clipping_bound_is_rejected() {
        let err = PrivacyParameters::new(1., 0.1, f64::NAN, None).unwrap_err();
        assert!(matches!(err, ParameterError::ClippingBound(bound) if bound.is_nan()));
        assert!(matches!(
            PrivacyParameters::new(1., 0.1, f64::INFINITY, None),
            Err(ParameterError::ClippingBound(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_source_caps_clipping_bound() {
        let source = PrivacyParameters {
            epsilon: 1.,
            delta: 1e-5,
            clipping_bound: 3.,
            low_rank_components: None,
        };
        assert_eq!(source.load().await.unwrap().clipping_bound, 1.);

        let invalid = PrivacyParameters {
            epsilon: 0.,
            ..source
        };
        assert!(matches!(
            invalid.load().await,
            Err(ParametersError::Invalid(ParameterError::Epsilon(_)))
        ));
    }
}
