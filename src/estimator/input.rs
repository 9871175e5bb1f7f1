use std::path::Path;

use rand::Rng;
use serde::Deserialize;

use crate::{
    estimator::{compute_local, EstimatorError, MalformedInputError, SiteContribution},
    privacy::{ParameterError, PrivacyParameters, DEFAULT_CLIPPING_BOUND},
    sites::SiteError,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
/// The data file of a site: the vectorized connectivity matrices of its subjects and the
/// parameters the site would use on its own.
pub struct SiteInput {
    /// One strict upper triangle per subject.
    pub fc_vecs: Vec<Vec<f64>>,
    pub epsilon: f64,
    pub delta: f64,
    #[serde(default)]
    pub pre_processing_bound: Option<f64>,
    #[serde(default)]
    pub post_processing_components: Option<usize>,
}

impl SiteInput {
    /// Parses the input from JSON.
    ///
    /// # Errors
    /// Fails with [`MalformedInputError::Parse`] if the JSON is invalid or a required field is
    /// missing.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MalformedInputError> {
        serde_json::from_slice(bytes).map_err(|err| MalformedInputError::Parse(err.to_string()))
    }

    /// Reads and parses the input file at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SiteError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SiteError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_json(&bytes).map_err(EstimatorError::from)?)
    }

    /// Gets the parameters stored alongside the observations.
    ///
    /// The clipping bound defaults to `1` and is capped at `1` in magnitude.
    pub fn parameters(&self) -> Result<PrivacyParameters, ParameterError> {
        PrivacyParameters::new(
            self.epsilon,
            self.delta,
            self.pre_processing_bound.unwrap_or(DEFAULT_CLIPPING_BOUND),
            self.post_processing_components,
        )
    }

    /// Runs the local estimator on the observations.
    ///
    /// The `shared` parameters of the round take precedence over the ones of the input file.
    pub fn estimate<R>(
        &self,
        shared: Option<&PrivacyParameters>,
        rng: &mut R,
    ) -> Result<SiteContribution, EstimatorError>
    where
        R: Rng + ?Sized,
    {
        let params = match shared {
            Some(params) => *params,
            None => self.parameters()?,
        };
        compute_local(&self.fc_vecs, &params, rng)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    const INPUT: &[u8] = br#"{
        "fc_vecs": [[0.5, 0.1, -0.2], [0.3, 0.2, 0.0]],
        "epsilon": 1.0,
        "delta": 0.00001
    }"#;

    #[test]
    fn test_parameters_defaults() {
        let input = SiteInput::from_json(INPUT).unwrap();
        assert_eq!(input.fc_vecs.len(), 2);

        let params = input.parameters().unwrap();
        assert_eq!(params.clipping_bound, 1.);
        assert_eq!(params.low_rank_components, None);

        let contribution = input
            .estimate(None, &mut ChaCha20Rng::seed_from_u64(0))
            .unwrap();
        assert_eq!(contribution.low_rank_components, 3);
        assert_eq!(contribution.subject_count, 2);
    }

    #[test]
    fn test_parameters_cap_bound() {
        let input = SiteInput {
            pre_processing_bound: Some(-0.4),
            post_processing_components: Some(2),
            ..SiteInput::from_json(INPUT).unwrap()
        };
        let params = input.parameters().unwrap();
        assert_eq!(params.clipping_bound, 0.4);
        assert_eq!(params.low_rank_components, Some(2));

        let zero_components = SiteInput {
            post_processing_components: Some(0),
            ..input
        };
        assert_eq!(
            zero_components.parameters(),
            Err(ParameterError::LowRankComponents)
        );
    }

    #[test]
    fn test_shared_parameters_win() {
        let input = SiteInput::from_json(INPUT).unwrap();
        let shared = PrivacyParameters::new(2., 0.001, 0.5, Some(1)).unwrap();
        let contribution = input
            .estimate(Some(&shared), &mut ChaCha20Rng::seed_from_u64(0))
            .unwrap();
        assert_eq!(contribution.epsilon, 2.);
        assert_eq!(contribution.delta, 0.001);
        assert_eq!(contribution.clipping_bound, 0.5);
        assert_eq!(contribution.low_rank_components, 1);
    }

    #[test]
    fn test_missing_field() {
        let err = SiteInput::from_json(br#"{"epsilon": 1.0, "delta": 0.1}"#).unwrap_err();
        assert!(matches!(err, MalformedInputError::Parse(msg) if msg.contains("fc_vecs")));
    }
}
