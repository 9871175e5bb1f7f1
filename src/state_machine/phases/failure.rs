use displaydoc::Display;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    estimator::MalformedInputError,
    privacy::ParametersError,
    sites::SiteId,
    state_machine::{
        events::AggregateUpdate,
        phases::{PhaseName, PhaseState, Shared},
    },
};

/// Errors which end a round without a result.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("quorum not reached in the {phase} phase: {accepted} results accepted, {required} required")]
    QuorumFailure {
        phase: PhaseName,
        accepted: usize,
        required: usize,
    },
    #[error("site {site} failed in the {phase} phase: {reason}")]
    SiteResult {
        site: SiteId,
        phase: PhaseName,
        reason: String,
    },
    #[error("the round was aborted in the {phase} phase")]
    Aborted { phase: PhaseName },
    #[error("failed to load the round parameters: {0}")]
    Parameters(#[from] ParametersError),
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] MalformedInputError),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Distribution incomplete: {acknowledged} acknowledgements, {required} required.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub struct DistributionIncomplete {
    pub acknowledged: usize,
    pub required: usize,
}

/// The failure state.
#[derive(Debug)]
pub struct Failure {
    error: RoundError,
}

impl PhaseState<Failure> {
    /// Creates a new failure state.
    pub fn new(shared: Shared, error: RoundError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }

    /// Ends the round with its error.
    pub fn finish(self) -> RoundError {
        self.finish_with(PhaseName::Failure, |private, shared| {
            error!("round failed: {}", private.error);
            info!("broadcasting invalidation of the global aggregate");
            shared.events.broadcast_aggregate(AggregateUpdate::Invalidate);
            private.error
        })
    }
}
