use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::{
    estimator::{MalformedInputError, SiteContribution},
    privacy::PrivacyParameters,
    sites::{SiteId, Task, TaskName, TaskResult},
    state_machine::{
        phases::{Aggregating, Handler, Phase, PhaseName, PhaseState, RejectionError, Shared},
        RoundError,
        StateMachine,
    },
};

/// The collecting state.
#[derive(Debug)]
pub struct Collecting {
    /// The shared privacy parameters of the round.
    parameters: Arc<PrivacyParameters>,
    /// The accepted contributions, keyed by site.
    contributions: BTreeMap<SiteId, SiteContribution>,
}

#[async_trait]
impl Phase for PhaseState<Collecting> {
    const NAME: PhaseName = PhaseName::Collecting;

    async fn process(&mut self) -> Result<(), RoundError> {
        let task = Task::ComputeLocalEstimate(self.private.parameters.clone());
        self.collect(task).await?;
        info!(
            "accepted contributions from {} sites",
            self.private.contributions.len(),
        );
        Ok(())
    }

    fn next(self) -> StateMachine {
        PhaseState::<Aggregating>::new(self.shared, self.private.contributions).into()
    }
}

impl Handler for PhaseState<Collecting> {
    /// Accepts a well-formed contribution computed with the round parameters.
    ///
    /// Every accepted contribution must have the dimension of the first one.
    fn handle_response(&mut self, site: &SiteId, result: TaskResult) -> Result<(), RejectionError> {
        let contribution = match result {
            TaskResult::LocalEstimate(contribution) => contribution,
            TaskResult::Acknowledged => {
                return Err(RejectionError::UnexpectedResult(
                    TaskName::ComputeLocalEstimate,
                ))
            }
        };
        contribution.validate(&self.private.parameters)?;

        let contributions = &mut self.private.contributions;
        if let Some(accepted) = contributions.values().next() {
            let expected = accepted.mean_matrix.dim();
            let found = contribution.mean_matrix.dim();
            if found != expected {
                return Err(MalformedInputError::Dimension { expected, found }.into());
            }
        }
        if contributions.contains_key(site) {
            return Err(RejectionError::Duplicate);
        }
        contributions.insert(site.clone(), contribution);
        Ok(())
    }
}

impl PhaseState<Collecting> {
    /// Creates a new collecting state.
    pub fn new(shared: Shared, parameters: Arc<PrivacyParameters>) -> Self {
        Self {
            private: Collecting {
                parameters,
                contributions: BTreeMap::new(),
            },
            shared,
        }
    }
}
