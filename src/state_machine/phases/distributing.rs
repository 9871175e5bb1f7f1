use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    aggregator::GlobalAggregate,
    sites::{SiteId, Task, TaskName, TaskResult},
    state_machine::{
        phases::{
            DistributionIncomplete,
            Done,
            Handler,
            Phase,
            PhaseName,
            PhaseState,
            RejectionError,
            Shared,
        },
        RoundError,
        RoundOutcome,
        StateMachine,
    },
};

/// The distributing state.
#[derive(Debug)]
pub struct Distributing {
    /// The global aggregate sent to the sites.
    aggregate: Arc<GlobalAggregate>,
    /// The sites whose contributions were aggregated.
    contributors: Vec<SiteId>,
    /// The sites which acknowledged the global aggregate.
    acknowledged: BTreeSet<SiteId>,
    /// Set if too few sites acknowledged the global aggregate.
    incomplete: Option<DistributionIncomplete>,
}

#[async_trait]
impl Phase for PhaseState<Distributing> {
    const NAME: PhaseName = PhaseName::Distributing;

    async fn process(&mut self) -> Result<(), RoundError> {
        let task = Task::AcceptGlobalAverage(self.private.aggregate.clone());
        match self.collect(task).await {
            Ok(_) => {
                info!(
                    "{} sites acknowledged the global aggregate",
                    self.private.acknowledged.len(),
                );
                Ok(())
            }
            Err(RoundError::QuorumFailure {
                accepted, required, ..
            }) => {
                let incomplete = DistributionIncomplete {
                    acknowledged: accepted,
                    required,
                };
                warn!("{}", incomplete);
                self.private.incomplete = Some(incomplete);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn next(self) -> StateMachine {
        let Distributing {
            aggregate,
            contributors,
            acknowledged,
            incomplete,
        } = self.private;
        let outcome = RoundOutcome {
            aggregate: Arc::try_unwrap(aggregate).unwrap_or_else(|shared| (*shared).clone()),
            contributors,
            acknowledged: acknowledged.into_iter().collect(),
            incomplete,
        };
        PhaseState::<Done>::new(self.shared, outcome).into()
    }
}

impl Handler for PhaseState<Distributing> {
    /// A site failing to accept the aggregate only counts as a missing acknowledgement.
    fn site_error_is_fatal(&self) -> bool {
        false
    }

    fn handle_response(&mut self, site: &SiteId, result: TaskResult) -> Result<(), RejectionError> {
        match result {
            TaskResult::Acknowledged => {
                if self.private.acknowledged.insert(site.clone()) {
                    Ok(())
                } else {
                    Err(RejectionError::Duplicate)
                }
            }
            TaskResult::LocalEstimate(_) => {
                Err(RejectionError::UnexpectedResult(TaskName::AcceptGlobalAverage))
            }
        }
    }
}

impl PhaseState<Distributing> {
    /// Creates a new distributing state.
    pub fn new(
        shared: Shared,
        aggregate: Arc<GlobalAggregate>,
        contributors: Vec<SiteId>,
    ) -> Self {
        Self {
            private: Distributing {
                aggregate,
                contributors,
                acknowledged: BTreeSet::new(),
                incomplete: None,
            },
            shared,
        }
    }
}
