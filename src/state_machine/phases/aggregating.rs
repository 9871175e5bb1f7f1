use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use crate::{
    aggregator::{aggregate, GlobalAggregate},
    estimator::SiteContribution,
    sites::SiteId,
    state_machine::{
        events::AggregateUpdate,
        phases::{Distributing, Phase, PhaseName, PhaseState, Shared},
        RoundError,
        StateMachine,
    },
};

/// The aggregating state.
#[derive(Debug)]
pub struct Aggregating {
    /// The sites whose contributions were accepted, in order.
    contributors: Vec<SiteId>,
    /// The accepted contributions, in the order of the contributors.
    contributions: Vec<SiteContribution>,
    /// The global aggregate.
    aggregate: Arc<GlobalAggregate>,
}

#[async_trait]
impl Phase for PhaseState<Aggregating> {
    const NAME: PhaseName = PhaseName::Aggregating;

    async fn process(&mut self) -> Result<(), RoundError> {
        info!(
            "aggregating {} contributions",
            self.private.contributions.len(),
        );
        let aggregate = aggregate(&self.private.contributions)?;
        self.private.aggregate = Arc::new(aggregate);
        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting the new global aggregate");
        self.shared
            .events
            .broadcast_aggregate(AggregateUpdate::New(self.private.aggregate.clone()));
    }

    fn next(self) -> StateMachine {
        PhaseState::<Distributing>::new(
            self.shared,
            self.private.aggregate,
            self.private.contributors,
        )
        .into()
    }
}

impl PhaseState<Aggregating> {
    /// Creates a new aggregating state.
    pub fn new(shared: Shared, contributions: BTreeMap<SiteId, SiteContribution>) -> Self {
        let (contributors, contributions) = contributions.into_iter().unzip();
        Self {
            private: Aggregating {
                contributors,
                contributions,
                aggregate: Arc::new(GlobalAggregate::default()),
            },
            shared,
        }
    }
}
