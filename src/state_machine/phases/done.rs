use tracing::info;

use crate::state_machine::{
    phases::{PhaseName, PhaseState, Shared},
    RoundOutcome,
};

/// The done state.
#[derive(Debug)]
pub struct Done {
    outcome: RoundOutcome,
}

impl PhaseState<Done> {
    /// Creates a new done state.
    pub fn new(shared: Shared, outcome: RoundOutcome) -> Self {
        Self {
            private: Done { outcome },
            shared,
        }
    }

    /// Ends the round with its outcome.
    pub fn finish(self) -> RoundOutcome {
        self.finish_with(PhaseName::Done, |private, _| {
            let outcome = private.outcome;
            info!(
                "round finished with {} contributors and {} acknowledgements",
                outcome.contributors.len(),
                outcome.acknowledged.len(),
            );
            if let Some(incomplete) = &outcome.incomplete {
                info!("{}", incomplete);
            }
            outcome
        })
    }
}
