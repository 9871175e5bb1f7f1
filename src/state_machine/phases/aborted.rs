use tracing::{info, warn};

use crate::state_machine::{
    events::AggregateUpdate,
    phases::{PhaseName, PhaseState, Shared},
    RoundError,
};

/// The aborted state.
#[derive(Debug)]
pub struct Aborted {
    /// The phase during which the round was aborted.
    phase: PhaseName,
}

impl PhaseState<Aborted> {
    /// Creates a new aborted state.
    pub fn new(shared: Shared, phase: PhaseName) -> Self {
        Self {
            private: Aborted { phase },
            shared,
        }
    }

    /// Ends the round, discarding everything accepted so far.
    pub fn finish(self) -> RoundError {
        self.finish_with(PhaseName::Aborted, |private, shared| {
            warn!("round aborted in the {} phase", private.phase);
            info!("broadcasting invalidation of the global aggregate");
            shared.events.broadcast_aggregate(AggregateUpdate::Invalidate);
            RoundError::Aborted {
                phase: private.phase,
            }
        })
    }
}
