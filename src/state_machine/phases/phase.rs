use std::{fmt, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use tracing::{error_span, info, warn};
use tracing_futures::Instrument;

use crate::{
    settings::RoundSettings,
    sites::Site,
    state_machine::{
        abort::AbortSignal,
        events::EventPublisher,
        phases::{Aborted, Failure},
        RoundError,
        StateMachine,
    },
};

/// The name of the current phase.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PhaseName {
    #[display(fmt = "Init")]
    Init,
    #[display(fmt = "Collecting")]
    Collecting,
    #[display(fmt = "Aggregating")]
    Aggregating,
    #[display(fmt = "Distributing")]
    Distributing,
    #[display(fmt = "Done")]
    Done,
    #[display(fmt = "Failure")]
    Failure,
    #[display(fmt = "Aborted")]
    Aborted,
}

/// A trait that must be implemented by a non-terminal state in order to move to a next state.
///
/// See the [module level documentation] for more details.
///
/// [module level documentation]: crate::state_machine
#[async_trait]
pub trait Phase {
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), RoundError>;

    /// Broadcasts data of this phase (nothing by default).
    fn broadcast(&mut self) {}

    /// Moves from this phase to the next phase.
    fn next(self) -> StateMachine;
}

/// The round context shared by all `PhaseState`s.
///
/// It is created when a round starts and dropped when the round ends.
pub struct Shared {
    /// The round settings.
    pub(in crate::state_machine) settings: RoundSettings,
    /// The participating sites.
    pub(in crate::state_machine) sites: Vec<Arc<dyn Site>>,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
    /// The external abort signal.
    pub(in crate::state_machine) abort: AbortSignal,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sites: Vec<_> = self.sites.iter().map(|site| site.id()).collect();
        f.debug_struct("Shared")
            .field("settings", &self.settings)
            .field("sites", &sites)
            .field("events", &self.events)
            .field("abort", &self.abort)
            .finish()
    }
}

impl Shared {
    /// Creates a new round context.
    pub fn new(
        settings: RoundSettings,
        sites: Vec<Arc<dyn Site>>,
        events: EventPublisher,
        abort: AbortSignal,
    ) -> Self {
        Self {
            settings,
            sites,
            events,
            abort,
        }
    }
}

/// The state corresponding to a phase of the round.
///
/// This contains the state-dependent `private` state and the state-independent `shared` state
/// which is shared across state transitions.
#[derive(Debug)]
pub struct PhaseState<S> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared round context.
    pub(in crate::state_machine) shared: Shared,
}

impl<S> PhaseState<S>
where
    S: Send,
    Self: Phase,
{
    /// Runs the current phase to completion.
    ///
    /// 1. Checks whether the round was aborted.
    /// 2. Performs the phase tasks.
    /// 3. Broadcasts the phase data.
    /// 4. Transitions to the next phase.
    pub async fn run_phase(mut self) -> StateMachine {
        let phase = Self::NAME;
        let span = error_span!("run_phase", phase = %phase);

        async move {
            if self.shared.abort.is_aborted() {
                warn!("round aborted before the phase started");
                return self.into_failure_state(RoundError::Aborted { phase });
            }

            info!("starting phase");
            self.shared.events.broadcast_phase(phase);

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return self.into_failure_state(err);
            }
            info!("phase ran successfully");

            self.broadcast();

            info!("transitioning to the next phase");
            self.next()
        }
        .instrument(span)
        .await
    }
}

impl<S> PhaseState<S> {
    /// Moves into the terminal state corresponding to the error.
    pub(in crate::state_machine) fn into_failure_state(self, err: RoundError) -> StateMachine {
        match err {
            RoundError::Aborted { phase } => PhaseState::<Aborted>::new(self.shared, phase).into(),
            err => PhaseState::<Failure>::new(self.shared, err).into(),
        }
    }

    /// Enters a terminal phase: announces it and runs `finish` within the phase span.
    ///
    /// The shared round context is dropped afterwards.
    pub(in crate::state_machine) fn finish_with<F, T>(mut self, phase: PhaseName, finish: F) -> T
    where
        F: FnOnce(S, &mut Shared) -> T,
    {
        let span = error_span!("run_phase", phase = %phase);
        let _span_guard = span.enter();
        info!("starting phase");
        self.shared.events.broadcast_phase(phase);
        finish(self.private, &mut self.shared)
    }
}
