//! The state machine that controls the execution of a round.
//!
//! # Overview
//!
//! A round is single-shot: it moves from `Init` through `Collecting`, `Aggregating` and
//! `Distributing` to `Done`. Any phase may end the round in `Failure` and an external abort ends
//! it in `Aborted`.
//!
//! The [`StateMachine`] sends the tasks of the round to the sites, collects their results,
//! aggregates the accepted contributions and sends the global aggregate back. The round settings
//! can be configured in the config file. See [here][settings] for more details.
//!
//! # Phase states
//!
//! **Init**
//!
//! Publishes [`PhaseName::Init`] and loads the shared [`PrivacyParameters`].
//!
//! **Collecting**
//!
//! Publishes [`PhaseName::Collecting`], sends the parameters to every site and accepts the
//! well-formed contributions until the quorum, the grace period or the timeout closes the phase.
//!
//! **Aggregating**
//!
//! Publishes [`PhaseName::Aggregating`], aggregates the accepted contributions and publishes the
//! [`GlobalAggregate`].
//!
//! **Distributing**
//!
//! Publishes [`PhaseName::Distributing`] and sends the [`GlobalAggregate`] to every site. Too few
//! acknowledgements do not fail the round but are reported as [`DistributionIncomplete`].
//!
//! **Done**, **Failure** and **Aborted**
//!
//! Publish their phase name and end the round with a [`RoundOutcome`] or a [`RoundError`]. The
//! latter two invalidate the published aggregate.
//!
//! # Fan-out and fan-in
//!
//! Tasks are dispatched to all sites concurrently (see [here][requests]). The results are drained
//! at a fixed poll interval, which is also where an abort is noticed. A site computation which is
//! still running when its phase closes is not interrupted, its result is dropped.
//!
//! # Events
//!
//! Everyone who is interested in the progress of the round can subscribe to the phase and
//! aggregate events via the [`EventSubscriber`] returned by [`RoundInitializer::init()`].
//!
//! [settings]: ../settings/index.html
//! [requests]: ./requests/index.html
//! [`PhaseName::Init`]: crate::state_machine::phases::PhaseName::Init
//! [`PhaseName::Collecting`]: crate::state_machine::phases::PhaseName::Collecting
//! [`PhaseName::Aggregating`]: crate::state_machine::phases::PhaseName::Aggregating
//! [`PhaseName::Distributing`]: crate::state_machine::phases::PhaseName::Distributing
//! [`PrivacyParameters`]: crate::privacy::PrivacyParameters

pub mod abort;
pub mod events;
pub mod phases;
pub mod requests;
#[cfg(test)]
pub(crate) mod tests;

use std::sync::Arc;

use derive_more::From;

pub use self::phases::{DistributionIncomplete, RoundError};
use self::{
    abort::{abort_channel, AbortHandle},
    events::{AggregateUpdate, EventPublisher, EventSubscriber},
    phases::{
        Aborted,
        Aggregating,
        Collecting,
        Distributing,
        Done,
        Failure,
        Init,
        PhaseName,
        PhaseState,
        Shared,
    },
};
use crate::{
    aggregator::GlobalAggregate,
    privacy::ParametersSource,
    settings::RoundSettings,
    sites::{Site, SiteId},
};

/// The result of a successful round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    /// The global aggregate.
    pub aggregate: GlobalAggregate,
    /// The sites whose contributions were aggregated, in order of their counts in the aggregate.
    pub contributors: Vec<SiteId>,
    /// The sites which acknowledged the global aggregate.
    pub acknowledged: Vec<SiteId>,
    /// Set if too few sites acknowledged the global aggregate.
    pub incomplete: Option<DistributionIncomplete>,
}

/// The state machine with all its states.
#[derive(From)]
pub enum StateMachine {
    Init(PhaseState<Init>),
    Collecting(PhaseState<Collecting>),
    Aggregating(PhaseState<Aggregating>),
    Distributing(PhaseState<Distributing>),
    Done(PhaseState<Done>),
    Failure(PhaseState<Failure>),
    Aborted(PhaseState<Aborted>),
}

impl StateMachine {
    /// Gets the name of the current phase.
    pub fn phase(&self) -> PhaseName {
        match self {
            StateMachine::Init(_) => PhaseName::Init,
            StateMachine::Collecting(_) => PhaseName::Collecting,
            StateMachine::Aggregating(_) => PhaseName::Aggregating,
            StateMachine::Distributing(_) => PhaseName::Distributing,
            StateMachine::Done(_) => PhaseName::Done,
            StateMachine::Failure(_) => PhaseName::Failure,
            StateMachine::Aborted(_) => PhaseName::Aborted,
        }
    }

    /// Runs the round to completion.
    ///
    /// # Errors
    /// Fails if the round ends in the failure or the aborted state.
    pub async fn run(mut self) -> Result<RoundOutcome, RoundError> {
        loop {
            self = match self {
                StateMachine::Init(state) => state.run_phase().await,
                StateMachine::Collecting(state) => state.run_phase().await,
                StateMachine::Aggregating(state) => state.run_phase().await,
                StateMachine::Distributing(state) => state.run_phase().await,
                StateMachine::Done(state) => return Ok(state.finish()),
                StateMachine::Failure(state) => return Err(state.finish()),
                StateMachine::Aborted(state) => return Err(state.finish()),
            };
        }
    }
}

/// The initializer of a new round.
pub struct RoundInitializer {
    settings: RoundSettings,
    parameters: Box<dyn ParametersSource>,
    sites: Vec<Arc<dyn Site>>,
}

impl RoundInitializer {
    /// Creates a new [`RoundInitializer`].
    pub fn new(
        settings: RoundSettings,
        parameters: impl ParametersSource + 'static,
        sites: Vec<Arc<dyn Site>>,
    ) -> Self {
        Self {
            settings,
            parameters: Box::new(parameters),
            sites,
        }
    }

    /// Initializes a new [`StateMachine`] in the init state.
    ///
    /// The returned [`AbortHandle`] aborts the round, the [`EventSubscriber`] follows it.
    pub fn init(self) -> (StateMachine, AbortHandle, EventSubscriber) {
        let (events, subscriber) =
            EventPublisher::init(PhaseName::Init, AggregateUpdate::Invalidate);
        let (abort_handle, abort_signal) = abort_channel();
        let shared = Shared::new(self.settings, self.sites, events, abort_signal);
        let state_machine: StateMachine = PhaseState::<Init>::new(shared, self.parameters).into();
        (state_machine, abort_handle, subscriber)
    }
}
