//! This module provides the `PhaseStates` of the [`StateMachine`].
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

mod aborted;
mod aggregating;
mod collecting;
mod distributing;
mod done;
mod failure;
mod handler;
mod init;
mod phase;

pub use self::{
    aborted::Aborted,
    aggregating::Aggregating,
    collecting::Collecting,
    distributing::Distributing,
    done::Done,
    failure::{DistributionIncomplete, Failure, RoundError},
    handler::{Handler, RejectionError},
    init::Init,
    phase::{Phase, PhaseName, PhaseState, Shared},
};
