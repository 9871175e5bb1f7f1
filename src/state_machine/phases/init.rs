use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    privacy::{ParametersSource, PrivacyParameters},
    state_machine::{
        phases::{Collecting, Phase, PhaseName, PhaseState, Shared},
        RoundError,
        StateMachine,
    },
};

/// The init state.
pub struct Init {
    /// The source of the shared privacy parameters.
    source: Box<dyn ParametersSource>,
    /// The parameters loaded from the source.
    parameters: Option<Arc<PrivacyParameters>>,
}

impl fmt::Debug for Init {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Init")
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[async_trait]
impl Phase for PhaseState<Init> {
    const NAME: PhaseName = PhaseName::Init;

    async fn process(&mut self) -> Result<(), RoundError> {
        info!("loading the round parameters");
        let parameters = self.private.source.load().await?;
        debug!("round parameters: {:?}", parameters);
        self.private.parameters = Some(Arc::new(parameters));
        Ok(())
    }

    fn next(mut self) -> StateMachine {
        match self.private.parameters.take() {
            Some(parameters) => PhaseState::<Collecting>::new(self.shared, parameters).into(),
            None => self.into_failure_state(RoundError::Internal("round parameters not loaded")),
        }
    }
}

impl PhaseState<Init> {
    /// Creates a new init state.
    pub fn new(shared: Shared, source: Box<dyn ParametersSource>) -> Self {
        Self {
            private: Init {
                source,
                parameters: None,
            },
            shared,
        }
    }
}
