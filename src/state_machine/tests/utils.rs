use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tracing_subscriber::*;

use crate::{
    aggregator::GlobalAggregate,
    estimator::SiteContribution,
    matrix::ConnectivityMatrix,
    privacy::PrivacyParameters,
    settings::RoundSettings,
    sites::{Site, SiteError, SiteId, Task, TaskResult},
};

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .try_init();
}

pub fn parameters() -> PrivacyParameters {
    PrivacyParameters::new(1., 1e-5, 1., Some(3)).unwrap()
}

pub fn round_settings() -> RoundSettings {
    RoundSettings {
        min_clients: 2,
        wait_time_after_min_received: 2,
        timeout: 0,
        poll_interval: 500,
        ignore_result_error: false,
    }
}

/// How a [`TestSite`] reacts to the tasks of a round.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Responds to every task after `delay` with a contribution of `count` subjects.
    Respond { delay: Duration, count: u64 },
    /// Fails every task.
    Fail,
    /// Never responds.
    Silent,
    /// Contributes `count` subjects but fails to accept the global aggregate.
    FailOnAccept { count: u64 },
    /// Contributes `count` subjects but never acknowledges the global aggregate.
    SilentOnAccept { count: u64 },
}

impl Behavior {
    pub fn respond(count: u64) -> Self {
        Self::Respond {
            delay: Duration::ZERO,
            count,
        }
    }

    pub fn respond_after(millis: u64, count: u64) -> Self {
        Self::Respond {
            delay: Duration::from_millis(millis),
            count,
        }
    }
}

/// A site which answers with a fixed 3x3 contribution.
#[derive(Debug)]
pub struct TestSite {
    id: SiteId,
    behavior: Behavior,
    accepted: Mutex<Option<Arc<GlobalAggregate>>>,
}

impl TestSite {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: SiteId::from(id),
            behavior,
            accepted: Mutex::new(None),
        })
    }

    /// Gets the global aggregate this site accepted, if any.
    pub fn accepted(&self) -> Option<Arc<GlobalAggregate>> {
        self.accepted.lock().unwrap().clone()
    }
}

pub fn contribution(params: &PrivacyParameters, count: u64) -> SiteContribution {
    SiteContribution {
        mean_matrix: ConnectivityMatrix::from_upper_triangle(&[0.5, 0.5, 0.5]).unwrap(),
        subject_count: count,
        epsilon: params.epsilon,
        delta: params.delta,
        clipping_bound: params.clipping_bound,
        low_rank_components: params.low_rank_components.unwrap_or(3),
    }
}

#[async_trait]
impl Site for TestSite {
    fn id(&self) -> &SiteId {
        &self.id
    }

    async fn execute(&self, task: Task) -> Result<TaskResult, SiteError> {
        let count = match self.behavior {
            Behavior::Respond { delay, count } => {
                tokio::time::sleep(delay).await;
                count
            }
            Behavior::FailOnAccept { count } | Behavior::SilentOnAccept { count } => count,
            Behavior::Fail => return Err(SiteError::Crashed("test failure".to_string())),
            Behavior::Silent => futures::future::pending::<u64>().await,
        };

        match task {
            Task::ComputeLocalEstimate(params) => {
                Ok(TaskResult::LocalEstimate(contribution(&params, count)))
            }
            Task::AcceptGlobalAverage(aggregate) => match self.behavior {
                Behavior::FailOnAccept { .. } => Err(SiteError::Crashed("test failure".to_string())),
                Behavior::SilentOnAccept { .. } => futures::future::pending().await,
                _ => {
                    *self.accepted.lock().unwrap() = Some(aggregate);
                    Ok(TaskResult::Acknowledged)
                }
            },
        }
    }
}

/// Erases the concrete site types.
pub fn sites(sites: &[Arc<TestSite>]) -> Vec<Arc<dyn Site>> {
    sites
        .iter()
        .map(|site| site.clone() as Arc<dyn Site>)
        .collect()
}
