//! The sites taking part in a round and the tasks the coordinator sends them.

mod local;

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::local::{LocalSite, DATA_FILE, GLOBAL_RESULT_FILE, LOCAL_RESULT_FILE};
use crate::{
    aggregator::GlobalAggregate,
    estimator::{EstimatorError, SiteContribution},
    privacy::PrivacyParameters,
};

#[derive(
    Debug, Display, From, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
/// The identity of a site.
pub struct SiteId(String);

impl From<&str> for SiteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl SiteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
/// A task broadcast by the coordinator.
///
/// The payloads are shared read-only between all sites.
pub enum Task {
    /// Compute the local contribution under the given parameters.
    ComputeLocalEstimate(Arc<PrivacyParameters>),
    /// Accept and persist the global estimate.
    AcceptGlobalAverage(Arc<GlobalAggregate>),
}

impl Task {
    pub fn name(&self) -> TaskName {
        match self {
            Self::ComputeLocalEstimate(_) => TaskName::ComputeLocalEstimate,
            Self::AcceptGlobalAverage(_) => TaskName::AcceptGlobalAverage,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
/// The name of a task as known to the sites.
pub enum TaskName {
    #[display(fmt = "get_local_average_and_count")]
    ComputeLocalEstimate,
    #[display(fmt = "accept_global_average")]
    AcceptGlobalAverage,
}

#[derive(Debug, Clone, PartialEq)]
/// The result of a task.
pub enum TaskResult {
    LocalEstimate(SiteContribution),
    Acknowledged,
}

/// Errors raised by a site while executing a task.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to (de)serialize: {0}")]
    Json(#[from] serde_json::Error),
    #[error("the site crashed: {0}")]
    Crashed(String),
}

#[async_trait]
/// A data-holding site.
///
/// Sites are independent of each other and only ever talk to the coordinator.
pub trait Site: Send + Sync + 'static {
    /// Gets the identity of the site.
    fn id(&self) -> &SiteId;

    /// Executes a task.
    ///
    /// # Errors
    /// Fails if the task cannot be completed. A failing site is excluded from the round or fails
    /// it, depending on the round settings.
    async fn execute(&self, task: Task) -> Result<TaskResult, SiteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names() {
        let params = PrivacyParameters::new(1., 0.1, 1., None).unwrap();
        let task = Task::ComputeLocalEstimate(Arc::new(params));
        assert_eq!(task.name().to_string(), "get_local_average_and_count");

        let task = Task::AcceptGlobalAverage(Arc::new(GlobalAggregate::default()));
        assert_eq!(task.name().to_string(), "accept_global_average");
    }

    #[test]
    fn test_site_id() {
        let id = SiteId::from("site-1");
        assert_eq!(id.to_string(), "site-1");
        assert_eq!(id, SiteId::from(String::from("site-1")));
        assert!(SiteId::from("site-1") < SiteId::from("site-2"));
    }
}
