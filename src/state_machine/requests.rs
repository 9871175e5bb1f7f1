//! Fan-out of tasks to the sites and fan-in of their results.
//!
//! Every site executes its task on a task of its own, so that dispatching never waits for a single
//! site. The results are sent back over an unbounded channel which the phases drain at each poll
//! boundary.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info_span, warn, Span};
use tracing_futures::Instrument;

use crate::sites::{Site, SiteError, SiteId, Task, TaskResult};

/// The result of a task returned by a site.
#[derive(Debug)]
pub struct SiteResponse {
    /// The site which executed the task.
    pub site: SiteId,
    /// The span of the site task.
    pub span: Span,
    /// The result of the task.
    pub result: Result<TaskResult, SiteError>,
}

/// The receiving half of the responses to a broadcast task.
#[derive(Debug)]
pub struct ResponseReceiver {
    rx: mpsc::UnboundedReceiver<SiteResponse>,
    expected: usize,
}

impl ResponseReceiver {
    /// Wraps the receiving half of a channel into which `expected` sites respond.
    pub fn new(rx: mpsc::UnboundedReceiver<SiteResponse>, expected: usize) -> Self {
        Self { rx, expected }
    }

    /// Receives the next pending response, if any.
    pub fn try_recv(&mut self) -> Result<SiteResponse, TryRecvError> {
        self.rx.try_recv()
    }

    /// Gets the number of sites the task was sent to.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Closes the channel. Results arriving afterwards are dropped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Sends a task to all sites concurrently.
pub fn broadcast(sites: &[Arc<dyn Site>], task: Task) -> ResponseReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    let name = task.name();

    for site in sites {
        let site = site.clone();
        let task = task.clone();
        let tx = tx.clone();
        let span = info_span!("site_task", site = %site.id(), task = %name);

        tokio::spawn(
            async move {
                debug!("executing task");
                let result = AssertUnwindSafe(site.execute(task))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        warn!("site panicked");
                        Err(SiteError::Crashed("the task panicked".to_string()))
                    });
                let response = SiteResponse {
                    site: site.id().clone(),
                    span: Span::current(),
                    result,
                };
                if tx.send(response).is_err() {
                    debug!("phase already closed: dropping late result");
                }
            }
            .instrument(span),
        );
    }

    ResponseReceiver::new(rx, sites.len())
}
