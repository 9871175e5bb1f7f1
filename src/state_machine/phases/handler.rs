use displaydoc::Display;
use thiserror::Error;
use tokio::{
    sync::mpsc::error::TryRecvError,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    estimator::MalformedInputError,
    sites::{SiteId, Task, TaskName, TaskResult},
    state_machine::{
        phases::{Phase, PhaseState},
        requests::{broadcast, ResponseReceiver, SiteResponse},
        RoundError,
    },
};

/// Errors which can occur while a phase handles the result of a site.
#[derive(Debug, Display, Error)]
pub enum RejectionError {
    /// The site failed to execute the task: {0}.
    SiteFailed(String),
    /// The result is malformed: {0}.
    Malformed(#[from] MalformedInputError),
    /// The result does not answer the {0} task.
    UnexpectedResult(TaskName),
    /// The site already returned a result.
    Duplicate,
}

/// A trait that must be implemented by a state to handle the results of the sites.
pub trait Handler {
    /// Handles a successful result of a site.
    ///
    /// # Errors
    /// Fails if the result is not acceptable.
    fn handle_response(&mut self, site: &SiteId, result: TaskResult) -> Result<(), RejectionError>;

    /// Checks whether a failed site task fails the round, unless the round ignores result errors.
    fn site_error_is_fatal(&self) -> bool {
        true
    }
}

/// A counter to keep track of handled results.
#[derive(Debug)]
pub(in crate::state_machine) struct Counter {
    /// The minimal number of accepted results.
    pub(in crate::state_machine) min: usize,
    /// The number of sites the task was sent to.
    pub(in crate::state_machine) expected: usize,
    /// The number of results accepted.
    pub(in crate::state_machine) accepted: usize,
    /// The number of results rejected.
    pub(in crate::state_machine) rejected: usize,
}

impl Counter {
    /// Creates a new result counter.
    fn new(min: usize, expected: usize) -> Self {
        Self {
            min,
            expected,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Checks whether enough results have been accepted.
    fn has_quorum(&self) -> bool {
        self.accepted >= self.min
    }

    /// Checks whether every site has responded.
    fn has_all_responses(&self) -> bool {
        self.accepted + self.rejected >= self.expected
    }

    /// Increments the counter for accepted results.
    fn increment_accepted(&mut self) {
        self.accepted += 1;
        debug!(
            "{} results accepted (min {} required)",
            self.accepted, self.min,
        );
    }

    /// Increments the counter for rejected results.
    fn increment_rejected(&mut self) {
        self.rejected += 1;
        debug!("{} results rejected", self.rejected);
    }
}

impl<S> PhaseState<S>
where
    Self: Phase + Handler,
{
    /// Broadcasts a task to all sites and collects their results.
    ///
    /// The results are drained at every poll boundary, where the closing conditions are checked:
    /// - an abort signal aborts the phase,
    /// - once the quorum is reached, the phase closes when every site has responded, the grace
    ///   period has elapsed or no further results can arrive,
    /// - the phase fails if the timeout elapses or no further results can arrive before the quorum
    ///   is reached.
    ///
    /// Results arriving after the phase closed are dropped.
    pub(in crate::state_machine) async fn collect(
        &mut self,
        task: Task,
    ) -> Result<Counter, RoundError> {
        let responses = broadcast(&self.shared.sites, task);
        self.collect_responses(responses).await
    }

    /// Collects the results of an already broadcast task.
    pub(in crate::state_machine) async fn collect_responses(
        &mut self,
        mut responses: ResponseReceiver,
    ) -> Result<Counter, RoundError> {
        let settings = self.shared.settings;
        let mut counter = Counter::new(settings.min_clients, responses.expected());

        info!("collecting results");
        debug!(
            "polling every {:?} for min {} results, grace period {:?}, timeout {:?}",
            settings.poll_interval(),
            settings.min_clients,
            settings.grace_period(),
            settings.timeout(),
        );

        let started = Instant::now();
        let mut quorum_reached_at = None;
        let mut ticks = interval(settings.poll_interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            ticks.tick().await;
            if self.shared.abort.is_aborted() {
                warn!("round aborted while collecting results");
                break Err(RoundError::Aborted { phase: Self::NAME });
            }

            let drained = match self.drain(&mut responses, &mut counter) {
                Ok(drained) => drained,
                Err(err) => break Err(err),
            };
            let now = Instant::now();

            if counter.has_quorum() {
                let reached_at = *quorum_reached_at.get_or_insert(now);
                if counter.has_all_responses() {
                    debug!("all sites responded");
                    break Ok(());
                }
                if now.duration_since(reached_at) >= settings.grace_period() {
                    debug!("grace period elapsed");
                    break Ok(());
                }
                if drained {
                    warn!("site tasks terminated without responding");
                    break Ok(());
                }
            } else if drained {
                if counter.has_all_responses() {
                    warn!("all sites responded without reaching the quorum");
                    break Err(self.quorum_failure(&counter));
                }
                break Err(RoundError::Internal(
                    "site tasks terminated without responding",
                ));
            }

            if let Some(timeout) = settings.timeout() {
                if now.duration_since(started) >= timeout {
                    if counter.has_quorum() {
                        debug!("timeout elapsed");
                        break Ok(());
                    }
                    warn!("timeout elapsed without reaching the quorum");
                    break Err(self.quorum_failure(&counter));
                }
            }
        };
        responses.close();

        info!(
            "in total {} results accepted (min {} required)",
            counter.accepted, counter.min,
        );
        info!("in total {} results rejected", counter.rejected);
        result.map(|_| counter)
    }

    /// Handles all pending responses.
    ///
    /// Returns `true` if no further response can arrive.
    fn drain(
        &mut self,
        responses: &mut ResponseReceiver,
        counter: &mut Counter,
    ) -> Result<bool, RoundError> {
        loop {
            match responses.try_recv() {
                Ok(response) => self.process_single(response, counter)?,
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Disconnected) => return Ok(true),
            }
        }
    }

    /// Processes a single response.
    ///
    /// A failed site task fails the round if the phase treats site errors as fatal and the round
    /// does not ignore result errors. Otherwise, and for a returned result which is not acceptable,
    /// the result is rejected.
    fn process_single(
        &mut self,
        response: SiteResponse,
        counter: &mut Counter,
    ) -> Result<(), RoundError> {
        let SiteResponse { site, span, result } = response;
        let _span_guard = span.enter();

        let handled = match result {
            Ok(result) => self.handle_response(&site, result),
            Err(err) => {
                if !self.shared.settings.ignore_result_error && self.site_error_is_fatal() {
                    warn!("site failed: {}", err);
                    return Err(RoundError::SiteResult {
                        site,
                        phase: Self::NAME,
                        reason: err.to_string(),
                    });
                }
                Err(RejectionError::SiteFailed(err.to_string()))
            }
        };

        match handled {
            Ok(()) => {
                debug!("result accepted");
                counter.increment_accepted();
            }
            Err(err) => {
                warn!("result rejected: {}", err);
                counter.increment_rejected();
            }
        }
        Ok(())
    }

    fn quorum_failure(&self, counter: &Counter) -> RoundError {
        RoundError::QuorumFailure {
            phase: Self::NAME,
            accepted: counter.accepted,
            required: counter.min,
        }
    }
}
