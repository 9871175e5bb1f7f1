//! This module provides the [`StateMachine`]'s `EventSubscriber` and `EventPublisher` types.
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

use std::sync::Arc;

use tokio::sync::watch;

use crate::{aggregator::GlobalAggregate, state_machine::phases::PhaseName};

#[derive(Debug, Clone, PartialEq)]
/// An update of the global aggregate.
pub enum AggregateUpdate {
    Invalidate,
    New(Arc<GlobalAggregate>),
}

/// The sending half of the round events.
#[derive(Debug)]
pub struct EventPublisher {
    phase_tx: EventBroadcaster<PhaseName>,
    aggregate_tx: EventBroadcaster<AggregateUpdate>,
}

/// The receiving half of the round events.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    phase_rx: EventListener<PhaseName>,
    aggregate_rx: EventListener<AggregateUpdate>,
}

impl EventPublisher {
    /// Initializes a new event publisher with the given initial events.
    pub fn init(phase: PhaseName, aggregate: AggregateUpdate) -> (Self, EventSubscriber) {
        let (phase_tx, phase_rx) = watch::channel(phase);
        let (aggregate_tx, aggregate_rx) = watch::channel(aggregate);

        let publisher = EventPublisher {
            phase_tx: phase_tx.into(),
            aggregate_tx: aggregate_tx.into(),
        };

        let subscriber = EventSubscriber {
            phase_rx: phase_rx.into(),
            aggregate_rx: aggregate_rx.into(),
        };

        (publisher, subscriber)
    }

    /// Emits a phase event.
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        self.phase_tx.broadcast(phase);
    }

    /// Emits an aggregate event.
    pub fn broadcast_aggregate(&mut self, update: AggregateUpdate) {
        self.aggregate_tx.broadcast(update);
    }
}

impl EventSubscriber {
    /// Gets a listener for new phase events.
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        self.phase_rx.clone()
    }

    /// Gets a listener for new aggregate events.
    pub fn aggregate_listener(&self) -> EventListener<AggregateUpdate> {
        self.aggregate_rx.clone()
    }
}

/// A listener for round events.
///
/// It can be used to either retrieve the latest event emitted by the coordinator (with
/// [`EventListener::get_latest`]) or to wait for the next one (with [`EventListener::changed`]).
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<E>);

impl<E> From<watch::Receiver<E>> for EventListener<E> {
    fn from(receiver: watch::Receiver<E>) -> Self {
        EventListener(receiver)
    }
}

impl<E> EventListener<E>
where
    E: Clone,
{
    pub fn get_latest(&self) -> E {
        self.0.borrow().clone()
    }

    /// Waits for the next event. Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<E> {
        self.0.changed().await.ok()?;
        Some(self.0.borrow().clone())
    }
}

/// A channel to send events to all the [`EventListener`]s.
#[derive(Debug)]
pub struct EventBroadcaster<E>(watch::Sender<E>);

impl<E> EventBroadcaster<E> {
    /// Sends `event` to all the listeners.
    fn broadcast(&self, event: E) {
        // we don't care whether there's a listener or not
        let _ = self.0.send(event);
    }
}

impl<E> From<watch::Sender<E>> for EventBroadcaster<E> {
    fn from(sender: watch::Sender<E>) -> Self {
        Self(sender)
    }
}
