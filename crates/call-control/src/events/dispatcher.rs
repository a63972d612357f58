//! Per-participant ordered event delivery
//!
//! Producers never wait for consumers. Each dispatcher owns a single worker
//! task fed by an unbounded queue, so events of one participant reach the
//! broadcast tap and every observer in the order they were dispatched.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::{ExceptionHandler, ParticipantEvent, ParticipantObserver};
use crate::errors::{CallControlError, Result};
use crate::types::MediaObjectId;

struct Delivery {
    event: ParticipantEvent,
    done: oneshot::Sender<()>,
}

/// Pending delivery of one dispatched event
#[derive(Debug)]
pub struct DispatchHandle {
    done: Option<oneshot::Receiver<()>>,
}

impl DispatchHandle {
    /// Handle for an event that was never queued
    pub fn undelivered() -> Self {
        Self { done: None }
    }

    /// Wait until every observer has seen the event.
    ///
    /// Returns `false` when the dispatcher shut down before delivering it.
    pub async fn delivered(self) -> bool {
        match self.done {
            Some(rx) => rx.await.is_ok(),
            None => false,
        }
    }
}

/// Broadcast receiver over a participant's events
pub struct EventSubscriber {
    receiver: broadcast::Receiver<ParticipantEvent>,
}

impl EventSubscriber {
    /// Receive the next event
    pub async fn receive(&mut self) -> Result<ParticipantEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| CallControlError::internal(format!("Failed to receive event: {}", e)))
    }

    /// Try to receive an event without blocking
    pub fn try_receive(&mut self) -> Result<Option<ParticipantEvent>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(CallControlError::internal(format!("Failed to try receive event: {}", e))),
        }
    }
}

type Observers = Arc<RwLock<Vec<Arc<dyn ParticipantObserver>>>>;
type ExceptionHandlers = Arc<RwLock<Vec<Arc<dyn ExceptionHandler>>>>;

/// Event sink of one participant
pub struct EventDispatcher {
    owner: MediaObjectId,
    queue: mpsc::UnboundedSender<Delivery>,
    tap: broadcast::Sender<ParticipantEvent>,
    observers: Observers,
    exception_handlers: ExceptionHandlers,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("owner", &self.owner)
            .field("observers", &self.observers.read().len())
            .field("subscribers", &self.tap.receiver_count())
            .finish()
    }
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its worker on the current Tokio runtime
    pub fn new(owner: MediaObjectId, capacity: usize) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| CallControlError::illegal_state("Event dispatcher needs a Tokio runtime"))?;

        let (queue, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let (tap, _) = broadcast::channel(capacity.max(1));
        let observers: Observers = Arc::new(RwLock::new(Vec::new()));
        let exception_handlers: ExceptionHandlers = Arc::new(RwLock::new(Vec::new()));

        let worker_tap = tap.clone();
        let worker_observers = observers.clone();
        let worker_handlers = exception_handlers.clone();
        runtime.spawn(async move {
            while let Some(delivery) = rx.recv().await {
                deliver(owner, &worker_tap, &worker_observers, &worker_handlers, &delivery.event).await;
                let _ = delivery.done.send(());
            }
            debug!("Event dispatcher for {} stopped", owner);
        });

        Ok(Self {
            owner,
            queue,
            tap,
            observers,
            exception_handlers,
        })
    }

    /// Queue `event` for delivery and return immediately
    pub fn dispatch(&self, event: ParticipantEvent) -> DispatchHandle {
        let (done, rx) = oneshot::channel();
        let name = event.name();
        match self.queue.send(Delivery { event, done }) {
            Ok(()) => DispatchHandle { done: Some(rx) },
            Err(_) => {
                warn!("Dropping {} event for {}: dispatcher stopped", name, self.owner);
                DispatchHandle::undelivered()
            }
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.tap.subscribe(),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ParticipantObserver>) {
        self.observers.write().push(observer);
    }

    /// Remove a previously added observer, compared by identity
    pub fn remove_observer(&self, observer: &Arc<dyn ParticipantObserver>) {
        self.observers.write().retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn add_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.exception_handlers.write().push(handler);
    }
}

async fn deliver(
    owner: MediaObjectId,
    tap: &broadcast::Sender<ParticipantEvent>,
    observers: &Observers,
    handlers: &ExceptionHandlers,
    event: &ParticipantEvent,
) {
    // No subscribers is not an error.
    let _ = tap.send(event.clone());

    let snapshot: Vec<_> = observers.read().iter().cloned().collect();
    for observer in snapshot {
        let Err(error) = observer.on_event(event).await else {
            continue;
        };
        let registered: Vec<_> = handlers.read().iter().cloned().collect();
        if registered.is_empty() {
            warn!("Observer of {} failed on {}: {}", owner, event.name(), error);
            continue;
        }
        let keep_going = registered
            .iter()
            .fold(true, |keep, handler| handler.handle(&error, event) && keep);
        if !keep_going {
            debug!("Delivery of {} to {} stopped by exception handler", event.name(), owner);
            break;
        }
    }
}
