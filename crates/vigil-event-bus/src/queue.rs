//! Bounded in-memory event queue.

use tokio::sync::mpsc;
use vigil_event_types::Event;

/// Why an event could not be queued without waiting.
#[derive(Debug)]
pub enum EnqueueError {
    /// The queue is at capacity.
    Full(Event),
    /// The consumer has stopped.
    Closed(Event),
}

impl EnqueueError {
    /// Recover the event that was not queued.
    pub fn into_event(self) -> Event {
        match self {
            Self::Full(event) | Self::Closed(event) => event,
        }
    }
}

/// Producer half of the bounded queue feeding the batch scheduler.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::Sender<Event>,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue an event without waiting.
    pub fn try_enqueue(&self, event: Event) -> Result<(), EnqueueError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => EnqueueError::Full(event),
            mpsc::error::TrySendError::Closed(event) => EnqueueError::Closed(event),
        })
    }

    /// Queue an event, waiting for room. Fails only once the queue is closed.
    pub async fn enqueue_waiting(&self, event: Event) -> Result<(), Event> {
        self.sender.send(event).await.map_err(|e| e.0)
    }

    /// Events currently waiting.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Whether the consumer has closed the queue.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
