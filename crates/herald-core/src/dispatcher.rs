//! Broadcast dispatch of application events to channel rooms.
//!
//! Ingestion sources (HTTP and Redis) push [`EventMessage`]s into a bounded
//! queue through an [`EventSink`]. A single [`BroadcastDispatcher`] task
//! drains the queue and emits each event to the room named by its channel.

use herald_protocol::ServerFrame;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::message::{EventMessage, IngestSource};
use crate::transport::Transport;

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher has stopped accepting events.
    #[error("Event queue closed")]
    Closed,
}

/// How an event was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// To every socket in the room except the originating one.
    ToOthers,
    /// To every socket in the room.
    ToAll,
}

/// Create a bounded event queue.
#[must_use]
pub fn event_queue(capacity: usize) -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx }, EventReceiver { rx })
}

/// Producer half of the event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<(IngestSource, EventMessage)>,
}

impl EventSink {
    /// Enqueue an event, waiting for space if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] once the dispatcher is gone.
    pub async fn publish(
        &self,
        source: IngestSource,
        message: EventMessage,
    ) -> Result<(), DispatchError> {
        self.tx
            .send((source, message))
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

/// Consumer half of the event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<(IngestSource, EventMessage)>,
}

impl EventReceiver {
    /// Receive the next event, or `None` once every sink is dropped and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<(IngestSource, EventMessage)> {
        self.rx.recv().await
    }

    /// Stop accepting new events. Already queued events can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Fans application events out to channel rooms.
pub struct BroadcastDispatcher {
    transport: Arc<dyn Transport>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Emit one event to its channel's room.
    ///
    /// When the event names an originating socket that is still connected,
    /// that socket is excluded.
    pub fn broadcast(&self, message: &EventMessage) -> Delivery {
        let frame = ServerFrame::broadcast(
            message.event.clone(),
            &message.channel,
            message.data.clone(),
        );

        match message.origin() {
            Some(origin) if self.transport.is_connected(origin) => {
                self.transport
                    .emit_to_room_except(origin, &message.channel, frame);
                Delivery::ToOthers
            }
            _ => {
                self.transport.emit_to_room(&message.channel, frame);
                Delivery::ToAll
            }
        }
    }

    /// Drain the queue until every sink has been dropped.
    pub async fn run(self, events: EventReceiver) {
        self.run_until(events, std::future::pending::<()>()).await;
    }

    /// Drain the queue until every sink has been dropped or `shutdown`
    /// completes. On shutdown the queue is closed and events already
    /// queued are still delivered.
    pub async fn run_until<F>(self, mut events: EventReceiver, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Broadcast dispatcher started");
        tokio::pin!(shutdown);

        let mut dispatched: u64 = 0;
        let mut closing = false;
        loop {
            let next = if closing {
                events.recv().await
            } else {
                tokio::select! {
                    next = events.recv() => next,
                    () = &mut shutdown => {
                        debug!("Dispatcher shutting down, draining queue");
                        events.close();
                        closing = true;
                        continue;
                    }
                }
            };

            let Some((source, message)) = next else {
                break;
            };
            let delivery = self.broadcast(&message);
            dispatched += 1;
            trace!(
                source = %source,
                channel = %message.channel,
                event = %message.event,
                ?delivery,
                "Dispatched event"
            );
        }

        debug!(dispatched, "Event queue drained");
        info!("Broadcast dispatcher stopped");
    }
}
