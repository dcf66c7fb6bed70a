//! Synchronization Hub
//!
//! A single actor task owns the observer registry and fans every published
//! message out to all registered observers, in the order the hub received
//! them. Producers never wait on delivery: [`Hub::publish`] only enqueues.
//!
//! Registration changes travel on their own unbounded channel, which the
//! actor always drains before taking the next message. Every observer has a
//! bounded outbox; a delivery that cannot be queued within the write timeout
//! closes that observer without affecting the others.

mod observer;

pub use observer::{ObserverHandle, ObserverState};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use conveyor_core::message::SyncMessage;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ObserverId = Uuid;

/// Hub error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub queue is full, message dropped")]
    QueueFull,

    #[error("hub is not running")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the inbound queue shared by all producers
    pub queue_capacity: usize,
    /// Capacity of each observer's outbox
    pub observer_buffer: usize,
    /// How long a delivery may wait for room in an outbox
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            observer_buffer: 256,
            write_timeout: Duration::from_secs(5),
        }
    }
}

enum Envelope {
    Message(SyncMessage),
    /// Answered once everything queued before it has been offered
    Flush(oneshot::Sender<usize>),
}

pub(crate) enum Control {
    Subscribe {
        id: ObserverId,
        outbox: mpsc::Sender<SyncMessage>,
        registered: oneshot::Sender<()>,
    },
    Unsubscribe {
        id: ObserverId,
    },
}

#[derive(Debug, Default)]
struct HubStats {
    dropped: AtomicU64,
    observers: AtomicUsize,
}

/// Cloneable handle to the hub
#[derive(Clone)]
pub struct Hub {
    inbox: mpsc::Sender<Envelope>,
    control: mpsc::UnboundedSender<Control>,
    observer_buffer: usize,
    stats: Arc<HubStats>,
}

impl Hub {
    /// Creates the hub and the worker that must be run for delivery to happen
    pub fn new(config: HubConfig) -> (Hub, HubWorker) {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(HubStats::default());

        let hub = Hub {
            inbox: inbox_tx,
            control: control_tx,
            observer_buffer: config.observer_buffer.max(1),
            stats: stats.clone(),
        };

        let worker = HubWorker {
            inbox: inbox_rx,
            control: control_rx,
            observers: Vec::new(),
            write_timeout: config.write_timeout,
            stats,
        };

        (hub, worker)
    }

    /// Creates the hub and runs its worker on the current runtime
    pub fn spawn(config: HubConfig) -> Hub {
        let (hub, worker) = Self::new(config);
        tokio::spawn(worker.run());
        hub
    }

    /// Queues a message for every observer without waiting
    ///
    /// When the queue is full the message is dropped and counted.
    pub fn publish(&self, message: SyncMessage) -> Result<(), HubError> {
        match self.inbox.try_send(Envelope::Message(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "Hub queue full, dropping message");
                Err(HubError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(HubError::Stopped),
        }
    }

    /// Registers a new observer
    ///
    /// Every message published after this returns reaches the observer.
    pub async fn subscribe(&self) -> Result<ObserverHandle, HubError> {
        let id = Uuid::new_v4();
        let (outbox, messages) = mpsc::channel(self.observer_buffer);
        let (registered_tx, registered_rx) = oneshot::channel();

        self.control
            .send(Control::Subscribe {
                id,
                outbox,
                registered: registered_tx,
            })
            .map_err(|_| HubError::Stopped)?;

        registered_rx.await.map_err(|_| HubError::Stopped)?;

        Ok(ObserverHandle::new(id, messages, self.control.clone()))
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        // a stopped hub has nobody left to remove
        let _ = self.control.send(Control::Unsubscribe { id });
    }

    /// Waits until every message published before this call has been
    /// offered to all observers; returns the number of observers
    pub async fn flush(&self) -> Result<usize, HubError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.inbox
            .send(Envelope::Flush(done_tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        done_rx.await.map_err(|_| HubError::Stopped)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn observer_count(&self) -> usize {
        self.stats.observers.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Observer {
    id: ObserverId,
    state: ObserverState,
    outbox: mpsc::Sender<SyncMessage>,
}

/// The actor owning the observer registry
pub struct HubWorker {
    inbox: mpsc::Receiver<Envelope>,
    control: mpsc::UnboundedReceiver<Control>,
    observers: Vec<Observer>,
    write_timeout: Duration,
    stats: Arc<HubStats>,
}

impl HubWorker {
    /// Runs until every [`Hub`] handle is dropped
    pub async fn run(mut self) {
        debug!("Hub worker started");

        loop {
            tokio::select! {
                biased;

                Some(control) = self.control.recv() => self.handle_control(control),

                envelope = self.inbox.recv() => match envelope {
                    Some(Envelope::Message(message)) => self.broadcast(message).await,
                    Some(Envelope::Flush(done)) => {
                        let _ = done.send(self.observers.len());
                    }
                    None => break,
                },
            }
        }

        // dropping the outboxes ends every observer's stream
        self.observers.clear();
        self.stats.observers.store(0, Ordering::Relaxed);

        debug!("Hub worker stopped");
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Subscribe {
                id,
                outbox,
                registered,
            } => {
                if registered.send(()).is_err() {
                    // subscriber gave up before registration finished
                    return;
                }

                self.observers.push(Observer {
                    id,
                    state: ObserverState::Connecting.advance(ObserverState::Open),
                    outbox,
                });
                self.stats
                    .observers
                    .store(self.observers.len(), Ordering::Relaxed);
                info!(observer = %id, total = self.observers.len(), "Observer registered");
            }
            Control::Unsubscribe { id } => self.deregister(id, "closed by observer"),
        }
    }

    async fn broadcast(&mut self, message: SyncMessage) {
        let mut failed = Vec::new();

        for observer in &self.observers {
            if !observer.state.accepts_deliveries() {
                continue;
            }

            match observer
                .outbox
                .send_timeout(message.clone(), self.write_timeout)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Closed(_)) => failed.push((observer.id, "disconnected")),
                Err(SendTimeoutError::Timeout(_)) => failed.push((observer.id, "write timed out")),
            }
        }

        debug!(
            action = message.action(),
            observers = self.observers.len() - failed.len(),
            "Broadcast delivered"
        );

        for (id, reason) in failed {
            self.deregister(id, reason);
        }
    }

    fn deregister(&mut self, id: ObserverId, reason: &str) {
        let Some(index) = self.observers.iter().position(|o| o.id == id) else {
            return;
        };

        let mut observer = self.observers.remove(index);
        observer.state = observer.state.advance(ObserverState::Closing);
        observer.state = observer.state.advance(ObserverState::Closed);
        self.stats
            .observers
            .store(self.observers.len(), Ordering::Relaxed);

        warn!(observer = %id, reason, total = self.observers.len(), "Observer deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_message(pipeline_id: i64) -> SyncMessage {
        SyncMessage::DeletePipeline { pipeline_id }
    }

    #[tokio::test]
    async fn test_publish_without_observers_is_fine() {
        let hub = Hub::spawn(HubConfig::default());
        hub.publish(delete_message(1)).unwrap();
        assert_eq!(hub.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overflow_drops_newest() {
        let (hub, worker) = Hub::new(HubConfig {
            queue_capacity: 2,
            ..HubConfig::default()
        });

        hub.publish(delete_message(1)).unwrap();
        hub.publish(delete_message(2)).unwrap();
        assert_eq!(hub.publish(delete_message(3)), Err(HubError::QueueFull));
        assert_eq!(hub.dropped_messages(), 1);

        tokio::spawn(worker.run());
        assert_eq!(hub.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_observer_receives_in_order() {
        let hub = Hub::spawn(HubConfig::default());
        let mut observer = hub.subscribe().await.unwrap();
        assert_eq!(observer.state(), ObserverState::Open);

        for id in 1..=5 {
            hub.publish(delete_message(id)).unwrap();
        }

        for id in 1..=5 {
            assert_eq!(observer.recv().await, Some(delete_message(id)));
        }
    }

    #[tokio::test]
    async fn test_stopped_hub_reports_errors() {
        let (hub, worker) = Hub::new(HubConfig::default());
        drop(worker);

        assert_eq!(hub.publish(delete_message(1)), Err(HubError::Stopped));
        assert!(matches!(hub.subscribe().await, Err(HubError::Stopped)));
    }
}
