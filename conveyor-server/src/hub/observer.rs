//! Observer side of the hub

use conveyor_core::message::SyncMessage;
use tokio::sync::mpsc;

use super::{Control, ObserverId};

/// Lifecycle of an observer
///
/// `Connecting -> Open -> Closing -> Closed`, where any live state may jump
/// straight to `Closed` on failure. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ObserverState {
    pub fn can_advance_to(self, next: ObserverState) -> bool {
        use ObserverState::*;

        matches!(
            (self, next),
            (Connecting, Open | Closing | Closed) | (Open, Closing | Closed) | (Closing, Closed)
        )
    }

    /// The next state, or the current one when the transition is not allowed
    pub fn advance(self, next: ObserverState) -> ObserverState {
        if self.can_advance_to(next) { next } else { self }
    }

    pub fn accepts_deliveries(self) -> bool {
        self == ObserverState::Open
    }
}

/// A registered observer's end of the hub
///
/// Dropping the handle deregisters the observer.
pub struct ObserverHandle {
    id: ObserverId,
    messages: mpsc::Receiver<SyncMessage>,
    control: mpsc::UnboundedSender<Control>,
    state: ObserverState,
}

impl ObserverHandle {
    pub(crate) fn new(
        id: ObserverId,
        messages: mpsc::Receiver<SyncMessage>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            id,
            messages,
            control,
            state: ObserverState::Open,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn state(&self) -> ObserverState {
        self.state
    }

    /// Next message; `None` once the hub has let go of this observer
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        if self.state == ObserverState::Closed {
            return None;
        }

        let message = self.messages.recv().await;
        if message.is_none() {
            self.state = self.state.advance(ObserverState::Closed);
        }
        message
    }

    /// Asks the hub to stop delivering; messages already queued can still
    /// be received
    pub fn close(&mut self) {
        if self.state.can_advance_to(ObserverState::Closing) {
            self.state = ObserverState::Closing;
            let _ = self.control.send(Control::Unsubscribe { id: self.id });
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.close();
    }
}
