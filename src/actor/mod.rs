//! The moving parts: window launcher, activation saga, recovery, window
//! cycling, and the controller that owns their session state.
//!
//! Workers report back to the controller over [`channel`]. Each event carries
//! the sender's tracing span so the controller's handling nests under the
//! operation that produced it.

pub mod activation;
pub mod controller;
pub mod cycle;
pub mod launcher;
pub mod ownership;
pub mod recovery;

#[cfg(test)]
pub(crate) mod testing;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{Span, trace};

pub struct Sender<Event>(UnboundedSender<(Span, Event)>);
pub type Receiver<Event> = UnboundedReceiver<(Span, Event)>;

pub fn channel<Event>() -> (Sender<Event>, Receiver<Event>) {
    let (tx, rx) = unbounded_channel();
    (Sender(tx), rx)
}

impl<Event> Clone for Sender<Event> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<Event> Sender<Event> {
    /// Sends an event, dropping it if the receiver is gone.
    pub fn send(&self, event: Event) {
        if self.try_send(event).is_err() {
            trace!("receiver closed; dropping event");
        }
    }

    pub fn try_send(&self, event: Event) -> Result<(), SendError<(Span, Event)>> {
        self.0.send((Span::current(), event))
    }
}
