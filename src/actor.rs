//! Actor plumbing.
//!
//! Every actor owns a [`Receiver`] and processes its events one at a time on
//! its own task. Events carry the [`Span`] that was current when they were
//! sent, so handlers run inside the sender's span.

use std::fmt;

use tokio::sync::mpsc;
use tracing::Span;

pub mod broadcast;
pub mod lifecycle;

pub struct Sender<Event>(mpsc::UnboundedSender<(Span, Event)>);

pub struct Receiver<Event>(mpsc::UnboundedReceiver<(Span, Event)>);

pub fn channel<Event>() -> (Sender<Event>, Receiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sender(tx), Receiver(rx))
}

impl<Event> Clone for Sender<Event> {
    fn clone(&self) -> Self { Sender(self.0.clone()) }
}

impl<Event> fmt::Debug for Sender<Event> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").field("closed", &self.0.is_closed()).finish()
    }
}

impl<Event> Sender<Event> {
    /// Queues an event. Never blocks; fails only when the actor has stopped.
    pub fn send(&self, event: Event) -> Result<(), SendError<Event>> {
        self.0.send((Span::current(), event)).map_err(|mpsc::error::SendError((_, event))| SendError(event))
    }

    pub fn is_closed(&self) -> bool { self.0.is_closed() }
}

impl<Event> Receiver<Event> {
    pub async fn recv(&mut self) -> Option<(Span, Event)> { self.0.recv().await }

    pub fn try_recv(&mut self) -> Option<(Span, Event)> { self.0.try_recv().ok() }
}

/// The receiving actor is gone; the undelivered event is handed back.
pub struct SendError<Event>(pub Event);

impl<Event> fmt::Debug for SendError<Event> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("SendError(..)") }
}

impl<Event> fmt::Display for SendError<Event> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("actor channel closed")
    }
}

impl<Event> std::error::Error for SendError<Event> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order_with_sender_span() {
        let (tx, mut rx) = channel::<u32>();
        let span = tracing::info_span!("sender");
        span.in_scope(|| {
            tx.send(1).unwrap();
            tx.send(2).unwrap();
        });

        let (first_span, first) = rx.recv().await.unwrap();
        let (_, second) = rx.recv().await.unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(first_span.id(), span.id());
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn send_after_receiver_dropped_returns_event() {
        let (tx, rx) = channel::<&'static str>();
        drop(rx);
        assert!(tx.is_closed());
        let err = tx.send("lost").unwrap_err();
        assert_eq!(err.0, "lost");
        assert_eq!(err.to_string(), "actor channel closed");
    }
}
