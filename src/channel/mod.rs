//! Push Channel
//!
//! A push channel is one authenticated real-time connection per session.
//! The transport owns the connection and its reconnect policy; consumers see
//! it through a [`Subscription`]:
//!
//! - `next()` yields connection lifecycle and notification events in
//!   arrival order
//! - `close()` shuts the transport down; it is idempotent and nothing is
//!   delivered once it has been called

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::errors::SyncResult;
use crate::models::{NotificationRecord, Session};

pub mod ws;

pub use ws::WebSocketTransport;

/// Event name carrying a notification payload.
pub const NOTIFICATION_EVENT: &str = "notification";

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    ConnectError(String),
    Disconnected(String),
    Notification(NotificationRecord),
}

/// Opens push channels for sessions.
pub trait PushTransport: Send + Sync {
    /// Open a channel for `session`. Connecting happens in the background;
    /// failures to connect arrive as [`ChannelEvent::ConnectError`].
    fn subscribe(&self, session: &Session) -> SyncResult<Subscription>;
}

struct CloseState {
    closed: AtomicBool,
    signal: watch::Sender<bool>,
}

/// Cloneable handle that can close a subscription from anywhere.
#[derive(Clone)]
pub struct SubscriptionHandle {
    state: Arc<CloseState>,
}

impl SubscriptionHandle {
    /// Close the channel. Returns `true` only for the call that actually
    /// closed it.
    pub fn close(&self) -> bool {
        let first = !self.state.closed.swap(true, Ordering::SeqCst);
        if first {
            let _ = self.state.signal.send(true);
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

/// Consumer half of a push channel.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    handle: SubscriptionHandle,
}

/// Producer half, held by the transport.
pub struct EventSink {
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Subscription {
    /// Create a connected sink/subscription pair.
    pub fn pair() -> (EventSink, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (signal, shutdown) = watch::channel(false);
        let handle = SubscriptionHandle {
            state: Arc::new(CloseState {
                closed: AtomicBool::new(false),
                signal,
            }),
        };
        (
            EventSink { events: tx, shutdown },
            Subscription { events: rx, handle },
        )
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn close(&self) -> bool {
        self.handle.close()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Next event, or `None` once the subscription is closed or the
    /// transport has gone away.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        if self.handle.is_closed() {
            return None;
        }
        let event = self.events.recv().await?;
        // Closed while we were parked: drop whatever raced in.
        if self.handle.is_closed() {
            return None;
        }
        Some(event)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.close();
    }
}

impl EventSink {
    /// Deliver an event. Returns `false` when nobody is listening anymore.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        self.events.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.events.is_closed()
    }

    /// Resolves once the subscription is closed or dropped.
    pub async fn closed(&mut self) {
        if self.is_closed() {
            return;
        }
        tokio::select! {
            _ = self.shutdown.wait_for(|closed| *closed) => {}
            _ = self.events.closed() => {}
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut sub) = Subscription::pair();
        assert!(sink.emit(ChannelEvent::Connected));
        assert!(sink.emit(ChannelEvent::Disconnected("bye".into())));
        assert_eq!(sub.next().await, Some(ChannelEvent::Connected));
        assert_eq!(sub.next().await, Some(ChannelEvent::Disconnected("bye".into())));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_sink, sub) = Subscription::pair();
        let handle = sub.handle();
        assert!(handle.close());
        assert!(!handle.close());
        assert!(!sub.close());
        assert!(sub.is_closed());
    }

    #[tokio::test]
    async fn test_nothing_delivered_after_close() {
        let (sink, mut sub) = Subscription::pair();
        sink.emit(ChannelEvent::Connected);
        sub.close();
        assert!(!sink.emit(ChannelEvent::Connected));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_sink_observes_close() {
        let (mut sink, sub) = Subscription::pair();
        let handle = sub.handle();
        let waiter = tokio::spawn(async move {
            sink.closed().await;
            sink.is_closed()
        });
        handle.close();
        let closed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(closed);
    }

    #[tokio::test]
    async fn test_dropping_subscription_closes_sink() {
        let (mut sink, sub) = Subscription::pair();
        drop(sub);
        tokio::time::timeout(Duration::from_secs(1), sink.closed())
            .await
            .unwrap();
        assert!(!sink.emit(ChannelEvent::Connected));
    }

    #[tokio::test]
    async fn test_transport_gone_ends_stream() {
        let (sink, mut sub) = Subscription::pair();
        drop(sink);
        assert_eq!(sub.next().await, None);
    }
}
