//! Subscriber channel abstraction.
//!
//! The connection table never touches sockets directly: it holds opaque
//! [`Channel`] capabilities that expose a non-blocking send, an idempotent
//! close, and a closed-state query. The server provides the real
//! WebSocket-backed variant; [`RecordingChannel`] is the test double.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// A message on a subscriber channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// A payload or control frame, serialized JSON text.
    Text(String),
    /// Liveness probe (supervisor to subscriber).
    Ping,
    /// Liveness response (subscriber keep-alive echo).
    Pong,
}

/// Channel send failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The channel is already closed.
    #[error("Channel closed")]
    Closed,
    /// The transport rejected the message.
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Opaque bidirectional message sink owned by the connection manager.
///
/// `send` must not block: implementations enqueue and let the transport
/// drain asynchronously, so dispatch can issue sends outside the
/// connection-table lock. `close` must be idempotent — the heartbeat
/// supervisor and an admin kick may race to close the same channel.
pub trait Channel: Send + Sync {
    /// Queue a message for the subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the channel is closed or the transport
    /// rejected the message.
    fn send(&self, message: ChannelMessage) -> Result<(), SendError>;

    /// Close the channel. A second close is a no-op.
    fn close(&self);

    /// Whether the channel has been closed (locally or by the peer).
    fn is_closed(&self) -> bool;
}

/// In-memory channel that records everything sent to it.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<ChannelMessage>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingChannel {
    /// Create an open channel that accepts every send.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Messages sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().clone()
    }

    /// Count of sent messages.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Channel for RecordingChannel {
    fn send(&self, message: ChannelMessage) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError::Transport("injected failure".to_string()));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sends_in_order() {
        let channel = RecordingChannel::new();
        channel.send(ChannelMessage::Text("a".into())).unwrap();
        channel.send(ChannelMessage::Ping).unwrap();
        assert_eq!(
            channel.sent(),
            vec![ChannelMessage::Text("a".into()), ChannelMessage::Ping]
        );
    }

    #[test]
    fn close_is_idempotent() {
        let channel = RecordingChannel::new();
        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert_eq!(channel.send(ChannelMessage::Ping), Err(SendError::Closed));
    }

    #[test]
    fn injected_failures_surface_as_transport_errors() {
        let channel = RecordingChannel::new();
        channel.fail_sends(true);
        assert!(matches!(
            channel.send(ChannelMessage::Text("x".into())),
            Err(SendError::Transport(_))
        ));
        assert!(!channel.is_closed());
    }
}
