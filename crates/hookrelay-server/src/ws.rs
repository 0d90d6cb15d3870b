//! WebSocket subscriber endpoint.
//!
//! Each socket becomes a [`Channel`] backed by an unbounded queue: the
//! core enqueues without blocking, and a pump task drains the queue into
//! the socket. Liveness flows the other way, from pong frames and
//! `{"type":"ping"}` texts into the connection manager.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use hookrelay_core::{AdmissionError, Channel, ChannelMessage, DropCause, SendError};

use crate::admissions::AdmissionSurface;
use crate::state::AppState;

/// Channel handing messages to the socket pump task.
pub struct WsChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<ChannelMessage>>>,
}

impl WsChannel {
    fn new(tx: mpsc::UnboundedSender<ChannelMessage>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl Channel for WsChannel {
    fn send(&self, message: ChannelMessage) -> Result<(), SendError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SendError::Closed);
        };
        tx.send(message).map_err(|_| SendError::Closed)
    }

    fn close(&self) {
        // Dropping the sender ends the pump task, which closes the socket.
        self.tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// `GET /ws/:secret` upgrade handler.
///
/// Admission is pre-checked before the upgrade so rejected clients get a
/// proper HTTP status; the authoritative admit runs again once the
/// socket exists.
pub async fn handler(
    ws: WebSocketUpgrade,
    Path(secret): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let denial = if !state.registry.contains(&secret) {
        Some((StatusCode::FORBIDDEN, AdmissionError::UnknownTenant))
    } else if !state.registry.is_admissible(&secret) {
        Some((StatusCode::FORBIDDEN, AdmissionError::TenantDisabled))
    } else {
        let limit = state.registry.effective_limit(&secret);
        if state.manager.count(&secret) >= limit as usize {
            Some((
                StatusCode::TOO_MANY_REQUESTS,
                AdmissionError::ConnectionLimitExceeded { limit },
            ))
        } else {
            None
        }
    };

    if let Some((status, error)) = denial {
        state.admissions.record(
            &secret,
            AdmissionSurface::WebSocket,
            false,
            Some(error.to_string()),
        );
        tracing::info!(%error, "websocket rejected");
        return (status, error.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, secret))
}

async fn handle_socket(socket: WebSocket, state: AppState, secret: String) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = Arc::new(WsChannel::new(tx));

    let id = match state.manager.admit(&secret, channel.clone()) {
        Ok(id) => id,
        Err(error) => {
            // Lost the race between pre-check and admit. Close without a
            // data frame; rejected clients learn nothing beyond the close.
            state.admissions.record(
                &secret,
                AdmissionSurface::WebSocket,
                false,
                Some(error.to_string()),
            );
            tracing::info!(%error, "websocket admission lost race");
            let mut socket = socket;
            let _ = socket.close().await;
            return;
        }
    };
    state
        .admissions
        .record(&secret, AdmissionSurface::WebSocket, true, None);

    // The notice goes through the channel so it is ordered ahead of any
    // dispatched payloads.
    let _ = channel.send(ChannelMessage::Text(
        json!({ "type": "connected", "connection_id": id.0 }).to_string(),
    ));

    let (mut sink, mut stream) = socket.split();
    let pump = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match message {
                ChannelMessage::Text(text) => Message::Text(text),
                ChannelMessage::Ping => Message::Ping(Vec::new()),
                ChannelMessage::Pong => Message::Pong(Vec::new()),
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let cause = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if is_client_ping(&text) {
                    state.manager.record_liveness(id);
                    let _ = channel.send(ChannelMessage::Text(json!({ "type": "pong" }).to_string()));
                }
            }
            Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                state.manager.record_liveness(id);
            }
            Some(Ok(Message::Close(_))) | None => break DropCause::TransportClosed,
            Some(Ok(Message::Binary(_))) => {}
            Some(Err(error)) => {
                tracing::debug!(connection = %id, %error, "websocket read error");
                break DropCause::TransportError;
            }
        }
    };

    state.manager.remove(id, cause);
    channel.close();
    let _ = pump.await;
}

/// Application-level keep-alive: a text frame `{"type":"ping"}`.
fn is_client_ping(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok_and(|value| value["type"] == "ping")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delivers_until_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = WsChannel::new(tx);

        channel.send(ChannelMessage::Text("a".into())).unwrap();
        channel.send(ChannelMessage::Ping).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ChannelMessage::Text("a".into()));
        assert_eq!(rx.try_recv().unwrap(), ChannelMessage::Ping);

        channel.close();
        assert!(channel.is_closed());
        assert_eq!(channel.send(ChannelMessage::Pong), Err(SendError::Closed));
        // The receiver sees end-of-stream after close.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_closed_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = WsChannel::new(tx);
        drop(rx);
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send(ChannelMessage::Ping),
            Err(SendError::Closed)
        ));
    }

    #[test]
    fn client_ping_detection() {
        assert!(is_client_ping(r#"{"type":"ping"}"#));
        assert!(is_client_ping(r#"{"type":"ping","seq":4}"#));
        assert!(!is_client_ping(r#"{"type":"pong"}"#));
        assert!(!is_client_ping("not json"));
    }
}
