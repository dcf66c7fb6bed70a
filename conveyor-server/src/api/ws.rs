//! WebSocket Observer Endpoint
//!
//! Each connection registers one hub observer and forwards every delta to
//! the client as a JSON text frame. Anything the client sends is ignored;
//! a close frame, a read error or a slow write ends the connection.

use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::hub::Hub;
use crate::repository::Repository;

/// GET /ws
pub async fn ws_handler<R: Repository>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<R>>,
) -> Response {
    let hub = state.hub.clone();
    let write_timeout = state.observer_write_timeout;
    ws.on_upgrade(move |socket| observe(socket, hub, write_timeout))
}

async fn observe(socket: WebSocket, hub: Hub, write_timeout: Duration) {
    let mut observer = match hub.subscribe().await {
        Ok(observer) => observer,
        Err(e) => {
            warn!("Rejecting observer: {}", e);
            return;
        }
    };

    let id = observer.id();
    info!(observer = %id, "Observer connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            message = observer.recv() => {
                let Some(message) = message else {
                    debug!(observer = %id, "Hub closed the observer");
                    break;
                };

                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {}: {}", message.action(), e);
                        continue;
                    }
                };

                match tokio::time::timeout(write_timeout, sender.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(observer = %id, "Write failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!(observer = %id, "Write timed out");
                        break;
                    }
                }
            }

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(observer = %id, "Read failed: {}", e);
                    break;
                }
            },
        }
    }

    observer.close();
    info!(observer = %id, "Observer disconnected");
}
