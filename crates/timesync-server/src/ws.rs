//! WebSocket boundary.
//!
//! Each upgraded socket is split in two: a writer task drains the
//! connection's outbound queue onto the wire, while the reader loop feeds
//! text frames to the [`ConnectionManager`]. Whichever side ends first tears
//! the connection down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::connections::ConnectionManager;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let manager = state.connections.clone();
    ws.on_upgrade(move |socket| handle_socket(manager, socket))
}

async fn handle_socket(manager: Arc<ConnectionManager>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = manager.on_connect();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %id, error = %e, "Dropping unserializable message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!(conn = %id, "Socket write failed");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let reader = manager.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => reader.on_message(id, &text).await,
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by axum; binary frames carry nothing.
                Ok(_) => {}
                Err(e) => {
                    debug!(conn = %id, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    manager.on_disconnect(id);
}
