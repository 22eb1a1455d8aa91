//! Live alarm feed over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::AppState;
use broadcast::Subscription;

/// Upgrade and push every alarm open/close event as a JSON text frame
pub async fn alarm_feed(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_events(socket, state))
}

async fn push_events(mut socket: WebSocket, state: Arc<AppState>) {
    let Subscription { id, mut receiver } = state.monitor.subscribe();
    info!(subscriber = %id, "Alarm feed client connected");

    loop {
        tokio::select! {
            event = receiver.recv() => {
                // None: the dispatcher dropped us for falling behind
                let Some(event) = event else {
                    warn!(subscriber = %id, "Alarm feed subscriber pruned");
                    break;
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(subscriber = %id, "Failed to encode alarm event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => debug!(subscriber = %id, "Ignoring client message: {:?}", other),
                }
            }
        }
    }

    state.monitor.unsubscribe(id);
    info!(subscriber = %id, "Alarm feed client disconnected");
}
