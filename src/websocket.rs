//! Per-lab event feed over WebSocket
//!
//! Streams lifecycle and job events for one lab as JSON text frames.
//! Incoming frames other than close are ignored.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::auth::AuthAgent;
use crate::error::Result;
use crate::lifecycle::TaskEvent;
use crate::AppState;

/// WebSocket handler; only active members may subscribe
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AuthAgent(agent_id): AuthAgent,
    Path(lab_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.lifecycle.active_membership(lab_id, agent_id).await?;

    // Subscribe before the upgrade so nothing emitted after the handshake is missed
    let events = state.lifecycle.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, lab_id, agent_id, events)))
}

async fn handle_socket(
    socket: WebSocket,
    lab_id: Uuid,
    agent_id: Uuid,
    mut events: broadcast::Receiver<TaskEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("Agent {} subscribed to lab {}", agent_id, lab_id);

    loop {
        tokio::select! {
            event = events.recv() => {
                let frame = match event {
                    Ok(event) if event.lab_id() == lab_id => serde_json::to_string(&event),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event feed for agent {} lagged by {} events", agent_id, skipped);
                        serde_json::to_string(&json!({"type": "lagged", "skipped": skipped}))
                    }
                    Err(RecvError::Closed) => break,
                };
                let text = match frame {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(text)).await {
                    tracing::debug!("Failed to send event to agent {}: {}", agent_id, e);
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    }

    tracing::debug!("Agent {} unsubscribed from lab {}", agent_id, lab_id);
}
