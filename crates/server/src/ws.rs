//! WebSocket streaming of task updates.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::time::Instant;

use crate::dto::WsGreeting;
use crate::state::AppState;

const TRACING_TARGET: &str = "taskforge_server::ws";

/// Keep-alive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(54);

pub(crate) async fn task_updates(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| stream_updates(socket, state))
}

async fn stream_updates(mut socket: WebSocket, state: AppState) {
    let mut subscription = state.hub.register().await;
    tracing::debug!(
        target: TRACING_TARGET,
        subscriber_id = subscription.id(),
        "websocket subscriber connected"
    );

    let greeting = WsGreeting {
        kind: "connection".into(),
        message: "Connected to task update stream".into(),
        client_count: state.hub.subscriber_count(),
    };
    if let Ok(text) = serde_json::to_string(&greeting) {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            update = subscription.recv() => {
                // A closed subscription means the hub evicted us as too slow
                // (or shut down); either way the stream is over.
                let Some(update) = update else { break };
                let Ok(text) = serde_json::to_string(&update) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client payloads are drained and ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let id = subscription.id();
    state.hub.unregister(id).await;
    tracing::debug!(
        target: TRACING_TARGET,
        subscriber_id = id,
        "websocket subscriber disconnected"
    );
}
