use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use crate::installer::{Event, InstallerManager};

pub fn routes() -> Router<InstallerManager> {
    Router::new().route("/", get(websocket_handler))
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(manager): State<InstallerManager>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, manager))
}

/// Status every second, plus every manager event as it happens.
async fn handle_socket(socket: WebSocket, manager: InstallerManager) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = manager.subscribe_events();

    let status = manager.status().await;
    let msg = json!({ "type": "status", "payload": status });
    if let Err(e) = sender.send(Message::Text(msg.to_string())).await {
        error!("Failed to send initial status: {}", e);
        return;
    }

    let mut send_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));

        loop {
            let msg = tokio::select! {
                received = event_rx.recv() => match received {
                    Ok(Event::StateChanged(_)) => {
                        let status = manager.status().await;
                        json!({ "type": "status", "payload": status })
                    }
                    Ok(event) => json!(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, {} events dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = interval.tick() => {
                    let status = manager.status().await;
                    json!({ "type": "status", "payload": status })
                }
            };

            if sender.send(Message::Text(msg.to_string())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => debug!("Ignoring WebSocket message: {}", text),
                Message::Close(_) => {
                    debug!("WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    debug!("WebSocket connection closed");
}
