//! WebSocket endpoint: wires raw socket I/O to coordinator events.

use std::net::SocketAddr;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::coordinator::ServerEvent;
use crate::error::ServerError;
use crate::registry::SocketId;

#[derive(Clone)]
struct WsState {
    events_tx: mpsc::UnboundedSender<ServerEvent>,
}

pub fn build_router(events_tx: mpsc::UnboundedSender<ServerEvent>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(WsState { events_tx })
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.events_tx))
}

/// One physical connection: frames in become coordinator events, the
/// coordinator's outbound queue drains to the socket, and either side
/// ending tears the other down.
async fn handle_socket(socket: WebSocket, events_tx: mpsc::UnboundedSender<ServerEvent>) {
    let socket_id = SocketId::new();
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<String>();
    if events_tx
        .send(ServerEvent::SocketConnected {
            socket_id,
            sink: sink_tx,
        })
        .is_err()
    {
        return;
    }
    debug!(socket = %socket_id, "Socket attached");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = sink_rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // the coordinator dropped our sink: close from this side
        let _ = sender.close().await;
    });

    let frame_tx = events_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if frame_tx
                        .send(ServerEvent::Frame { socket_id, text })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let _ = events_tx.send(ServerEvent::SocketClosed { socket_id });
    debug!(socket = %socket_id, "Socket detached");
}

pub async fn serve(
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let app = build_router(events_tx);

    info!(addr = %addr, "Starting WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Transport(format!("bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    Ok(())
}
