//! WebSocket status stream for workflow runs.
//!
//! `GET /ws/{run_id}` registers a status connection for the run and forwards
//! every published event as a JSON text frame. Client frames are ignored
//! except `Close`.

use crate::api_workflow::is_valid_run_id;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    http::StatusCode,
    response::IntoResponse,
};
use conductor_engine::StatusConnection;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

/// Handler for `GET /ws/{run_id}`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !is_valid_run_id(&run_id) {
        tracing::warn!("rejected status stream for invalid run id");
        return StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, run_id))
}

/// Handles one status stream connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, run_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let StatusConnection {
        id: connection_id,
        receiver: mut rx,
        ..
    } = state.registry.register(run_id.clone());
    tracing::info!(run_id = %run_id, "status stream connected");

    // Forward events until the registry drops our sender (replaced or
    // unregistered) or the socket fails.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(AxumMessage::Close(None)).await;
    });

    let recv_run_id = run_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                AxumMessage::Close(_) => break,
                _ => tracing::trace!(run_id = %recv_run_id, "ignoring client frame"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Cleanup with connection_id check: a replaced connection must neither
    // remove nor cancel on behalf of its successor.
    let was_current = state.registry.remove_connection(&run_id, connection_id);
    tracing::info!(run_id = %run_id, replaced = !was_current, "status stream closed");

    if was_current && state.cancel_on_disconnect && state.supervisor.cancel(&run_id) {
        tracing::info!(run_id = %run_id, "cancelling run after status stream closed");
    }
}
