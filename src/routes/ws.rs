use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::hub::BroadcastHub;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

/// Forwards hub messages to one socket until either side goes away, then
/// removes the connection from the hub.
async fn serve_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (id, mut outbound) = hub.connect();
    info!(connection = %id, connections = hub.connection_count(), "push client connected");
    let (mut sink, mut inbound) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Inbound frames carry nothing for us; reading them keeps ping/pong and
    // close handling alive.
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(id);
    debug!(connection = %id, "push client disconnected");
}
