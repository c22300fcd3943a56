use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use super::{
    protocol::{ClientFrame, OutgoingMessage, ServerFrame},
    rooms::{ConnectionId, RoomRegistry},
};

/// Path clients connect to.
pub const SOCKET_PATH: &str = "/api/socket";

#[derive(Clone)]
pub struct RelayState {
    pub rooms: Arc<RoomRegistry>,
}

impl RelayState {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }
}

pub struct RelayServer {
    state: RelayState,
}

impl RelayServer {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            state: RelayState::new(Arc::new(RoomRegistry::new(channel_capacity))),
        }
    }

    pub fn rooms(&self) -> Arc<RoomRegistry> {
        self.state.rooms.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(SOCKET_PATH, get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
    rooms: usize,
}

async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        connections: state.rooms.connection_count().await,
        rooms: state.rooms.room_count().await,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs for the lifetime of one connection.
async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sink, mut stream) = socket.split();
    let (connection_id, mut outbound) = state.rooms.register().await;
    info!(connection_id = %connection_id, "Socket connected");

    state
        .rooms
        .send_to(
            &connection_id,
            ServerFrame::Connect {
                connection_id: connection_id.to_string(),
            },
        )
        .await;

    // Writer: drain this connection's queue onto the socket.
    let writer_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection_id = %writer_id, "Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json)).await {
                debug!(connection_id = %writer_id, "Send error, closing connection: {}", e);
                break;
            }
        }
    });

    // Reader: apply client frames.
    let reader_state = state.clone();
    let reader_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => handle_text(&reader_state, &reader_id, &text).await,
                Ok(Message::Binary(_)) => {
                    warn!(connection_id = %reader_id, "Ignoring binary frame");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(reason)) => {
                    debug!(connection_id = %reader_id, ?reason, "Client sent close frame");
                    break;
                }
                Err(e) => {
                    debug!(connection_id = %reader_id, "Receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.rooms.disconnect(&connection_id).await;
    info!(connection_id = %connection_id, "Socket disconnected");
}

async fn handle_text(state: &RelayState, connection_id: &ConnectionId, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection_id = %connection_id, "Malformed frame ignored: {}", e);
            state
                .rooms
                .send_to(
                    connection_id,
                    ServerFrame::Error {
                        message: format!("malformed frame: {}", e),
                    },
                )
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::JoinConversation(conversation_id) => {
            state.rooms.join(connection_id, &conversation_id).await;
            info!(connection_id = %connection_id, conversation_id = %conversation_id, "Joined conversation");
        }
        ClientFrame::SendMessage(OutgoingMessage {
            conversation_id,
            message,
        }) => {
            let message_id = message.id.clone();
            let delivered = state
                .rooms
                .broadcast_from(
                    connection_id,
                    &conversation_id,
                    ServerFrame::ReceiveMessage(message),
                )
                .await;
            debug!(
                connection_id = %connection_id,
                conversation_id = %conversation_id,
                message_id = %message_id,
                delivered,
                "Relayed message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    #[tokio::test]
    async fn malformed_frame_answers_with_error_and_keeps_connection() {
        let server = RelayServer::new(8);
        let state = server.state.clone();
        let (id, mut rx) = state.rooms.register().await;

        handle_text(&state, &id, "{not json").await;

        assert!(matches!(rx.recv().await, Some(ServerFrame::Error { .. })));
        assert_eq!(state.rooms.connection_count().await, 1);
    }

    #[tokio::test]
    async fn send_frame_reaches_other_room_members() {
        let server = RelayServer::new(8);
        let state = server.state.clone();
        let (a, _rx_a) = state.rooms.register().await;
        let (b, mut rx_b) = state.rooms.register().await;

        handle_text(&state, &a, r#"{"event":"joinConversation","data":"p1-t1"}"#).await;
        handle_text(&state, &b, r#"{"event":"joinConversation","data":"p1-t1"}"#).await;

        let message = ChatMessage {
            id: "m1".into(),
            chat_id: "p1-t1".into(),
            sender_id: "t1".into(),
            sender_name: "Amit".into(),
            text: "Hi".into(),
            timestamp: 7,
        };
        let text = serde_json::to_string(&ClientFrame::send("p1-t1", message.clone())).unwrap();
        handle_text(&state, &a, &text).await;

        assert_eq!(rx_b.recv().await, Some(ServerFrame::ReceiveMessage(message)));
    }

    #[test]
    fn router_builds() {
        let _router = RelayServer::new(8).router();
    }
}
