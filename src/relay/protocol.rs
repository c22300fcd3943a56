//! Relay wire frames.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use crate::chat::ChatMessage;
use serde::{Deserialize, Serialize};

/// Client → relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Join the room for a conversation id.
    JoinConversation(String),

    /// Fan a message out to the other members of a room.
    SendMessage(OutgoingMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub message: ChatMessage,
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Handshake acknowledgement, sent once right after the upgrade.
    #[serde(rename_all = "camelCase")]
    Connect { connection_id: String },

    /// A message sent by another member of a joined room.
    ReceiveMessage(ChatMessage),

    /// A frame from this connection could not be understood. The connection stays open.
    Error { message: String },
}

impl ClientFrame {
    pub fn join(conversation_id: impl Into<String>) -> Self {
        ClientFrame::JoinConversation(conversation_id.into())
    }

    pub fn send(conversation_id: impl Into<String>, message: ChatMessage) -> Self {
        ClientFrame::SendMessage(OutgoingMessage {
            conversation_id: conversation_id.into(),
            message,
        })
    }
}
