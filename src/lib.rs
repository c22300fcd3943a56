//! Real-time chat core for the rental marketplace: conversation store,
//! relay service, per-conversation client sessions and the sidebar directory.

pub mod bus;
pub mod chat;
pub mod config;
pub mod directory;
pub mod entity;
pub mod error;
pub mod relay;
pub mod session;
pub mod store;

pub use chat::{conversation_id, ChatConversation, ChatMessage, NewConversation, Participant};
pub use entity::{Property, Role, User};
pub use error::{ChatError, Result};
pub use store::{AppendOutcome, ConversationStore, SqliteStore};
