use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    bus::{EventBus, SessionEvent},
    chat::{ChatConversation, ChatMessage},
    entity::User,
    error::Result,
    relay::{ClientFrame, ServerFrame},
    store::{AppendOutcome, ConversationStore},
};

use super::link::LinkEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Joined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Stored locally and handed to the relay.
    Sent(ChatMessage),
    /// Blank text; nothing was stored or sent.
    Empty,
    /// Not joined to the relay room, so sending is disabled.
    NotJoined,
    /// The open conversation does not exist; nothing was stored or sent.
    NotFound,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Applied,
    Duplicate,
    /// Sent by the viewing user; dropped without touching the store.
    SelfEcho,
    /// Belongs to a conversation other than the open one.
    OtherConversation,
    NotFound,
    Closed,
}

/// Drives one open conversation: relay link state, optimistic sends and
/// reconciliation of peer messages into the store.
///
/// The cached conversation is only ever replaced with what the store returns.
pub struct SessionController {
    user: User,
    conversation_id: String,
    store: Arc<dyn ConversationStore>,
    relay: mpsc::UnboundedSender<ClientFrame>,
    bus: Arc<EventBus>,
    state: SessionState,
    conversation: Option<ChatConversation>,
    closed: bool,
}

impl SessionController {
    pub fn new(
        user: User,
        conversation_id: impl Into<String>,
        store: Arc<dyn ConversationStore>,
        relay: mpsc::UnboundedSender<ClientFrame>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            user,
            conversation_id: conversation_id.into(),
            store,
            relay,
            bus,
            state: SessionState::Disconnected,
            conversation: None,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation(&self) -> Option<&ChatConversation> {
        self.conversation.as_ref()
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Whether the view should enable message submission.
    pub fn can_send(&self) -> bool {
        !self.closed && self.state == SessionState::Joined && self.conversation.is_some()
    }

    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        match event {
            LinkEvent::Connecting => self.set_state(SessionState::Connecting),
            LinkEvent::Connected { connection_id } => {
                self.set_state(SessionState::Connected);
                if self.relay.send(ClientFrame::join(&self.conversation_id)).is_err() {
                    warn!(conversation_id = %self.conversation_id, "Relay link gone before join");
                    self.set_state(SessionState::Disconnected);
                    return Ok(());
                }
                info!(
                    connection_id = %connection_id,
                    conversation_id = %self.conversation_id,
                    "Joined conversation room"
                );
                self.set_state(SessionState::Joined);
                self.load().await?;
            }
            LinkEvent::Frame(ServerFrame::ReceiveMessage(message)) => {
                self.receive(message).await?;
            }
            LinkEvent::Frame(ServerFrame::Error { message }) => {
                warn!(conversation_id = %self.conversation_id, "Relay rejected a frame: {}", message);
            }
            LinkEvent::Frame(ServerFrame::Connect { .. }) => {}
            LinkEvent::Disconnected { reason } | LinkEvent::ConnectError { reason } => {
                debug!(conversation_id = %self.conversation_id, reason = %reason, "Relay unavailable, reconnecting");
                self.set_state(SessionState::Disconnected);
            }
        }
        Ok(())
    }

    /// Re-read the open conversation from the store.
    pub async fn load(&mut self) -> Result<()> {
        match self.store.get_conversation(&self.conversation_id).await? {
            Some(conversation) => {
                self.conversation = Some(conversation.clone());
                self.bus.publish(SessionEvent::ConversationLoaded(conversation));
            }
            None => {
                self.conversation = None;
                self.publish_not_found();
            }
        }
        Ok(())
    }

    /// Send `text` as the current user.
    ///
    /// The message is appended to the store before it is emitted to the relay,
    /// and a failed emit does not undo the local append. A message the store
    /// has no conversation for is never emitted.
    pub async fn send(&mut self, text: &str) -> Result<SendOutcome> {
        if self.closed {
            return Ok(SendOutcome::Closed);
        }
        if self.state != SessionState::Joined {
            return Ok(SendOutcome::NotJoined);
        }
        if self.conversation.is_none() {
            return Ok(SendOutcome::NotFound);
        }
        let Some(message) = ChatMessage::compose(&self.conversation_id, &self.user, text) else {
            return Ok(SendOutcome::Empty);
        };

        let stored = self
            .store
            .append_message(&self.conversation_id, &message)
            .await;

        if let Ok(AppendOutcome::NotFound) = stored {
            self.apply(&message, AppendOutcome::NotFound);
            return Ok(SendOutcome::NotFound);
        }

        if self
            .relay
            .send(ClientFrame::send(&self.conversation_id, message.clone()))
            .is_err()
        {
            warn!(message_id = %message.id, "Relay link gone, message kept locally only");
        }

        self.apply(&message, stored?);
        Ok(SendOutcome::Sent(message))
    }

    /// Reconcile a message delivered by the relay.
    pub async fn receive(&mut self, message: ChatMessage) -> Result<ReceiveOutcome> {
        if self.closed {
            return Ok(ReceiveOutcome::Closed);
        }
        if message.chat_id != self.conversation_id {
            debug!(
                conversation_id = %self.conversation_id,
                other = %message.chat_id,
                "Ignoring message for another conversation"
            );
            return Ok(ReceiveOutcome::OtherConversation);
        }
        if message.sender_id == self.user.id {
            debug!(message_id = %message.id, "Dropping self-echo");
            return Ok(ReceiveOutcome::SelfEcho);
        }

        let outcome = self
            .store
            .append_message(&self.conversation_id, &message)
            .await?;
        Ok(self.apply(&message, outcome))
    }

    /// Stop using this controller. Later events and sends are refused and the
    /// store is not written again.
    pub fn close(&mut self) {
        self.set_state(SessionState::Disconnected);
        self.closed = true;
    }

    fn apply(&mut self, message: &ChatMessage, outcome: AppendOutcome) -> ReceiveOutcome {
        match outcome {
            AppendOutcome::Appended(conversation) => {
                self.conversation = Some(conversation.clone());
                self.bus.publish(SessionEvent::MessageAppended {
                    message: message.clone(),
                    conversation,
                });
                ReceiveOutcome::Applied
            }
            AppendOutcome::Duplicate(conversation) => {
                self.conversation = Some(conversation);
                ReceiveOutcome::Duplicate
            }
            AppendOutcome::NotFound => {
                warn!(
                    conversation_id = %self.conversation_id,
                    message_id = %message.id,
                    "Conversation not found"
                );
                self.conversation = None;
                self.publish_not_found();
                ReceiveOutcome::NotFound
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.bus.publish(SessionEvent::StateChanged(state));
        }
    }

    fn publish_not_found(&self) {
        self.bus.publish(SessionEvent::ConversationNotFound {
            conversation_id: self.conversation_id.clone(),
        });
    }
}
