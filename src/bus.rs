use crate::chat::{ChatConversation, ChatMessage};
use crate::session::SessionState;
use serde::Serialize;
use tokio::sync::broadcast;

/// What a chat session tells the view layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// The relay link moved to a new state. Sending is only enabled in `Joined`.
    StateChanged(SessionState),

    /// The open conversation was (re)loaded from the store.
    ConversationLoaded(ChatConversation),

    /// The requested conversation does not exist in the store.
    ConversationNotFound { conversation_id: String },

    /// A message was added to the open conversation, locally or from a peer.
    MessageAppended {
        message: ChatMessage,
        conversation: ChatConversation,
    },
}

/// Events a subscriber may fall behind by before it starts losing them.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out of [`SessionEvent`]s to every view watching one session.
///
/// Slow subscribers see `RecvError::Lagged` and skip ahead; publishing never blocks.
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers will see `event`.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(SessionEvent::StateChanged(SessionState::Connecting)), 0);
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for state in [
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Joined,
        ] {
            assert_eq!(bus.publish(SessionEvent::StateChanged(state)), 1);
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::StateChanged(SessionState::Connected))
        ));
    }
}
