use std::sync::Arc;

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error};
use url::Url;

use crate::{
    bus::{EventBus, SessionEvent},
    chat::ChatConversation,
    entity::User,
    error::{ChatError, Result},
    store::ConversationStore,
};

use super::{
    controller::{SendOutcome, SessionController, SessionState},
    link::{self, Backoff},
};

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<SendOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<(SessionState, Option<ChatConversation>)>,
    },
    Close,
}

/// A running chat session for one open conversation.
///
/// Dropping the handle tears the session down the same way `close` does.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    bus: Arc<EventBus>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Connect to the relay at `relay_url` and open `conversation_id` for `user`.
    ///
    /// Also returns a receiver subscribed before anything was published, so
    /// no state change is missed.
    pub fn spawn(
        relay_url: Url,
        backoff: Backoff,
        event_capacity: usize,
        user: User,
        conversation_id: impl Into<String>,
        store: Arc<dyn ConversationStore>,
    ) -> (Self, broadcast::Receiver<SessionEvent>) {
        let bus = Arc::new(EventBus::with_capacity(event_capacity));
        let events = bus.subscribe();

        let (relay_tx, mut link_events, link_task) = link::spawn(relay_url, backoff);
        let mut controller =
            SessionController::new(user, conversation_id, store, relay_tx, bus.clone());
        let (commands, mut command_rx) = mpsc::channel::<Command>(32);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = link_events.recv() => match event {
                        Some(event) => {
                            if let Err(e) = controller.handle_link_event(event).await {
                                error!(conversation_id = %controller.conversation_id(), "Session error: {}", e);
                            }
                        }
                        None => break,
                    },
                    command = command_rx.recv() => match command {
                        Some(Command::Send { text, reply }) => {
                            let _ = reply.send(controller.send(&text).await);
                        }
                        Some(Command::Snapshot { reply }) => {
                            let _ = reply.send((controller.state(), controller.conversation().cloned()));
                        }
                        Some(Command::Close) | None => break,
                    },
                }
            }

            controller.close();
            link_task.abort();
            debug!(conversation_id = %controller.conversation_id(), "Session closed");
        });

        (Self { commands, bus, task }, events)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::SessionClosed)?;
        rx.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub async fn state(&self) -> Result<SessionState> {
        Ok(self.snapshot().await?.0)
    }

    /// The cached copy of the open conversation, if it exists.
    pub async fn conversation(&self) -> Result<Option<ChatConversation>> {
        Ok(self.snapshot().await?.1)
    }

    async fn snapshot(&self) -> Result<(SessionState, Option<ChatConversation>)> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ChatError::SessionClosed)?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    /// Leave the conversation and wait for the session task to finish.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close).await;
        let _ = self.task.await;
    }
}
