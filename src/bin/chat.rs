use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{TimeZone, Utc};
use renteasy_chat::{
    bus::SessionEvent,
    config::ClientConfig,
    directory,
    session::{SendOutcome, SessionHandle, SessionState},
    ChatMessage, ConversationStore, NewConversation, Property, Role, SqliteStore, User,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};

const USAGE: &str = "\
Usage:
  renteasy-chat list
  renteasy-chat contact <property-id> <property-name> <owner-id> <owner-name>
  renteasy-chat open <conversation-id>";

enum Command {
    List,
    Contact(Property),
    Open(String),
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    match args.first().map(String::as_str) {
        Some("list") => Ok(Command::List),
        Some("contact") if args.len() == 5 => Ok(Command::Contact(Property::new(
            &args[1], &args[2], &args[3], &args[4],
        ))),
        Some("open") if args.len() == 2 => Ok(Command::Open(args[1].clone())),
        _ => bail!("{}", USAGE),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let config = ClientConfig::from_env().context("Invalid client configuration")?;

    let store = SqliteStore::new(&config.db_path)
        .await
        .with_context(|| format!("Failed to open store at {}", config.db_path.display()))?;
    let store: Arc<dyn ConversationStore> = Arc::new(store);

    match command {
        Command::List => list(store.as_ref(), &config.user).await,
        Command::Contact(property) => {
            if config.user.role != Role::Tenant {
                bail!("Only tenants can contact an owner about a property");
            }
            let seed = NewConversation::contact(&property, &config.user);
            let conversation = store.get_or_create_conversation(&seed).await?;
            println!("Conversation {} about {}", conversation.id, conversation.property_name);
            open(config, store, conversation.id).await
        }
        Command::Open(conversation_id) => open(config, store, conversation_id).await,
    }
}

async fn list(store: &dyn ConversationStore, user: &User) -> anyhow::Result<()> {
    let conversations = directory::list_for_user(store, &user.id).await?;
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for entry in directory::entries(&conversations, &user.id, None, Utc::now()) {
        println!(
            "[{}] {}  (Re: {})\n    {}  {}",
            entry.avatar_text,
            entry.other_participant_name,
            entry.property_name,
            entry.last_message_preview,
            entry.last_message_time.unwrap_or_default(),
        );
        println!("    open with: renteasy-chat open {}", entry.conversation_id);
    }
    Ok(())
}

async fn open(
    config: ClientConfig,
    store: Arc<dyn ConversationStore>,
    conversation_id: String,
) -> anyhow::Result<()> {
    let viewer = config.user.id.clone();
    let (session, mut events) = SessionHandle::spawn(
        config.relay_url,
        config.backoff,
        config.event_capacity,
        config.user,
        conversation_id,
        store,
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            match event {
                SessionEvent::StateChanged(SessionState::Joined) => println!("-- connected"),
                SessionEvent::StateChanged(SessionState::Disconnected) => {
                    println!("-- disconnected, reconnecting...")
                }
                SessionEvent::StateChanged(_) => {}
                SessionEvent::ConversationLoaded(conversation) => {
                    let other = conversation
                        .other_participant(&viewer)
                        .map(|p| p.name.as_str())
                        .unwrap_or("Unknown User");
                    println!("-- {} (Regarding: {})", other, conversation.property_name);
                    for message in &conversation.messages {
                        print_message(&viewer, message);
                    }
                }
                SessionEvent::ConversationNotFound { conversation_id } => {
                    println!("-- conversation {} not found", conversation_id);
                }
                SessionEvent::MessageAppended { message, .. } => {
                    print_message(&viewer, &message);
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/quit" {
            break;
        }
        match session.send(line).await {
            Ok(SendOutcome::NotJoined) => println!("-- not connected, message not sent"),
            Ok(SendOutcome::NotFound) => println!("-- conversation not found, message not sent"),
            Ok(_) => {}
            Err(e) => warn!("Failed to send message: {}", e),
        }
    }

    session.close().await;
    printer.abort();
    Ok(())
}

/// Next session event, skipping past any the display fell behind on.
async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Display fell behind, some events were skipped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn print_message(viewer: &str, message: &ChatMessage) {
    let time = Utc
        .timestamp_millis_opt(message.timestamp)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default();
    let who = if message.sender_id == viewer {
        "You"
    } else {
        message.sender_name.as_str()
    };
    println!("[{}] {}: {}", time, who, message.text);
}
