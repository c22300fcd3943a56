//! Environment configuration for the relay and the chat client.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use url::Url;

use crate::{
    bus::DEFAULT_EVENT_CAPACITY,
    entity::{Role, User},
    error::{ChatError, Result},
    session::Backoff,
};

pub const DEFAULT_RELAY_BIND: &str = "0.0.0.0:3001";
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3001/api/socket";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    pub channel_capacity: usize,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind: SocketAddr = get("RELAY_BIND")
            .unwrap_or_else(|| DEFAULT_RELAY_BIND.to_string())
            .parse()
            .map_err(|e| ChatError::Config(format!("RELAY_BIND: {}", e)))?;
        let channel_capacity = parse_or(&get, "RELAY_CHANNEL_CAPACITY", 256)?;

        Ok(Self {
            bind,
            channel_capacity: channel_capacity as usize,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: Url,
    pub db_path: PathBuf,
    pub user: User,
    pub backoff: Backoff,
    pub event_capacity: usize,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let relay_url = Url::parse(
            &get("RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
        )?;

        // ~/.renteasy/chat.db unless overridden
        let db_path = match get("CHAT_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = get("HOME").unwrap_or_else(|| ".".into());
                Path::new(&home).join(".renteasy").join("chat.db")
            }
        };

        let id = get("CHAT_USER_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ChatError::Config("CHAT_USER_ID is required".into()))?;
        let name = get("CHAT_USER_NAME")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ChatError::Config("CHAT_USER_NAME is required".into()))?;
        let role: Role = get("CHAT_USER_ROLE")
            .unwrap_or_else(|| "tenant".into())
            .parse()
            .map_err(ChatError::Config)?;

        let mut user = User::new(id, name, role);
        user.profile_image_url = get("CHAT_USER_IMAGE").filter(|v| !v.is_empty());

        let initial = parse_or(&get, "RECONNECT_INITIAL_MS", 500)?;
        let max = parse_or(&get, "RECONNECT_MAX_MS", 10_000)?;
        let event_capacity =
            parse_or(&get, "CHAT_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY as u64)?;

        Ok(Self {
            relay_url,
            db_path,
            user,
            backoff: Backoff::new(Duration::from_millis(initial), Duration::from_millis(max)),
            event_capacity: event_capacity as usize,
        })
    }
}

fn parse_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ChatError::Config(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}
