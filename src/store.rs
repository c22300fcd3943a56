use crate::{
    chat::{sort_most_recent_first, ChatConversation, ChatMessage, NewConversation, Participant},
    error::{ChatError, Result},
};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr, time::Duration};
use tracing::{debug, warn};

/// Result of appending a message to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was new and is now the conversation's last message.
    Appended(ChatConversation),
    /// A message with the same id was already stored; nothing changed.
    Duplicate(ChatConversation),
    /// No conversation has the requested id; nothing changed.
    NotFound,
}

impl AppendOutcome {
    pub fn conversation(&self) -> Option<&ChatConversation> {
        match self {
            AppendOutcome::Appended(c) | AppendOutcome::Duplicate(c) => Some(c),
            AppendOutcome::NotFound => None,
        }
    }

    pub fn into_conversation(self) -> Option<ChatConversation> {
        match self {
            AppendOutcome::Appended(c) | AppendOutcome::Duplicate(c) => Some(c),
            AppendOutcome::NotFound => None,
        }
    }
}

/// The authoritative collection of conversations.
///
/// Every mutating call is atomic and durable by the time it returns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Return the conversation for `(property_id, tenant_id)`, creating it on
    /// first contact. Either way it becomes the most recently active one.
    async fn get_or_create_conversation(&self, seed: &NewConversation)
        -> Result<ChatConversation>;

    /// Append `message` to `chat_id`. Idempotent on `message.id`.
    async fn append_message(&self, chat_id: &str, message: &ChatMessage) -> Result<AppendOutcome>;

    async fn get_conversation(&self, chat_id: &str) -> Result<Option<ChatConversation>>;

    /// Conversations `user_id` participates in, latest message first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ChatConversation>>;

    /// Every stored conversation, most recently active first.
    async fn all_conversations(&self) -> Result<Vec<ChatConversation>>;
}

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the store at `db_path`, creating the file and its directory if needed.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        // Several chat processes may share one file.
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options).await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// A private store that lives as long as this value. Used by tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        // Each in-memory connection is its own database, so pin exactly one.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                property_id TEXT NOT NULL,
                property_name TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                tenant_name TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                owner_name TEXT NOT NULL,
                activity INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                position INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                profile_image_url TEXT,
                PRIMARY KEY (conversation_id, position)
            );
            CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_conversation(&self, chat_id: &str) -> Result<Option<ChatConversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, property_id, property_name, tenant_id, tenant_name, owner_id, owner_name
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let participant_rows = sqlx::query(
            r#"
            SELECT user_id, name, profile_image_url
            FROM participants
            WHERE conversation_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        let mut participants = Vec::with_capacity(participant_rows.len());
        for p in participant_rows {
            participants.push(Participant {
                user_id: p.try_get("user_id")?,
                name: p.try_get("name")?,
                profile_image_url: p.try_get("profile_image_url")?,
            });
        }

        // rowid order is insertion order
        let message_rows = sqlx::query(
            r#"
            SELECT id, sender_id, sender_name, text, timestamp
            FROM messages
            WHERE conversation_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(message_rows.len());
        for m in message_rows {
            messages.push(ChatMessage {
                id: m.try_get("id")?,
                chat_id: chat_id.to_string(),
                sender_id: m.try_get("sender_id")?,
                sender_name: m.try_get("sender_name")?,
                text: m.try_get("text")?,
                timestamp: m.try_get("timestamp")?,
            });
        }

        Ok(Some(ChatConversation {
            id: row.try_get("id")?,
            property_id: row.try_get("property_id")?,
            property_name: row.try_get("property_name")?,
            tenant_id: row.try_get("tenant_id")?,
            tenant_name: row.try_get("tenant_name")?,
            owner_id: row.try_get("owner_id")?,
            owner_name: row.try_get("owner_name")?,
            participants,
            last_message: messages.last().cloned(),
            messages,
        }))
    }

    async fn fetch_many(&self, ids: Vec<String>) -> Result<Vec<ChatConversation>> {
        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(conv) = self.fetch_conversation(&id).await? {
                conversations.push(conv);
            }
        }
        Ok(conversations)
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get_or_create_conversation(
        &self,
        seed: &NewConversation,
    ) -> Result<ChatConversation> {
        let chat_id = seed.id();
        let fresh = ChatConversation::new(seed);

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO conversations
                (id, property_id, property_name, tenant_id, tenant_name, owner_id, owner_name, activity)
            VALUES (?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(activity), 0) + 1 FROM conversations))
            "#,
        )
        .bind(&fresh.id)
        .bind(&fresh.property_id)
        .bind(&fresh.property_name)
        .bind(&fresh.tenant_id)
        .bind(&fresh.tenant_name)
        .bind(&fresh.owner_id)
        .bind(&fresh.owner_name)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            for (position, p) in fresh.participants.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO participants (conversation_id, position, user_id, name, profile_image_url)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&fresh.id)
                .bind(position as i64)
                .bind(&p.user_id)
                .bind(&p.name)
                .bind(&p.profile_image_url)
                .execute(&mut *tx)
                .await?;
            }
            debug!(conversation_id = %chat_id, "Created conversation");
        } else {
            promote(&mut tx, &chat_id).await?;
        }

        tx.commit().await?;

        self.fetch_conversation(&chat_id)
            .await?
            .ok_or(ChatError::Storage(sqlx::Error::RowNotFound))
    }

    async fn append_message(&self, chat_id: &str, message: &ChatMessage) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages (conversation_id, id, sender_id, sender_name, text, timestamp)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM conversations WHERE id = ?)
            "#,
        )
        .bind(chat_id)
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.sender_name)
        .bind(&message.text)
        .bind(message.timestamp)
        .bind(chat_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            promote(&mut tx, chat_id).await?;
        }
        tx.commit().await?;

        match self.fetch_conversation(chat_id).await? {
            None => {
                warn!(conversation_id = %chat_id, message_id = %message.id, "Conversation not found for message");
                Ok(AppendOutcome::NotFound)
            }
            Some(conv) if inserted => Ok(AppendOutcome::Appended(conv)),
            Some(conv) => {
                debug!(conversation_id = %chat_id, message_id = %message.id, "Message already exists, not adding");
                Ok(AppendOutcome::Duplicate(conv))
            }
        }
    }

    async fn get_conversation(&self, chat_id: &str) -> Result<Option<ChatConversation>> {
        self.fetch_conversation(chat_id).await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ChatConversation>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.id
            FROM conversations c
            WHERE EXISTS (
                SELECT 1 FROM participants p
                WHERE p.conversation_id = c.id AND p.user_id = ?
            )
            ORDER BY c.activity DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = self.fetch_many(ids).await?;
        sort_most_recent_first(&mut conversations);
        Ok(conversations)
    }

    async fn all_conversations(&self) -> Result<Vec<ChatConversation>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM conversations ORDER BY activity DESC")
                .fetch_all(&self.pool)
                .await?;

        self.fetch_many(ids).await
    }
}

/// Move a conversation to the most recently active position.
async fn promote(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, chat_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE conversations
        SET activity = (SELECT MAX(activity) FROM conversations) + 1
        WHERE id = ? AND activity < (SELECT MAX(activity) FROM conversations)
        "#,
    )
    .bind(chat_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::conversation_id;

    fn seed(property_id: &str, tenant_id: &str) -> NewConversation {
        NewConversation::new(
            property_id,
            tenant_id,
            format!("Property {}", property_id),
            format!("Tenant {}", tenant_id),
            "o1",
            "Owner One",
        )
    }

    fn message(chat_id: &str, id: &str, sender: &str, timestamp: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender.to_string(),
            sender_name: format!("Name {}", sender),
            text: format!("text {}", id),
            timestamp,
        }
    }

    #[tokio::test]
    async fn get_or_create_builds_composite_id_and_participants() {
        let store = SqliteStore::in_memory().await.unwrap();
        let seed = NewConversation::new("p1", "t1", "Sunny Flat", "Tenant", "o1", "Owner");

        let conv = store.get_or_create_conversation(&seed).await.unwrap();

        assert_eq!(conv.id, "p1-t1");
        assert_eq!(conv.property_name, "Sunny Flat");
        let ids: Vec<_> = conv.participants.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "t1"]);
        assert!(conv.messages.is_empty());
        assert!(conv.last_message.is_none());
    }

    #[tokio::test]
    async fn get_or_create_twice_does_not_duplicate() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap();
        let second = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.all_conversations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_or_create_keeps_original_snapshot() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap();

        let renamed = NewConversation::new("p1", "t1", "Renamed", "New Name", "o1", "Owner One");
        let conv = store.get_or_create_conversation(&renamed).await.unwrap();

        assert_eq!(conv.property_name, "Property p1");
        assert_eq!(conv.tenant_name, "Tenant t1");
    }

    #[tokio::test]
    async fn get_or_create_promotes_existing_conversation() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap();
        store.get_or_create_conversation(&seed("p2", "t1")).await.unwrap();

        let order: Vec<_> = store.all_conversations().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(order, vec!["p2-t1", "p1-t1"]);

        store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap();
        let order: Vec<_> = store.all_conversations().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(order, vec!["p1-t1", "p2-t1"]);
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let chat_id = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap().id;
        let m1 = message(&chat_id, "m1", "t1", 1_000);

        let first = store.append_message(&chat_id, &m1).await.unwrap();
        assert!(matches!(first, AppendOutcome::Appended(_)));

        let second = store.append_message(&chat_id, &m1).await.unwrap();
        let AppendOutcome::Duplicate(conv) = second else {
            panic!("expected duplicate, got {:?}", second);
        };
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.last_message.as_ref().map(|m| m.id.as_str()), Some("m1"));
    }

    #[tokio::test]
    async fn last_message_tracks_each_append_in_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        let chat_id = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap().id;

        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let msg = message(&chat_id, id, "t1", 10 + i as i64);
            let conv = store
                .append_message(&chat_id, &msg)
                .await
                .unwrap()
                .into_conversation()
                .unwrap();
            assert_eq!(conv.last_message, Some(msg));
            assert_eq!(conv.messages.last(), conv.last_message.as_ref());
        }

        let conv = store.get_conversation(&chat_id).await.unwrap().unwrap();
        let ids: Vec<_> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_leaves_store_unchanged() {
        let store = SqliteStore::in_memory().await.unwrap();
        let chat_id = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap().id;
        store
            .append_message(&chat_id, &message(&chat_id, "m1", "t1", 5))
            .await
            .unwrap();
        let before = store.all_conversations().await.unwrap();

        let outcome = store
            .append_message("nope", &message("nope", "m2", "t1", 6))
            .await
            .unwrap();

        assert_eq!(outcome, AppendOutcome::NotFound);
        assert_eq!(store.all_conversations().await.unwrap(), before);
    }

    #[tokio::test]
    async fn append_moves_conversation_to_front() {
        let store = SqliteStore::in_memory().await.unwrap();
        let older = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap().id;
        store.get_or_create_conversation(&seed("p2", "t1")).await.unwrap();

        store
            .append_message(&older, &message(&older, "m1", "t1", 5))
            .await
            .unwrap();

        let first = store.all_conversations().await.unwrap().remove(0);
        assert_eq!(first.id, older);
    }

    #[tokio::test]
    async fn list_for_user_filters_and_sorts_by_last_message() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap().id;
        let b = store.get_or_create_conversation(&seed("p2", "t1")).await.unwrap().id;
        let empty = store.get_or_create_conversation(&seed("p3", "t1")).await.unwrap().id;
        let other = store.get_or_create_conversation(&seed("p4", "t2")).await.unwrap().id;

        store.append_message(&a, &message(&a, "m1", "t1", 300)).await.unwrap();
        store.append_message(&b, &message(&b, "m2", "t1", 100)).await.unwrap();

        let listed: Vec<_> = store
            .list_for_user("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![a.clone(), b.clone(), empty.clone()]);

        let owner: Vec<_> = store.list_for_user("o1").await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(owner.len(), 4);
        assert!(owner.contains(&other));

        assert!(store.list_for_user("stranger").await.unwrap().is_empty());
        assert_eq!(conversation_id("p4", "t2"), other);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            let chat_id = store.get_or_create_conversation(&seed("p1", "t1")).await.unwrap().id;
            store
                .append_message(&chat_id, &message(&chat_id, "m1", "t1", 1))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::new(&path).await.unwrap();
        let conv = reopened.get_conversation("p1-t1").await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.last_message.unwrap().id, "m1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_one_file_keep_one_copy_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let stores = [
            std::sync::Arc::new(SqliteStore::new(&path).await.unwrap()),
            std::sync::Arc::new(SqliteStore::new(&path).await.unwrap()),
        ];

        // Every message id is written twice, once through each store.
        let mut tasks = Vec::new();
        for i in 0..40 {
            let store = stores[i % 2].clone();
            let id = format!("m{}", i / 2);
            tasks.push(tokio::spawn(async move {
                let chat_id = store.get_or_create_conversation(&seed("p1", "t1")).await?.id;
                store
                    .append_message(&chat_id, &message(&chat_id, &id, "t1", (i / 2) as i64))
                    .await
            }));
        }

        let mut appended = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                AppendOutcome::Appended(_) => appended += 1,
                AppendOutcome::Duplicate(_) => {}
                AppendOutcome::NotFound => panic!("conversation vanished"),
            }
        }
        assert_eq!(appended, 20);

        let all = stores[0].all_conversations().await.unwrap();
        assert_eq!(all.len(), 1);

        let mut ids: Vec<_> = all[0].messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), 20);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(all[0].last_message.as_ref(), all[0].messages.last());
    }
}
