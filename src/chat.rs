use crate::entity::{Property, User};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derive the conversation id for a tenant/property pair.
///
/// At most one conversation ever exists per pair, so the id is the natural key.
pub fn conversation_id(property_id: &str, tenant_id: &str) -> String {
    format!("{}-{}", property_id, tenant_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    /// Name of the sender at send time. Never re-resolved.
    pub sender_name: String,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ChatMessage {
    /// Build an outgoing message from `sender`, or `None` when the text is blank.
    pub fn compose(chat_id: &str, sender: &User, text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let timestamp = Utc::now().timestamp_millis();
        Some(Self {
            id: message_id(timestamp, &sender.id),
            chat_id: chat_id.to_string(),
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            text: text.to_string(),
            timestamp,
        })
    }
}

/// Send time plus a sender fragment, with a random suffix so two sends in the
/// same millisecond from the same sender still get distinct ids.
fn message_id(timestamp: i64, sender_id: &str) -> String {
    let fragment: String = sender_id.chars().take(5).collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}-{}", timestamp, fragment, &suffix[..8])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConversation {
    pub id: String,
    pub property_id: String,
    pub property_name: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub owner_id: String,
    pub owner_name: String,
    /// Owner first, then tenant. Frozen at creation.
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ChatMessage>,
    pub messages: Vec<ChatMessage>,
}

impl ChatConversation {
    pub fn new(seed: &NewConversation) -> Self {
        Self {
            id: seed.id(),
            property_id: seed.property_id.clone(),
            property_name: seed.property_name.clone(),
            tenant_id: seed.tenant_id.clone(),
            tenant_name: seed.tenant_name.clone(),
            owner_id: seed.owner_id.clone(),
            owner_name: seed.owner_name.clone(),
            participants: vec![
                Participant {
                    user_id: seed.owner_id.clone(),
                    name: seed.owner_name.clone(),
                    profile_image_url: seed.owner_image_url.clone(),
                },
                Participant {
                    user_id: seed.tenant_id.clone(),
                    name: seed.tenant_name.clone(),
                    profile_image_url: seed.tenant_image_url.clone(),
                },
            ],
            last_message: None,
            messages: Vec::new(),
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// The participant who is not `user_id`.
    pub fn other_participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id != user_id)
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Append unless a message with the same id is already present.
    /// Returns whether the message was added.
    pub fn push_message(&mut self, message: ChatMessage) -> bool {
        if self.contains_message(&message.id) {
            return false;
        }
        self.last_message = Some(message.clone());
        self.messages.push(message);
        true
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_message.as_ref().map(|m| m.timestamp)
    }
}

/// Latest `last_message` first; conversations without messages go last.
/// The sort is stable, so ties keep their incoming order.
pub fn sort_most_recent_first(conversations: &mut [ChatConversation]) {
    conversations.sort_by(|a, b| match (a.last_timestamp(), b.last_timestamp()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Arguments for get-or-create, as gathered from the catalog and identity providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub property_id: String,
    pub property_name: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub owner_id: String,
    pub owner_name: String,
    pub owner_image_url: Option<String>,
    pub tenant_image_url: Option<String>,
}

impl NewConversation {
    pub fn new(
        property_id: impl Into<String>,
        tenant_id: impl Into<String>,
        property_name: impl Into<String>,
        tenant_name: impl Into<String>,
        owner_id: impl Into<String>,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            property_id: property_id.into(),
            property_name: property_name.into(),
            tenant_id: tenant_id.into(),
            tenant_name: tenant_name.into(),
            owner_id: owner_id.into(),
            owner_name: owner_name.into(),
            owner_image_url: None,
            tenant_image_url: None,
        }
    }

    /// The "contact owner" entry point: a tenant reaching out about a listing.
    pub fn contact(property: &Property, tenant: &User) -> Self {
        let mut seed = Self::new(
            &property.id,
            &tenant.id,
            &property.name,
            &tenant.name,
            &property.owner_id,
            &property.owner_name,
        );
        seed.tenant_image_url = tenant.profile_image_url.clone();
        seed
    }

    pub fn with_owner_image(mut self, url: Option<String>) -> Self {
        self.owner_image_url = url;
        self
    }

    pub fn id(&self) -> String {
        conversation_id(&self.property_id, &self.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Role;

    fn tenant() -> User {
        User::new("tenant1", "Rohan Verma", Role::Tenant)
    }

    #[test]
    fn conversation_id_is_property_then_tenant() {
        assert_eq!(conversation_id("p1", "t1"), "p1-t1");
    }

    #[test]
    fn compose_trims_and_rejects_blank_text() {
        assert!(ChatMessage::compose("p1-t1", &tenant(), "   \n\t").is_none());

        let msg = ChatMessage::compose("p1-t1", &tenant(), "  Hi there ").unwrap();
        assert_eq!(msg.text, "Hi there");
        assert_eq!(msg.chat_id, "p1-t1");
        assert_eq!(msg.sender_id, "tenant1");
        assert_eq!(msg.sender_name, "Rohan Verma");
        assert!(msg.id.starts_with(&format!("{}tenan", msg.timestamp)));
    }

    #[test]
    fn composed_ids_do_not_collide_within_a_millisecond() {
        let ids: std::collections::HashSet<String> = (0..200)
            .map(|_| ChatMessage::compose("c", &tenant(), "x").unwrap().id)
            .collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn contact_seeds_owner_then_tenant() {
        let property = Property::new("p1", "Sunny Flat", "o1", "Sunita");
        let tenant = User::new("t1", "Amit", Role::Tenant).with_profile_image("http://img/t1");
        let conv = ChatConversation::new(&NewConversation::contact(&property, &tenant));

        assert_eq!(conv.id, "p1-t1");
        assert_eq!(conv.participants.len(), 2);
        assert_eq!(conv.participants[0].user_id, "o1");
        assert_eq!(conv.participants[1].user_id, "t1");
        assert_eq!(
            conv.participants[1].profile_image_url.as_deref(),
            Some("http://img/t1")
        );
        assert!(conv.messages.is_empty());
        assert!(conv.last_message.is_none());
    }

    #[test]
    fn push_message_is_idempotent_and_tracks_last() {
        let property = Property::new("p1", "Sunny Flat", "o1", "Sunita");
        let mut conv = ChatConversation::new(&NewConversation::contact(&property, &tenant()));
        let msg = ChatMessage::compose(&conv.id, &tenant(), "Hi").unwrap();

        assert!(conv.push_message(msg.clone()));
        assert!(!conv.push_message(msg.clone()));
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.last_message, Some(msg));
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let msg = ChatMessage {
            id: "m1".into(),
            chat_id: "p1-t1".into(),
            sender_id: "t1".into(),
            sender_name: "Amit".into(),
            text: "Hi".into(),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["chatId"], "p1-t1");
        assert_eq!(json["senderName"], "Amit");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    }
}
