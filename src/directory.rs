//! Per-user conversation list for the chat sidebar.

use crate::{
    chat::{sort_most_recent_first, ChatConversation},
    error::Result,
    store::ConversationStore,
};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

/// One row of the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub conversation_id: String,
    pub other_participant_name: String,
    pub avatar_text: String,
    pub last_message_preview: String,
    pub last_message_time: Option<String>,
    pub property_name: String,
    pub is_active: bool,
}

/// Conversations `user_id` takes part in, latest message first.
///
/// The store already sorts, but the order is re-derived here so any backing
/// store works.
pub async fn list_for_user(
    store: &dyn ConversationStore,
    user_id: &str,
) -> Result<Vec<ChatConversation>> {
    let conversations = store.list_for_user(user_id).await?;
    Ok(arrange(conversations, user_id))
}

/// Filter to `user_id`'s conversations and order them for display.
pub fn arrange(conversations: Vec<ChatConversation>, user_id: &str) -> Vec<ChatConversation> {
    let mut mine: Vec<_> = conversations
        .into_iter()
        .filter(|c| c.has_participant(user_id))
        .collect();
    sort_most_recent_first(&mut mine);
    mine
}

pub fn entries(
    conversations: &[ChatConversation],
    viewer_id: &str,
    active_id: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<DirectoryEntry> {
    conversations
        .iter()
        .map(|c| entry(c, viewer_id, active_id, now))
        .collect()
}

pub fn entry(
    conversation: &ChatConversation,
    viewer_id: &str,
    active_id: Option<&str>,
    now: DateTime<Utc>,
) -> DirectoryEntry {
    let other_name = conversation
        .other_participant(viewer_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "Unknown User".to_string());

    let avatar_text = other_name.chars().take(2).collect::<String>().to_uppercase();

    let last_message_preview = match &conversation.last_message {
        Some(m) if m.sender_id == viewer_id => format!("You: {}", m.text),
        Some(m) => m.text.clone(),
        None => "No messages yet".to_string(),
    };

    let last_message_time = conversation
        .last_message
        .as_ref()
        .and_then(|m| DateTime::<Utc>::from_timestamp_millis(m.timestamp))
        .map(|sent| relative_time(sent, now));

    DirectoryEntry {
        conversation_id: conversation.id.clone(),
        other_participant_name: other_name,
        avatar_text,
        last_message_preview,
        last_message_time,
        property_name: conversation.property_name.clone(),
        is_active: active_id == Some(conversation.id.as_str()),
    }
}

/// Human distance between `then` and `now` in date-fns `formatDistance`
/// wording, e.g. "5 minutes ago" or "over 2 years ago".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 0 {
        return "in the future".to_string();
    }

    let minutes = (seconds as f64 / 60.0).round() as i64;

    let distance = if minutes == 0 {
        "less than a minute".to_string()
    } else if minutes == 1 {
        "1 minute".to_string()
    } else if minutes < 45 {
        format!("{} minutes", minutes)
    } else if minutes < 90 {
        "about 1 hour".to_string()
    } else if minutes < MINUTES_IN_DAY {
        plural("about", (minutes as f64 / 60.0).round() as i64, "hour")
    } else if minutes < MINUTES_IN_ALMOST_TWO_DAYS {
        "1 day".to_string()
    } else if minutes < MINUTES_IN_MONTH {
        plural("", (minutes as f64 / MINUTES_IN_DAY as f64).round() as i64, "day")
    } else if minutes < MINUTES_IN_TWO_MONTHS {
        plural("about", (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64, "month")
    } else {
        let months = whole_months(then, now);
        if months < 12 {
            plural("", (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64, "month")
        } else {
            let years = months / 12;
            match months % 12 {
                0..=2 => plural("about", years, "year"),
                3..=8 => plural("over", years, "year"),
                _ => plural("almost", years + 1, "year"),
            }
        }
    };

    format!("{} ago", distance)
}

const MINUTES_IN_DAY: i64 = 1_440;
const MINUTES_IN_ALMOST_TWO_DAYS: i64 = 2_520;
const MINUTES_IN_MONTH: i64 = 43_200;
const MINUTES_IN_TWO_MONTHS: i64 = 86_400;

fn plural(qualifier: &str, count: i64, unit: &str) -> String {
    let unit = if count == 1 {
        unit.to_string()
    } else {
        format!("{}s", unit)
    };
    if qualifier.is_empty() {
        format!("{} {}", count, unit)
    } else {
        format!("{} {} {}", qualifier, count, unit)
    }
}

/// Full calendar months from `then` to `now`.
fn whole_months(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let mut months = (now.year() - then.year()) as i64 * 12 + now.month() as i64
        - then.month() as i64;
    if months > 0 && (now.day(), now.time()) < (then.day(), then.time()) {
        months -= 1;
    }
    months
}
