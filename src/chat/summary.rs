use chrono::{DateTime, Datelike, Utc};

use crate::common::MessageStatus;

use super::conversation::Conversation;

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub last_message: Option<String>,
    pub timestamp: Option<i64>,
    /// Incoming messages not yet marked read.
    pub unread_count: usize,
}

impl ConversationSummary {
    pub fn of(conversation: &Conversation, local_sender_id: &str) -> Self {
        let store = conversation.store();
        let latest = store.latest();
        let unread_count = store
            .snapshot()
            .iter()
            .filter(|message| !message.is_from(local_sender_id))
            .filter(|message| message.status() != MessageStatus::Read)
            .count();

        Self {
            id: conversation.id().to_string(),
            name: conversation.display_name().to_string(),
            last_message: latest.map(|message| message.text().to_string()),
            timestamp: latest.map(|message| message.timestamp()),
            unread_count,
        }
    }

    pub fn relative_time(&self, now: DateTime<Utc>) -> Option<String> {
        self.timestamp.map(|timestamp| format_relative(timestamp, now))
    }
}

/// Compact age of `timestamp_ms` relative to `now`: `just now`, `5m`, `3h`,
/// `2d`, `1w`, then the calendar date as `month/day`.
pub fn format_relative(timestamp_ms: i64, now: DateTime<Utc>) -> String {
    let seconds = (now.timestamp_millis() - timestamp_ms).div_euclid(1000);
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }

    let days = hours / 24;
    if days < 7 {
        return format!("{days}d");
    }

    let weeks = days / 7;
    if weeks < 4 {
        return format!("{weeks}w");
    }

    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
        Some(date) => format!("{}/{}", date.month(), date.day()),
        None => "long ago".to_string(),
    }
}
