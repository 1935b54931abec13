//! Bot API payloads delivered to the sinks.
//!
//! Only the fields consumers commonly need are modelled; unknown fields are
//! ignored on decode.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{ChatId, MessageId, UserId};

/// A Telegram user or bot account.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// `@username` when set, otherwise the full name.
    pub fn display_name(&self) -> String {
        if let Some(un) = &self.username {
            return format!("@{un}");
        }
        match &self.last_name {
            Some(ln) => format!("{} {ln}", self.first_name),
            None => self.first_name.clone(),
        }
    }
}

/// Chat kind as reported by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

/// A private chat, group or channel.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        self.kind != ChatType::Private
    }

    /// Address usable as `chat_id` in outbound calls: `@username` for public
    /// channels, the numeric id otherwise.
    pub fn destination(&self) -> String {
        match (&self.kind, &self.username) {
            (ChatType::Channel, Some(un)) => format!("@{un}"),
            _ => self.id.0.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// An incoming chat message.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    #[serde(default)]
    pub from: Option<User>,
    /// Unix time, seconds.
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

impl Message {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }

    /// Chat the message was posted in.
    pub fn origin(&self) -> &Chat {
        &self.chat
    }

    /// Text body, falling back to the media caption.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

/// Inline query typed in `@bot ...` form.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default)]
    pub location: Option<Location>,
}

/// Press of an inline keyboard button.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub inline_message_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}
