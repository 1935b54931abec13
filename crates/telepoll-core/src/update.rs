use serde::Deserialize;

use crate::{
    domain::UpdateId,
    types::{CallbackQuery, InlineQuery, Message},
};

/// Envelope exactly as the server sends it.
///
/// At most one payload field is expected to be populated; [`crate::classify`]
/// turns it into an [`Update`].
#[derive(Clone, Debug, Deserialize)]
pub struct RawUpdate {
    pub update_id: UpdateId,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub inline_query: Option<InlineQuery>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// One classified incoming event.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub id: UpdateId,
    pub kind: UpdateKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    InlineQuery(InlineQuery),
    CallbackQuery(CallbackQuery),
    /// Envelope carrying none of the variants this loop routes (edited
    /// messages, polls, member updates...). Never dispatched.
    Unsupported,
}

/// Which sink an update belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventClass {
    Message,
    InlineQuery,
    CallbackQuery,
}

impl UpdateKind {
    pub fn class(&self) -> Option<EventClass> {
        match self {
            UpdateKind::Message(_) => Some(EventClass::Message),
            UpdateKind::InlineQuery(_) => Some(EventClass::InlineQuery),
            UpdateKind::CallbackQuery(_) => Some(EventClass::CallbackQuery),
            UpdateKind::Unsupported => None,
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventClass::Message => "message",
            EventClass::InlineQuery => "inline_query",
            EventClass::CallbackQuery => "callback_query",
        })
    }
}
