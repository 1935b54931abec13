//! Envelope classification.

use crate::update::{RawUpdate, Update, UpdateKind};

/// Map a wire envelope onto exactly one variant.
///
/// Checked in fixed order: message, inline query, callback press. If the server
/// ever populates more than one field, the message wins. An envelope with none
/// of them becomes [`UpdateKind::Unsupported`]; it is not an error.
pub fn classify(raw: RawUpdate) -> Update {
    let kind = if let Some(m) = raw.message {
        UpdateKind::Message(m)
    } else if let Some(q) = raw.inline_query {
        UpdateKind::InlineQuery(q)
    } else if let Some(c) = raw.callback_query {
        UpdateKind::CallbackQuery(c)
    } else {
        UpdateKind::Unsupported
    };

    Update {
        id: raw.update_id,
        kind,
    }
}

/// Classify a whole batch, keeping server order.
pub fn classify_batch(raw: Vec<RawUpdate>) -> Vec<Update> {
    raw.into_iter().map(classify).collect()
}
