/// Core error type for the update loop.
///
/// Adapter crates should map their specific errors into this type so the loop
/// can tell a poller conflict apart from every other failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error{}: {description}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("identity bootstrap failed: {0}")]
    Identity(String),

    #[error("external error: {0}")]
    External(String),
}

/// Server descriptions that mean another poller (or a webhook) holds the
/// long-poll slot for the same token.
const POLL_CONFLICT_MARKERS: &[&str] = &[
    "terminated by other long poll or webhook",
    "terminated by other getUpdates request",
];

impl Error {
    /// True when this failure is the server-side "another poller is active" conflict.
    pub fn is_poll_conflict(&self) -> bool {
        let text = self.to_string();
        POLL_CONFLICT_MARKERS.iter().any(|m| text.contains(m))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
