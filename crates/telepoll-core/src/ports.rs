use async_trait::async_trait;

use crate::{domain::UpdateId, types::User, update::Update, Result};

/// Hexagonal port for the remote update service.
///
/// The Bot API implementation lives in `telepoll-telegram`; tests plug in
/// scripted fakes.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch pending updates with `id >= offset`, waiting up to `timeout_secs`
    /// for new ones. An empty batch means the long poll timed out.
    ///
    /// Batches are ordered by id ascending.
    async fn fetch_updates(&self, offset: UpdateId, timeout_secs: u64) -> Result<Vec<Update>>;

    /// Resolve the bot's own account.
    async fn get_me(&self) -> Result<User>;
}
