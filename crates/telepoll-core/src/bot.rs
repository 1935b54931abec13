use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    backoff::RetryPolicy,
    errors::Error,
    poller::{ListenOptions, PollSummary, Poller},
    ports::UpdateSource,
    sinks::Sinks,
    types::User,
    Result,
};

/// A bot whose identity has been resolved.
///
/// Constructing one performs the `getMe` round-trip; a bot that cannot identify
/// itself is never handed out, so no poll loop can start for it.
pub struct Bot {
    source: Arc<dyn UpdateSource>,
    identity: User,
    retry: RetryPolicy,
}

impl Bot {
    pub async fn new(source: Arc<dyn UpdateSource>, retry: RetryPolicy) -> Result<Self> {
        let identity = source
            .get_me()
            .await
            .map_err(|e| Error::Identity(e.to_string()))?;

        info!(
            bot_id = identity.id.0,
            username = identity.username.as_deref().unwrap_or(""),
            "bot identity resolved"
        );

        Ok(Self {
            source,
            identity,
            retry,
        })
    }

    pub fn identity(&self) -> &User {
        &self.identity
    }

    /// True when `user` is this bot's own account.
    pub fn is_self(&self, user: &User) -> bool {
        user.id == self.identity.id
    }

    /// Build a loop without spawning it; the caller drives `Poller::run`.
    pub fn poller(&self, sinks: Sinks, opts: ListenOptions) -> Poller {
        Poller::new(self.source.clone(), sinks, opts, self.retry)
    }

    /// Spawn the loop on its own task with a fresh cancellation token.
    pub fn listen(&self, sinks: Sinks, opts: ListenOptions) -> ListenerHandle {
        self.listen_with(sinks, opts, CancellationToken::new())
    }

    /// Spawn the loop on its own task, stopping when `cancel` fires.
    pub fn listen_with(
        &self,
        sinks: Sinks,
        opts: ListenOptions,
        cancel: CancellationToken,
    ) -> ListenerHandle {
        let poller = self.poller(sinks, opts);
        let task = tokio::spawn(poller.run(cancel.clone()));
        ListenerHandle { cancel, task }
    }
}

/// Stop trigger plus completion handle for a spawned loop.
///
/// Sinks are never closed by the loop. Drop the senders after `join` returns
/// if consumers should see end-of-stream.
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<PollSummary>,
}

impl ListenerHandle {
    /// Request a graceful stop. Takes effect before the next fetch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A clone of the stop trigger, for callers that fan out shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<PollSummary> {
        self.task
            .await
            .map_err(|e| Error::External(format!("poll loop task failed: {e}")))
    }

    /// `stop` followed by `join`.
    pub async fn shutdown(self) -> Result<PollSummary> {
        self.stop();
        self.join().await
    }
}
