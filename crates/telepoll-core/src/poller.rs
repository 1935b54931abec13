//! The fetch / classify / dispatch / advance loop.
//!
//! One task owns a [`Poller`]; cursor and retry state never leave it, so no
//! locking is involved. Cancellation is cooperative: the token is checked once
//! per iteration before each fetch. A fetch or a sink send in progress is never
//! interrupted, so at most one fetch is in flight when the loop stops.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    backoff::{BackoffState, RetryPolicy},
    domain::UpdateId,
    ports::UpdateSource,
    sinks::{Delivery, Sinks},
    update::Update,
};

/// Per-listener settings.
#[derive(Clone, Copy, Debug)]
pub struct ListenOptions {
    /// Long-poll timeout passed to the server.
    pub timeout: Duration,
    /// Cursor to resume from. `UpdateId(0)` starts at the oldest retained update.
    pub initial_cursor: UpdateId,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_cursor: UpdateId::default(),
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Id of the last processed update.
    pub cursor: UpdateId,
    pub fetches: u64,
    pub failures: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Loop-owned state: the cursor plus retry bookkeeping.
#[derive(Debug)]
pub struct PollState {
    cursor: UpdateId,
    backoff: BackoffState,
    summary: PollSummary,
}

impl PollState {
    pub fn new(cursor: UpdateId, policy: RetryPolicy) -> Self {
        Self {
            cursor,
            backoff: BackoffState::new(policy),
            summary: PollSummary::default(),
        }
    }

    pub fn cursor(&self) -> UpdateId {
        self.cursor
    }

    /// Move the cursor forward to `id`. Never moves it back.
    fn advance(&mut self, id: UpdateId) {
        if id > self.cursor {
            self.cursor = id;
        } else {
            debug!(update_id = %id, cursor = %self.cursor, "update id not above cursor");
        }
    }

    fn summary(&self) -> PollSummary {
        PollSummary {
            cursor: self.cursor,
            ..self.summary
        }
    }
}

pub struct Poller {
    source: Arc<dyn UpdateSource>,
    sinks: Sinks,
    timeout_secs: u64,
    state: PollState,
}

impl Poller {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        sinks: Sinks,
        opts: ListenOptions,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            sinks,
            timeout_secs: opts.timeout.as_secs(),
            state: PollState::new(opts.initial_cursor, policy),
        }
    }

    pub fn cursor(&self) -> UpdateId {
        self.state.cursor()
    }

    /// Run until `cancel` is observed at the top of an iteration.
    pub async fn run(mut self, cancel: CancellationToken) -> PollSummary {
        info!(cursor = %self.state.cursor, timeout_secs = self.timeout_secs, "poll loop started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let offset = self.state.cursor.next();
            self.state.summary.fetches += 1;

            let batch = match self.source.fetch_updates(offset, self.timeout_secs).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.state.summary.failures += 1;
                    warn!(%offset, error = %e, "failed to get updates");

                    if let Some(delay) = self.state.backoff.on_failure(&e) {
                        if e.is_poll_conflict() {
                            warn!(
                                cooldown = ?delay,
                                "another poller holds the update stream; cooling down"
                            );
                        } else {
                            debug!(?delay, "retry backoff");
                        }
                        sleep_unless_cancelled(delay, &cancel).await;
                    }
                    continue;
                }
            };

            self.state.backoff.on_success();
            if !batch.is_empty() {
                debug!(%offset, count = batch.len(), "received updates");
            }
            self.dispatch(batch).await;
        }

        let summary = self.state.summary();
        info!(
            cursor = %summary.cursor,
            fetches = summary.fetches,
            delivered = summary.delivered,
            "poll loop stopped"
        );
        summary
    }

    async fn dispatch(&mut self, batch: Vec<Update>) {
        for update in batch {
            let id = update.id;
            match self.sinks.route(update).await {
                Delivery::Delivered(_) => self.state.summary.delivered += 1,
                Delivery::Dropped => self.state.summary.dropped += 1,
                Delivery::Closed(class) => {
                    warn!(update_id = %id, %class, "sink receiver dropped; discarding {class} events");
                    self.state.summary.dropped += 1;
                }
            }
            self.state.advance(id);
        }
    }
}

async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        backoff::RetryBackoff,
        classify::classify,
        errors::Error,
        types::{CallbackQuery, InlineQuery, Message, User},
        Result,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    pub(crate) const CONFLICT: &str = "Conflict: terminated by other long poll or webhook";

    pub(crate) fn message(id: i64) -> Update {
        classify(
            serde_json::from_value(json!({
                "update_id": id,
                "message": {
                    "message_id": id * 10,
                    "date": 0,
                    "chat": {"id": 1, "type": "private"},
                    "text": format!("m{id}")
                }
            }))
            .unwrap(),
        )
    }

    pub(crate) fn query(id: i64) -> Update {
        classify(
            serde_json::from_value(json!({
                "update_id": id,
                "inline_query": {"id": format!("q{id}"), "from": {"id": 2, "first_name": "Q"}}
            }))
            .unwrap(),
        )
    }

    pub(crate) fn callback(id: i64) -> Update {
        classify(
            serde_json::from_value(json!({
                "update_id": id,
                "callback_query": {"id": format!("c{id}"), "from": {"id": 3, "first_name": "C"}}
            }))
            .unwrap(),
        )
    }

    pub(crate) fn unsupported(id: i64) -> Update {
        classify(serde_json::from_value(json!({"update_id": id, "poll": {}})).unwrap())
    }

    /// Replays a fixed script of fetch results, then cancels `done`.
    pub(crate) struct ScriptedSource {
        script: Mutex<VecDeque<std::result::Result<Vec<Update>, String>>>,
        calls: Mutex<Vec<(UpdateId, u64, Instant)>>,
        cancel_on_call: Option<usize>,
        done: CancellationToken,
    }

    impl ScriptedSource {
        pub(crate) fn new(
            script: Vec<std::result::Result<Vec<Update>, String>>,
            done: CancellationToken,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                cancel_on_call: None,
                done,
            }
        }

        pub(crate) fn cancel_on_call(mut self, n: usize) -> Self {
            self.cancel_on_call = Some(n);
            self
        }

        pub(crate) fn offsets(&self) -> Vec<i64> {
            self.calls.lock().unwrap().iter().map(|c| c.0 .0).collect()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|c| c.2).collect()
        }
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch_updates(&self, offset: UpdateId, timeout_secs: u64) -> Result<Vec<Update>> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((offset, timeout_secs, Instant::now()));
                calls.len()
            };
            if self.cancel_on_call == Some(n) {
                self.done.cancel();
            }

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(batch)) => Ok(batch),
                Some(Err(text)) => Err(Error::Transport(text)),
                None => {
                    self.done.cancel();
                    Ok(Vec::new())
                }
            }
        }

        async fn get_me(&self) -> Result<User> {
            Ok(serde_json::from_value(json!({
                "id": 999, "is_bot": true, "first_name": "Poller", "username": "poller_bot"
            }))?)
        }
    }

    fn immediate(cooldown: Duration) -> RetryPolicy {
        RetryPolicy {
            conflict_cooldown: cooldown,
            backoff: RetryBackoff::Immediate,
        }
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn routes_only_to_present_sinks_and_advances_past_dropped() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![Ok(vec![message(1), callback(2), query(3)])],
            cancel.clone(),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let poller = Poller::new(
            source.clone(),
            Sinks::new().with_messages(tx),
            ListenOptions::default(),
            immediate(Duration::ZERO),
        );
        let summary = poller.run(cancel).await;

        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text.as_deref(), Some("m1"));
        assert_eq!(summary.cursor, UpdateId(3));
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.dropped, 2);
        assert_eq!(source.offsets(), vec![1, 4]);
    }

    #[tokio::test]
    async fn delivers_each_event_once_in_fetch_order() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![
                Ok(vec![message(5), query(6), message(7)]),
                Ok(vec![]),
                Ok(vec![callback(8), message(9), query(10)]),
            ],
            cancel.clone(),
        ));
        let (mtx, mut mrx) = mpsc::unbounded_channel::<Message>();
        let (qtx, mut qrx) = mpsc::unbounded_channel::<InlineQuery>();
        let (ctx, mut crx) = mpsc::unbounded_channel::<CallbackQuery>();

        let summary = Poller::new(
            source.clone(),
            Sinks::new()
                .with_messages(mtx)
                .with_queries(qtx)
                .with_callbacks(ctx),
            ListenOptions::default(),
            immediate(Duration::ZERO),
        )
        .run(cancel)
        .await;

        let messages: Vec<_> = drain(&mut mrx).into_iter().map(|m| m.message_id.0).collect();
        let queries: Vec<_> = drain(&mut qrx).into_iter().map(|q| q.id).collect();
        let callbacks: Vec<_> = drain(&mut crx).into_iter().map(|c| c.id).collect();

        assert_eq!(messages, vec![50, 70, 90]);
        assert_eq!(queries, vec!["q6", "q10"]);
        assert_eq!(callbacks, vec!["c8"]);
        assert_eq!(summary.cursor, UpdateId(10));
        assert_eq!(summary.delivered, 6);
        // Empty batch leaves the offset where it was.
        assert_eq!(source.offsets(), vec![1, 8, 8, 11]);
    }

    #[tokio::test]
    async fn unsupported_envelopes_still_advance_cursor() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![Ok(vec![unsupported(4), message(5), unsupported(6)])],
            cancel.clone(),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let summary = Poller::new(
            source.clone(),
            Sinks::new().with_messages(tx),
            ListenOptions::default(),
            immediate(Duration::ZERO),
        )
        .run(cancel)
        .await;

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(summary.cursor, UpdateId(6));
        assert_eq!(source.offsets(), vec![1, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_sleeps_cooldown_once_and_keeps_offset() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![Err(CONFLICT.to_string()), Ok(vec![message(1)])],
            cancel.clone(),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let summary = Poller::new(
            source.clone(),
            Sinks::new().with_messages(tx),
            ListenOptions::default(),
            immediate(Duration::from_secs(5)),
        )
        .run(cancel)
        .await;

        assert_eq!(source.offsets(), vec![1, 1, 2]);
        let t = source.call_times();
        assert!(t[1] - t[0] >= Duration::from_secs(5));
        assert!(t[1] - t[0] < Duration::from_secs(10));
        assert!(t[2] - t[1] < Duration::from_secs(1));
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.cursor, UpdateId(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_immediately_without_advancing() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![
                Err("connection reset".to_string()),
                Err("json error: expected value".to_string()),
                Ok(vec![message(3)]),
            ],
            cancel.clone(),
        ));

        let summary = Poller::new(
            source.clone(),
            Sinks::new(),
            ListenOptions::default(),
            immediate(Duration::from_secs(5)),
        )
        .run(cancel)
        .await;

        assert_eq!(source.offsets(), vec![1, 1, 1, 4]);
        let t = source.call_times();
        assert!(t[2] - t[0] < Duration::from_secs(1));
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.cursor, UpdateId(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_grows_between_failures() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![
                Err("timeout".to_string()),
                Err("timeout".to_string()),
                Ok(vec![]),
            ],
            cancel.clone(),
        ));
        let policy = RetryPolicy {
            conflict_cooldown: Duration::from_secs(30),
            backoff: RetryBackoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        };

        Poller::new(source.clone(), Sinks::new(), ListenOptions::default(), policy)
            .run(cancel)
            .await;

        let t = source.call_times();
        assert!(t[1] - t[0] >= Duration::from_secs(1));
        assert!(t[2] - t[1] >= Duration::from_secs(2));
        assert!(t[2] - t[1] < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancellation_between_fetches_stops_further_fetches() {
        let cancel = CancellationToken::new();
        let source = Arc::new(
            ScriptedSource::new(
                vec![
                    Ok(vec![message(1)]),
                    Ok(vec![message(2)]),
                    Ok(vec![message(3)]),
                ],
                cancel.clone(),
            )
            .cancel_on_call(2),
        );
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let summary = Poller::new(
            source.clone(),
            Sinks::new().with_messages(tx),
            ListenOptions::default(),
            immediate(Duration::ZERO),
        )
        .run(cancel)
        .await;

        // The in-flight fetch completes and is dispatched; no third fetch.
        assert_eq!(source.offsets(), vec![1, 2]);
        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(summary.cursor, UpdateId(2));
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_fetches() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = Arc::new(ScriptedSource::new(vec![], cancel.clone()));

        let summary = Poller::new(
            source.clone(),
            Sinks::new(),
            ListenOptions::default(),
            RetryPolicy::default(),
        )
        .run(cancel)
        .await;

        assert!(source.offsets().is_empty());
        assert_eq!(summary, PollSummary::default());
    }

    #[tokio::test]
    async fn resumes_from_initial_cursor_and_passes_timeout() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(vec![], cancel.clone()));

        Poller::new(
            source.clone(),
            Sinks::new(),
            ListenOptions {
                timeout: Duration::from_secs(45),
                initial_cursor: UpdateId(41),
            },
            RetryPolicy::default(),
        )
        .run(cancel)
        .await;

        let calls = source.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, UpdateId(42));
        assert_eq!(calls[0].1, 45);
    }

    #[tokio::test]
    async fn full_bounded_sink_holds_back_next_fetch() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![Ok(vec![message(1), message(2)])],
            cancel.clone(),
        ));
        let (tx, mut rx) = mpsc::channel::<Message>(1);

        let poller = Poller::new(
            source.clone(),
            Sinks::new().with_messages(tx),
            ListenOptions::default(),
            immediate(Duration::ZERO),
        );
        let task = tokio::spawn(poller.run(cancel));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.offsets(), vec![1]);
        assert!(!task.is_finished());

        assert_eq!(rx.recv().await.map(|m| m.message_id.0), Some(10));
        assert_eq!(rx.recv().await.map(|m| m.message_id.0), Some(20));

        let summary = task.await.unwrap();
        assert_eq!(summary.cursor, UpdateId(2));
        assert_eq!(source.offsets(), vec![1, 3]);
    }

    #[tokio::test]
    async fn dropped_receiver_detaches_sink_without_stopping() {
        let cancel = CancellationToken::new();
        let source = Arc::new(ScriptedSource::new(
            vec![Ok(vec![message(1)]), Ok(vec![message(2), query(3)])],
            cancel.clone(),
        ));
        let (tx, rx) = mpsc::channel::<Message>(4);
        drop(rx);
        let (qtx, mut qrx) = mpsc::unbounded_channel::<InlineQuery>();

        let summary = Poller::new(
            source.clone(),
            Sinks::new().with_messages(tx).with_queries(qtx),
            ListenOptions::default(),
            immediate(Duration::ZERO),
        )
        .run(cancel)
        .await;

        assert_eq!(drain(&mut qrx).len(), 1);
        assert_eq!(summary.cursor, UpdateId(3));
        assert_eq!(summary.dropped, 2);
        assert_eq!(source.offsets(), vec![1, 2, 4]);
    }

    #[test]
    fn cursor_never_moves_back() {
        let mut st = PollState::new(UpdateId(10), RetryPolicy::default());
        st.advance(UpdateId(12));
        st.advance(UpdateId(11));
        st.advance(UpdateId(12));
        assert_eq!(st.cursor(), UpdateId(12));
    }
}
