use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::info;

use telepoll_core::{
    bot::Bot,
    config::Config,
    sinks::{Sink, Sinks},
    types::{CallbackQuery, InlineQuery, Message},
};
use telepoll_telegram::TelegramTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telepoll_core::logging::init("telepoll")?;

    let cfg = Config::load()?;
    let transport = Arc::new(TelegramTransport::from_config(&cfg)?);
    let bot = Arc::new(Bot::new(transport, cfg.retry_policy()).await?);

    let (messages, message_rx) = channel::<Message>(cfg.sink_capacity);
    let (queries, query_rx) = channel::<InlineQuery>(cfg.sink_capacity);
    let (callbacks, callback_rx) = channel::<CallbackQuery>(cfg.sink_capacity);

    let consumers = vec![
        spawn_consumer(message_rx, {
            let bot = bot.clone();
            move |m: Message| {
                if m.from.as_ref().is_some_and(|u| bot.is_self(u)) {
                    return;
                }
                info!(
                    chat_id = m.chat.id.0,
                    from = %m.from.as_ref().map(|u| u.display_name()).unwrap_or_default(),
                    text = m.body().unwrap_or(""),
                    "message"
                );
            }
        }),
        spawn_consumer(query_rx, |q: InlineQuery| {
            info!(id = %q.id, from = %q.from.display_name(), query = %q.query, "inline query");
        }),
        spawn_consumer(callback_rx, |c: CallbackQuery| {
            info!(
                id = %c.id,
                from = %c.from.display_name(),
                data = c.data.as_deref().unwrap_or(""),
                "callback"
            );
        }),
    ];

    let sinks = Sinks {
        messages: Some(messages),
        queries: Some(queries),
        callbacks: Some(callbacks),
    };
    let listener = bot.listen(sinks, cfg.listen_options());
    info!(
        username = bot.identity().username.as_deref().unwrap_or(""),
        "listening for updates (ctrl-c to stop)"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; waiting for the in-flight poll to finish");

    let summary = listener.shutdown().await?;
    info!(
        cursor = %summary.cursor,
        fetches = summary.fetches,
        delivered = summary.delivered,
        dropped = summary.dropped,
        failures = summary.failures,
        "poller stopped"
    );

    // The loop owned the last senders; consumers see end-of-stream now.
    for consumer in consumers {
        let _ = consumer.await;
    }

    Ok(())
}

enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Receiver<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Capacity 0 selects an unbounded channel.
fn channel<T>(capacity: usize) -> (Sink<T>, Receiver<T>) {
    if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx.into(), Receiver::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (tx.into(), Receiver::Bounded(rx))
    }
}

fn spawn_consumer<T, F>(mut rx: Receiver<T>, mut handle: F) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handle(event);
        }
    })
}
