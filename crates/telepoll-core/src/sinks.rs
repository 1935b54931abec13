//! Caller-owned output channels, one per event class.

use tokio::sync::mpsc;

use crate::{
    types::{CallbackQuery, InlineQuery, Message},
    update::{EventClass, Update, UpdateKind},
};

/// A channel the loop writes one class of events into.
///
/// Bounded sinks apply backpressure: a full channel blocks the loop (and with
/// it the next fetch) until the consumer drains.
#[derive(Debug)]
pub enum Sink<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        match self {
            Sink::Bounded(tx) => Sink::Bounded(tx.clone()),
            Sink::Unbounded(tx) => Sink::Unbounded(tx.clone()),
        }
    }
}

impl<T> From<mpsc::Sender<T>> for Sink<T> {
    fn from(tx: mpsc::Sender<T>) -> Self {
        Sink::Bounded(tx)
    }
}

impl<T> From<mpsc::UnboundedSender<T>> for Sink<T> {
    fn from(tx: mpsc::UnboundedSender<T>) -> Self {
        Sink::Unbounded(tx)
    }
}

/// The receiving side is gone.
#[derive(Debug, PartialEq, Eq)]
pub struct SinkClosed;

impl<T> Sink<T> {
    /// Send, waiting for capacity on bounded channels.
    pub async fn send(&self, value: T) -> Result<(), SinkClosed> {
        match self {
            Sink::Bounded(tx) => tx.send(value).await.map_err(|_| SinkClosed),
            Sink::Unbounded(tx) => tx.send(value).map_err(|_| SinkClosed),
        }
    }
}

/// Outcome of routing one update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered(EventClass),
    /// No sink for the class (or an unsupported envelope).
    Dropped,
    /// The sink's receiver was dropped; the sink is now detached.
    Closed(EventClass),
}

/// The set of output channels handed to the loop at start.
///
/// A `None` sink means "not interested": events of that class are discarded.
#[derive(Clone, Debug, Default)]
pub struct Sinks {
    pub messages: Option<Sink<Message>>,
    pub queries: Option<Sink<InlineQuery>>,
    pub callbacks: Option<Sink<CallbackQuery>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(mut self, sink: impl Into<Sink<Message>>) -> Self {
        self.messages = Some(sink.into());
        self
    }

    pub fn with_queries(mut self, sink: impl Into<Sink<InlineQuery>>) -> Self {
        self.queries = Some(sink.into());
        self
    }

    pub fn with_callbacks(mut self, sink: impl Into<Sink<CallbackQuery>>) -> Self {
        self.callbacks = Some(sink.into());
        self
    }

    /// Route one update to its sink.
    ///
    /// A sink that reports closed is removed so later events of that class are
    /// dropped without another send attempt.
    pub async fn route(&mut self, update: Update) -> Delivery {
        match update.kind {
            UpdateKind::Message(m) => {
                deliver(&mut self.messages, m, EventClass::Message).await
            }
            UpdateKind::InlineQuery(q) => {
                deliver(&mut self.queries, q, EventClass::InlineQuery).await
            }
            UpdateKind::CallbackQuery(c) => {
                deliver(&mut self.callbacks, c, EventClass::CallbackQuery).await
            }
            UpdateKind::Unsupported => Delivery::Dropped,
        }
    }
}

async fn deliver<T>(slot: &mut Option<Sink<T>>, value: T, class: EventClass) -> Delivery {
    let Some(sink) = slot.as_ref() else {
        return Delivery::Dropped;
    };
    match sink.send(value).await {
        Ok(()) => Delivery::Delivered(class),
        Err(SinkClosed) => {
            *slot = None;
            Delivery::Closed(class)
        }
    }
}
