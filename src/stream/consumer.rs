use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use super::{Message, Stream, ERRORS_TOPIC};
use crate::error::{MarketDataError, Result};
use crate::metrics::metrics;

pub type ConsumerId = u64;

pub(crate) type Handler<P> = Arc<dyn Fn(Message<P>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One subscriber of a topic with its own cursor and bounded backlog
pub(crate) struct Consumer<P> {
    pub(crate) id: ConsumerId,
    pub(crate) synchronous: bool,
    handler: Handler<P>,
    /// Index of the last message handed to the handler
    cursor: AtomicU64,
    backlog: Mutex<VecDeque<Message<P>>>,
    max_backlog: usize,
    /// An asynchronous drain is in progress
    running: AtomicBool,
    /// Held by the drain of a synchronous consumer
    turn: tokio::sync::Mutex<()>,
}

impl<P: Clone + Send + Sync + 'static> Consumer<P> {
    pub(crate) fn new(
        id: ConsumerId,
        handler: Handler<P>,
        synchronous: bool,
        cursor: u64,
        max_backlog: usize,
    ) -> Self {
        Self {
            id,
            synchronous,
            handler,
            cursor: AtomicU64::new(cursor),
            backlog: Mutex::new(VecDeque::new()),
            max_backlog: max_backlog.max(1),
            running: AtomicBool::new(false),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue a message, dropping the oldest one once the backlog is full
    pub(crate) fn publish(&self, message: Message<P>) {
        let mut backlog = self.backlog.lock();
        backlog.push_back(message);
        if backlog.len() > self.max_backlog {
            if let Some(dropped) = backlog.pop_front() {
                metrics().consumer_dropped.inc();
                warn!(
                    topic = %dropped.topic,
                    index = dropped.index,
                    consumer = self.id,
                    backlog = backlog.len(),
                    "Consumer backlog full, dropping oldest message"
                );
            }
        }
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    fn next(&self) -> Option<Message<P>> {
        self.backlog.lock().pop_front()
    }

    /// Hand queued messages to the handler in order
    ///
    /// A synchronous consumer drains under its turn lock, so a producer
    /// that finds another drain in progress waits for it to finish. An
    /// asynchronous consumer runs at most one drain; a second call returns
    /// at once and leaves its messages to the running one.
    pub(crate) fn drain(self: Arc<Self>, stream: Stream<P>) -> BoxFuture<'static, ()> {
        async move {
            if self.synchronous {
                let _turn = self.turn.lock().await;
                while let Some(message) = self.next() {
                    self.handle(message, &stream).await;
                }
                return;
            }

            if self.running.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                {
                    let _running = Running(&self.running);
                    while let Some(message) = self.next() {
                        self.handle(message, &stream).await;
                    }
                }

                // a message published after the last pop but before the flag
                // was cleared has no drain to pick it up
                let idle = self.backlog.lock().is_empty();
                if idle || self.running.swap(true, Ordering::AcqRel) {
                    break;
                }
            }
        }
        .boxed()
    }

    async fn handle(&self, message: Message<P>, stream: &Stream<P>) {
        if message.index <= self.cursor.load(Ordering::Acquire) {
            return;
        }
        self.cursor.store(message.index, Ordering::Release);

        let topic = message.topic.clone();
        let payload = message.payload.clone();
        let panicked = || MarketDataError::ConsumerError {
            topic: topic.clone(),
            message: "handler panicked".to_string(),
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(message))) {
            Ok(handled) => AssertUnwindSafe(handled)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(panicked())),
            Err(_) => Err(panicked()),
        };

        let Err(e) = outcome else {
            return;
        };

        if topic == ERRORS_TOPIC {
            error!(consumer = self.id, error = %e, "Consumer on the errors topic failed");
            return;
        }

        warn!(topic = %topic, consumer = self.id, error = %e, "Consumer failed");
        let error = match e {
            MarketDataError::ConsumerError { .. } => e,
            other => MarketDataError::ConsumerError {
                topic: topic.clone(),
                message: other.to_string(),
            },
        };
        stream.produce_detached(ERRORS_TOPIC, payload, Some(error));
    }
}

/// Clears the drain flag even if the drain is dropped mid-message
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
