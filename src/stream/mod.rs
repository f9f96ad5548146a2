//! Topic-based pub/sub for decoded market data
//!
//! Every produced message gets the next index of its topic. Consumers
//! start at the topic's current index, so they only see messages produced
//! after they subscribed. Each consumer drains its own bounded backlog;
//! a slow consumer loses its oldest messages instead of blocking the
//! producer. Handler failures are re-produced on the `errors` topic.

mod consumer;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::error::{MarketDataError, Result};
use consumer::Consumer;

pub use consumer::ConsumerId;

/// Topic receiving consumer failures
pub const ERRORS_TOPIC: &str = "errors";

const DEFAULT_MAX_BACKLOG: usize = 10;

/// A produced message as seen by consumers
#[derive(Debug, Clone, PartialEq)]
pub struct Message<P> {
    pub topic: String,
    /// Position in the topic, starting at 1
    pub index: u64,
    pub payload: Option<P>,
    pub error: Option<MarketDataError>,
}

#[derive(Debug)]
struct Topic<P> {
    history: VecDeque<Message<P>>,
    last_index: u64,
}

impl<P> Default for Topic<P> {
    fn default() -> Self {
        Self {
            history: VecDeque::new(),
            last_index: 0,
        }
    }
}

/// Cloneable handle to a pub/sub stream
pub struct Stream<P> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    /// 0 keeps the whole history
    max_messages_per_topic: usize,
    max_backlog: usize,
    topics: Mutex<HashMap<String, Topic<P>>>,
    consumers: Mutex<HashMap<String, Vec<Arc<Consumer<P>>>>>,
    next_id: AtomicU64,
}

impl<P> Clone for Stream<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Clone + Send + Sync + 'static> Default for Stream<P> {
    fn default() -> Self {
        Self::new(0, DEFAULT_MAX_BACKLOG)
    }
}

impl<P: Clone + Send + Sync + 'static> Stream<P> {
    pub fn new(max_messages_per_topic: usize, max_backlog: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_messages_per_topic,
                max_backlog,
                topics: Mutex::new(HashMap::new()),
                consumers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_messages_per_topic, config.consumer_max_backlog)
    }

    /// Publish `payload` on `topic`, returning its index
    pub async fn produce(&self, topic: &str, payload: P) -> u64 {
        self.produce_error(topic, Some(payload), None).await
    }

    /// Publish a message that may carry an error instead of (or next to) a payload
    ///
    /// Synchronous consumers have handled the message when this returns,
    /// including when another producer's drain was already running for
    /// them. Asynchronous ones run on their own tasks. A synchronous
    /// handler must not produce on its own topic.
    pub async fn produce_error(
        &self,
        topic: &str,
        payload: Option<P>,
        error: Option<MarketDataError>,
    ) -> u64 {
        let (index, consumers) = self.record(topic, payload, error);
        for consumer in consumers {
            let drain = consumer.clone().drain(self.clone());
            if consumer.synchronous {
                drain.await;
            } else {
                tokio::spawn(drain);
            }
        }
        index
    }

    /// Publish without waiting for any consumer
    pub(crate) fn produce_detached(
        &self,
        topic: &str,
        payload: Option<P>,
        error: Option<MarketDataError>,
    ) -> u64 {
        let (index, consumers) = self.record(topic, payload, error);
        for consumer in consumers {
            tokio::spawn(consumer.clone().drain(self.clone()));
        }
        index
    }

    /// Append to the topic history and queue for every consumer
    ///
    /// Runs under the topics lock so consumers receive indices in order.
    fn record(
        &self,
        topic: &str,
        payload: Option<P>,
        error: Option<MarketDataError>,
    ) -> (u64, Vec<Arc<Consumer<P>>>) {
        let mut topics = self.inner.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();
        entry.last_index += 1;

        let message = Message {
            topic: topic.to_string(),
            index: entry.last_index,
            payload,
            error,
        };

        let max = self.inner.max_messages_per_topic;
        if max > 0 {
            while entry.history.len() >= max {
                entry.history.pop_front();
            }
        }
        entry.history.push_back(message.clone());

        let consumers = self
            .inner
            .consumers
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or_default();
        for consumer in &consumers {
            consumer.publish(message.clone());
        }
        (message.index, consumers)
    }

    /// Register `handler` for messages produced on `topic` from now on
    ///
    /// A synchronous consumer is awaited by [`produce`](Self::produce);
    /// otherwise the producer does not wait for it.
    pub fn subscribe<F, Fut>(&self, topic: &str, handler: F, synchronous: bool) -> ConsumerId
    where
        F: Fn(Message<P>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: consumer::Handler<P> =
            Arc::new(move |message: Message<P>| -> BoxFuture<'static, Result<()>> {
                handler(message).boxed()
            });

        let topics = self.inner.topics.lock();
        let cursor = topics.get(topic).map_or(0, |t| t.last_index);
        let consumer = Arc::new(Consumer::new(
            id,
            handler,
            synchronous,
            cursor,
            self.inner.max_backlog,
        ));
        self.inner
            .consumers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(consumer);
        drop(topics);

        debug!(topic = %topic, consumer = id, synchronous, "Consumer subscribed");
        id
    }

    /// Remove a consumer; returns whether it was subscribed to `topic`
    pub fn unsubscribe(&self, topic: &str, id: ConsumerId) -> bool {
        let mut consumers = self.inner.consumers.lock();
        let Some(list) = consumers.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|consumer| consumer.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            consumers.remove(topic);
        }
        removed
    }

    /// Messages kept for `topic`, oldest first
    pub fn message_history(&self, topic: &str) -> Vec<Message<P>> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Index of the last message produced on `topic` (0 if none)
    pub fn last_index(&self, topic: &str) -> u64 {
        self.inner.topics.lock().get(topic).map_or(0, |t| t.last_index)
    }

    /// Undelivered messages queued for a consumer
    pub fn backlog_len(&self, topic: &str, id: ConsumerId) -> Option<usize> {
        self.inner
            .consumers
            .lock()
            .get(topic)?
            .iter()
            .find(|consumer| consumer.id == id)
            .map(|consumer| consumer.backlog_len())
    }

    pub fn consumer_count(&self, topic: &str) -> usize {
        self.inner.consumers.lock().get(topic).map_or(0, Vec::len)
    }

    /// Drop every topic and consumer
    pub fn close(&self) {
        self.inner.topics.lock().clear();
        self.inner.consumers.lock().clear();
        debug!("Stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn recorder(seen: Arc<Mutex<Vec<u64>>>) -> impl Fn(Message<u32>) -> futures_util::future::Ready<Result<()>> {
        move |message| {
            seen.lock().push(message.index);
            futures_util::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_consumer_only_sees_future_messages() {
        let stream: Stream<u32> = Stream::default();
        stream.produce("trades", 1).await;
        stream.produce("trades", 2).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        stream.subscribe("trades", recorder(seen.clone()), true);
        stream.produce("trades", 3).await;
        stream.produce("tickers", 4).await;

        assert_eq!(*seen.lock(), vec![3]);
        assert_eq!(stream.last_index("trades"), 3);
        assert_eq!(stream.message_history("trades").len(), 3);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let stream: Stream<u32> = Stream::new(2, 10);
        for i in 0..5 {
            stream.produce("ohlcv", i).await;
        }
        let history = stream.message_history("ohlcv");
        let indices: Vec<_> = history.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let stream: Stream<u32> = Stream::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = stream.subscribe("trades", recorder(seen.clone()), true);

        assert!(!stream.unsubscribe("orders", id));
        assert!(stream.unsubscribe("trades", id));
        assert!(!stream.unsubscribe("trades", id));

        stream.produce("trades", 1).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failures_go_to_errors_topic() {
        let stream: Stream<u32> = Stream::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        stream.subscribe(
            ERRORS_TOPIC,
            move |message: Message<u32>| {
                sink.lock().push((message.payload, message.error));
                futures_util::future::ready(Ok(()))
            },
            true,
        );

        let healthy = Arc::new(AtomicUsize::new(0));
        let counter = healthy.clone();
        stream.subscribe(
            "trades",
            |_message: Message<u32>| async { Err(MarketDataError::ParseError("bad trade".into())) },
            true,
        );
        stream.subscribe(
            "trades",
            move |_message: Message<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                futures_util::future::ready(Ok(()))
            },
            true,
        );

        stream.produce("trades", 7).await;
        // the errors topic is drained on its own task
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(healthy.load(Ordering::SeqCst), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, Some(7));
        assert!(matches!(
            &errors[0].1,
            Some(MarketDataError::ConsumerError { topic, .. }) if topic == "trades"
        ));
    }

    #[tokio::test]
    async fn test_errors_topic_failures_are_not_reproduced() {
        let stream: Stream<u32> = Stream::default();
        stream.subscribe(
            ERRORS_TOPIC,
            |_message: Message<u32>| async { Err(MarketDataError::ParseError("loop".into())) },
            true,
        );
        stream
            .produce_error(ERRORS_TOPIC, None, Some(MarketDataError::ParseError("x".into())))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stream.last_index(ERRORS_TOPIC), 1);
    }
}
