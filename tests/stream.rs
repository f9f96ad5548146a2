//! Consumer dispatch and backpressure

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;

use market_data_stream::stream::ERRORS_TOPIC;
use market_data_stream::{MarketDataError, Message, Stream};

#[tokio::test]
async fn test_slow_consumer_backlog_is_bounded() {
    let stream: Stream<u64> = Stream::new(0, 10);
    let gate = Arc::new(Semaphore::new(0));
    let delivered = Arc::new(Mutex::new(Vec::new()));

    let (permits, seen) = (gate.clone(), delivered.clone());
    let id = stream.subscribe(
        "trades",
        move |message: Message<u64>| {
            let permits = permits.clone();
            let seen = seen.clone();
            async move {
                match permits.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => return Ok(()),
                }
                seen.lock().push(message.index);
                Ok(())
            }
        },
        false,
    );

    for i in 1..=25 {
        stream.produce("trades", i).await;
        let queued = stream.backlog_len("trades", id).unwrap();
        assert!(queued <= 10, "backlog grew to {queued}");
    }

    gate.add_permits(100);
    timeout(Duration::from_secs(5), async {
        loop {
            if delivered.lock().last() == Some(&25) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let delivered = delivered.lock().clone();
    // the producer never waited, so the oldest messages were dropped
    assert!(delivered.len() <= 11);
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(&delivered[delivered.len() - 10..], &(16..=25).collect::<Vec<_>>()[..]);
}

#[tokio::test]
async fn test_synchronous_consumers_run_in_order() {
    let stream: Stream<&'static str> = Stream::default();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second"] {
        let log = log.clone();
        stream.subscribe(
            "orders",
            move |message: Message<&'static str>| {
                let log = log.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().push(format!("{name}:{}", message.payload.unwrap_or_default()));
                    Ok(())
                }
            },
            true,
        );
    }

    stream.produce("orders", "a").await;
    stream.produce("orders", "b").await;

    assert_eq!(
        *log.lock(),
        vec!["first:a", "second:a", "first:b", "second:b"]
    );
}

#[tokio::test]
async fn test_close_drops_topics_and_consumers() {
    let stream: Stream<u8> = Stream::default();
    stream.subscribe("tickers", |_m: Message<u8>| async { Ok(()) }, true);
    stream.produce("tickers", 1).await;

    stream.close();
    assert_eq!(stream.consumer_count("tickers"), 0);
    assert!(stream.message_history("tickers").is_empty());
    assert_eq!(stream.last_index("tickers"), 0);
}

#[tokio::test]
async fn test_handler_panic_is_reported_and_consumer_keeps_running() {
    let stream: Stream<u32> = Stream::default();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    stream.subscribe(
        ERRORS_TOPIC,
        move |message: Message<u32>| {
            sink.lock().push((message.payload, message.error));
            async { Ok::<(), MarketDataError>(()) }
        },
        false,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let calls = seen.clone();
    stream.subscribe(
        "trades",
        move |message: Message<u32>| {
            if message.payload == Some(1) {
                panic!("unexpected trade");
            }
            calls.lock().push(message.payload);
            async { Ok::<(), MarketDataError>(()) }
        },
        false,
    );

    stream.produce("trades", 1).await;
    stream.produce("trades", 2).await;

    timeout(Duration::from_secs(5), async {
        while seen.lock().is_empty() || errors.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*seen.lock(), vec![Some(2)]);
    let errors = errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, Some(1));
    assert!(matches!(
        errors[0].1,
        Some(MarketDataError::ConsumerError { ref topic, .. }) if topic == "trades"
    ));
}

#[tokio::test]
async fn test_panicking_synchronous_handler_does_not_escape_produce() {
    let stream: Stream<u32> = Stream::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let calls = seen.clone();
    stream.subscribe(
        "orders",
        move |message: Message<u32>| {
            if message.payload == Some(1) {
                panic!("unexpected order");
            }
            calls.lock().push(message.payload);
            async { Ok::<(), MarketDataError>(()) }
        },
        true,
    );

    stream.produce("orders", 1).await;
    assert_eq!(stream.last_index(ERRORS_TOPIC), 1);

    stream.produce("orders", 2).await;
    assert_eq!(*seen.lock(), vec![Some(2)]);
}

#[tokio::test]
async fn test_synchronous_produce_waits_for_running_drain() {
    let stream: Stream<u32> = Stream::default();
    let entered = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let (signal, handled) = (entered.clone(), log.clone());
    stream.subscribe(
        "book",
        move |message: Message<u32>| {
            let signal = signal.clone();
            let handled = handled.clone();
            async move {
                if message.payload == Some(1) {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                handled.lock().push(message.payload.unwrap_or_default());
                Ok(())
            }
        },
        true,
    );

    let first = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.produce("book", 1).await })
    };
    entered.notified().await;

    // the first producer's drain is still inside the handler
    stream.produce("book", 2).await;
    assert_eq!(*log.lock(), vec![1, 2]);
    assert_eq!(first.await.unwrap(), 1);
}
