//! End-to-end scenarios driving the full [`crate::consumer::ConsumerBuilder`]
//! stack against the hand-written mocks: no real broker involved, but every
//! layer (supervisor, worker, broadcaster, retry counter) wired up for real.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapin::message::Delivery;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionHandle;
use crate::consumer::ConsumerBuilder;
use crate::error::ConsumerError;
use crate::tests::logging::{assert_lines_in_order, LogBuf};
use crate::tests::mock::{fake_delivery, MockAction, MockChannel, MockConnection, MockConsumer};

const TIMEOUT: Duration = Duration::from_secs(1);

async fn with_timeout<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .expect("scenario timed out")
}

#[tokio::test]
async fn stops_cleanly_when_the_connection_stream_closes_without_ever_yielding() {
    let (tx, rx) = mpsc::unbounded_channel::<ConnectionHandle<MockConnection>>();
    drop(tx);

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", |_ctx: CancellationToken, _d: Delivery| async {})
        .unwrap()
        .start(UnboundedReceiverStream::new(rx));

    with_timeout(consumer.notify_closed().recv()).await;
    assert_eq!(consumer.retry_count(), 0);
}

#[tokio::test]
async fn init_failure_marks_unready_and_retries() {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = MockConnection::failing("dial tcp: connection refused");
    tx.send(ConnectionHandle::new(connection)).unwrap();
    drop(tx);

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", |_ctx: CancellationToken, _d: Delivery| async {})
        .unwrap()
        .with_retry_period(Duration::from_millis(10))
        .start(UnboundedReceiverStream::new(rx));

    let (_ready, unready) = consumer.notify(1, 1);
    let err = with_timeout(unready.recv()).await.unwrap();
    assert_eq!(
        err,
        ConsumerError::Init("dial tcp: connection refused".to_string())
    );

    with_timeout(consumer.notify_closed().recv()).await;
    assert_eq!(consumer.retry_count(), 1);
}

#[tokio::test]
async fn successful_run_dispatches_deliveries_then_reports_unready_on_cancel() {
    let (mock_consumer, feed) = MockConsumer::new();
    let channel = MockChannel::succeeding(mock_consumer);
    let connection = MockConnection::succeeding(channel);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(ConnectionHandle::new(connection)).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_handler = seen.clone();

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", move |_ctx: CancellationToken, delivery: Delivery| {
        let seen = seen_in_handler.clone();
        async move {
            seen.lock().unwrap().push(delivery.delivery_tag);
        }
    })
    .unwrap()
    .start(UnboundedReceiverStream::new(rx));

    let (ready, unready) = consumer.notify(1, 1);
    with_timeout(ready.recv()).await.unwrap();

    feed.send(MockAction::Delivery(fake_delivery(1))).unwrap();
    feed.send(MockAction::Delivery(fake_delivery(2))).unwrap();

    // Give the worker a moment to dispatch both before canceling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    feed.send(MockAction::Canceled).unwrap();

    let err = with_timeout(unready.recv()).await.unwrap();
    assert_eq!(err, ConsumerError::ConsumptionCanceled);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

    drop(tx);
    consumer.close();
    with_timeout(consumer.notify_closed().recv()).await;
}

#[tokio::test]
async fn channel_closed_fast_path_reconnects_without_bumping_retry_count() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_factory = calls.clone();

    let (first_consumer, first_feed) = MockConsumer::new();
    let (second_consumer, second_feed) = MockConsumer::new();
    let mut consumers = vec![Some(first_consumer), Some(second_consumer)];

    let connection = MockConnection::new(move || {
        let i = calls_in_factory.fetch_add(1, Ordering::SeqCst);
        let consumer = consumers
            .get_mut(i)
            .and_then(Option::take)
            .expect("factory called more times than the test expected");
        Ok(MockChannel::succeeding(consumer))
    });

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(ConnectionHandle::new(connection)).unwrap();

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", |_ctx: CancellationToken, _d: Delivery| async {})
        .unwrap()
        .start(UnboundedReceiverStream::new(rx));

    let (ready, _unready) = consumer.notify(1, 1);
    with_timeout(ready.recv()).await.unwrap();

    first_feed
        .send(MockAction::Closed("connection reset".to_string()))
        .unwrap();

    // Ready fires again once the fast-path reconnect completes.
    with_timeout(ready.recv()).await.unwrap();
    assert_eq!(consumer.retry_count(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    drop(second_feed);
    drop(tx);
    consumer.close();
    with_timeout(consumer.notify_closed().recv()).await;
}

/// Literal cold-start scenario: before any connection ever arrives, a
/// freshly registered observer sees the closed sentinel, and `Close()` alone
/// (never a connection being dropped) drives the consumer to `STOPPED`.
#[tokio::test]
async fn cold_start_then_close_emits_the_closed_sentinel_then_stops() {
    let (tx, rx) = mpsc::unbounded_channel::<ConnectionHandle<MockConnection>>();

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", |_ctx: CancellationToken, _d: Delivery| async {})
        .unwrap()
        .start(UnboundedReceiverStream::new(rx));

    let (_ready, unready) = consumer.notify(1, 1);
    let sentinel = with_timeout(unready.recv()).await.unwrap();
    assert_eq!(sentinel, ConsumerError::ConnectionClosed);

    // The stream is still open; only `close()` below ends the run.
    consumer.close();
    with_timeout(consumer.notify_closed().recv()).await;
    assert_eq!(consumer.retry_count(), 0);

    drop(tx);
}

/// Burst of 100 messages across ten simulated producers: the handler sees
/// every one of them, and each producer's own deliveries arrive in the order
/// it sent them (interleaving between producers is unconstrained).
#[tokio::test]
async fn burst_of_a_hundred_messages_is_fully_dispatched_with_per_producer_fifo() {
    const PRODUCERS: u64 = 10;
    const PER_PRODUCER: u64 = 10;

    let (mock_consumer, feed) = MockConsumer::new();
    let channel = MockChannel::succeeding(mock_consumer);
    let connection = MockConnection::succeeding(channel);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(ConnectionHandle::new(connection)).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_handler = seen.clone();

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", move |_ctx: CancellationToken, delivery: Delivery| {
        let seen = seen_in_handler.clone();
        async move {
            seen.lock().unwrap().push(delivery.delivery_tag);
        }
    })
    .unwrap()
    .start(UnboundedReceiverStream::new(rx));

    let (ready, _unready) = consumer.notify(1, 1);
    with_timeout(ready.recv()).await.unwrap();

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let feed = feed.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..PER_PRODUCER {
                let delivery_tag = producer * 1000 + seq;
                feed.send(MockAction::Delivery(fake_delivery(delivery_tag))).unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    with_timeout(async {
        loop {
            if seen.lock().unwrap().len() == (PRODUCERS * PER_PRODUCER) as usize {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 100);
    for producer in 0..PRODUCERS {
        let sequence: Vec<u64> = seen
            .iter()
            .filter(|tag| *tag / 1000 == producer)
            .map(|tag| tag % 1000)
            .collect();
        assert_eq!(sequence, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
    drop(seen);

    drop(tx);
    consumer.close();
    with_timeout(consumer.notify_closed().recv()).await;
}

/// Asserts the init-failure log sequence verbatim, exercising the capturing
/// `tracing` subscriber: sound here only because `#[tokio::test]` defaults to
/// a current-thread runtime, so the spawned supervisor task never leaves the
/// OS thread the subscriber was installed on.
#[tokio::test]
async fn init_failure_then_close_logs_the_expected_sequence() {
    let log = LogBuf::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(log.clone())
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (tx, rx) = mpsc::unbounded_channel();
    let connection = MockConnection::failing("the error");
    tx.send(ConnectionHandle::new(connection)).unwrap();
    drop(tx);

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", |_ctx: CancellationToken, _d: Delivery| async {})
        .unwrap()
        .with_retry_period(Duration::from_millis(400))
        .start(UnboundedReceiverStream::new(rx));

    let (_ready, unready) = consumer.notify(1, 1);
    with_timeout(unready.recv()).await.unwrap();

    consumer.close();
    with_timeout(consumer.notify_closed().recv()).await;

    assert_lines_in_order(
        &log.contents(),
        &[
            "consumer starting",
            "init func: the error",
            "consumer unready",
            "consumer stopped",
        ],
    );
}

#[tokio::test]
async fn handle_close_signal_forces_a_fresh_connection() {
    let (mock_consumer, _feed) = MockConsumer::new();
    let channel = MockChannel::succeeding(mock_consumer);
    let connection = MockConnection::succeeding(channel);

    let (tx, rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tx.send(ConnectionHandle::with_close_signal(connection.clone(), close_rx))
        .unwrap();

    let consumer = ConsumerBuilder::<MockConnection>::new("orders", |_ctx: CancellationToken, _d: Delivery| async {})
        .unwrap()
        .start(UnboundedReceiverStream::new(rx));

    let (ready, unready) = consumer.notify(1, 1);
    with_timeout(ready.recv()).await.unwrap();

    close_tx.send(()).unwrap();
    let err = with_timeout(unready.recv()).await.unwrap();
    assert_eq!(err, ConsumerError::ConnectionClosed);

    drop(tx);
    consumer.close();
    with_timeout(consumer.notify_closed().recv()).await;
}
