//! Unit tests for [`Broadcaster`]'s registration and collapsing behavior.

use std::time::Duration;

use crate::broadcaster::Broadcaster;
use crate::error::ConsumerError;
use crate::state::State;

#[test]
#[should_panic(expected = "ready chan is unbuffered")]
fn register_panics_on_zero_ready_capacity() {
    let b = Broadcaster::new(State::Ready);
    b.register(0, 1);
}

#[test]
#[should_panic(expected = "unready chan is unbuffered")]
fn register_panics_on_zero_unready_capacity() {
    let b = Broadcaster::new(State::Ready);
    b.register(1, 0);
}

#[tokio::test]
async fn register_seeds_from_current_state() {
    let b = Broadcaster::new(State::Unready(ConsumerError::ConnectionClosed));
    let (ready, unready) = b.register(1, 1);

    let err = tokio::time::timeout(Duration::from_millis(50), unready.recv())
        .await
        .expect("unready should already be pending")
        .expect("broadcaster is not closed");
    assert_eq!(err, ConsumerError::ConnectionClosed);

    // Nothing pending on the ready side.
    assert!(tokio::time::timeout(Duration::from_millis(20), ready.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn publish_collapses_repeated_unready_but_preserves_a_later_ready() {
    let b = Broadcaster::new(State::Ready);
    let (ready, unready) = b.register(1, 1);

    // Drain the initial ready sentinel.
    ready.recv().await.unwrap();

    // A slow observer that never reads in between still sees Ready -> Unready
    // -> Ready as exactly one unready value followed by one ready value, not
    // every intermediate transition.
    b.publish(State::Unready(ConsumerError::ConnectionClosed));
    b.publish(State::Unready(ConsumerError::ConsumptionCanceled));
    b.publish(State::Ready);

    let got_ready = tokio::time::timeout(Duration::from_millis(50), ready.recv())
        .await
        .expect("ready pending")
        .expect("not closed");
    assert_eq!(got_ready, ());

    // The unready sink was cleared by the final Ready publish.
    assert!(tokio::time::timeout(Duration::from_millis(20), unready.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn close_unblocks_pending_receivers_with_none() {
    let b = Broadcaster::new(State::Unready(ConsumerError::ConnectionClosed));
    let (ready, unready) = b.register(1, 1);
    unready.recv().await.unwrap();

    b.close();

    assert_eq!(ready.recv().await, None);
    assert_eq!(unready.recv().await, None);
}

#[tokio::test]
async fn register_after_close_returns_already_closed_sinks() {
    let b = Broadcaster::new(State::Ready);
    b.close();

    let (ready, unready) = b.register(1, 1);
    assert_eq!(ready.recv().await, None);
    assert_eq!(unready.recv().await, None);
}
