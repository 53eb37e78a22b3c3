//! Unit tests for [`RetryCounter`].

use crate::error::ConsumerError;
use crate::retry::RetryCounter;
use crate::state::State;

#[test]
fn starts_at_zero() {
    let c = RetryCounter::new();
    assert_eq!(c.get(), 0);
}

#[test]
fn increments_on_each_unready() {
    let c = RetryCounter::new();
    c.record(&State::Unready(ConsumerError::ConnectionClosed));
    c.record(&State::Unready(ConsumerError::ConsumptionCanceled));
    c.record(&State::Unready(ConsumerError::Init("boom".into())));
    assert_eq!(c.get(), 3);
}

#[test]
fn resets_to_zero_on_ready() {
    let c = RetryCounter::new();
    c.record(&State::Unready(ConsumerError::ConnectionClosed));
    c.record(&State::Unready(ConsumerError::ConnectionClosed));
    c.record(&State::Ready);
    assert_eq!(c.get(), 0);

    c.record(&State::Unready(ConsumerError::ConnectionClosed));
    assert_eq!(c.get(), 1);
}
