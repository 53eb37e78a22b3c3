//! The [`RetryCounter`], a monotonic count of consecutive `Unready` transitions.

use std::sync::RwLock;

use crate::state::State;

/// Counts consecutive `Unready` transitions, reset to zero on `Ready`.
///
/// The source drives this from a dedicated task fed by the broadcaster over
/// a channel. That composes naturally with a bidirectional Go channel, but
/// buys nothing here: the supervisor is the only writer, updates happen on
/// exactly the same transitions it already publishes through, and
/// `std::sync::RwLock` gives the "reads frequent, writes rare" access
/// pattern called for directly, with no extra task or leak to account for.
#[derive(Default)]
pub struct RetryCounter {
    count: RwLock<u64>,
}

impl RetryCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the counter for the given state: increments on `Unready`,
    /// resets to zero on `Ready`.
    pub fn record(&self, state: &State) {
        let mut count = self.count.write().unwrap();
        match state {
            State::Ready => *count = 0,
            State::Unready(_) => *count += 1,
        }
    }

    /// Returns the current count.
    pub fn get(&self) -> u64 {
        *self.count.read().unwrap()
    }
}
