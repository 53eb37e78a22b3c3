//! Error types for the consumer.

use thiserror::Error as ThisError;

/// Errors that may be returned while constructing a [`crate::consumer::Consumer`].
///
/// These are all programmer errors: invalid configuration caught before the
/// supervisor ever starts.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The consumer was constructed with an empty queue name.
    #[error("queue name must not be empty")]
    EmptyQueueName,
}

/// Convenience type for a result with this crate's construction-time error.
pub type Result<T> = std::result::Result<T, Error>;

/// The reason a consumer is currently [`crate::state::State::Unready`].
///
/// Distinct from [`Error`]: this is a *runtime*, recoverable condition
/// broadcast to every registered observer, not a construction-time failure.
/// It is cloned into every observer's sink, so it cannot simply wrap
/// `lapin::Error` (which isn't `Clone`) or a boxed `dyn Error` — the
/// underlying error is captured as a formatted string at the point it's
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConsumerError {
    /// The initial sentinel: no connection has been established yet.
    #[error("broker connection closed")]
    ConnectionClosed,
    /// The broker canceled the consumption (e.g. the queue was deleted).
    #[error("consumption canceled")]
    ConsumptionCanceled,
    /// The init function failed to produce a channel.
    #[error("init func: {0}")]
    Init(String),
    /// Starting the consumption on an opened channel failed.
    #[error("ch.Consume: {0}")]
    Consume(String),
}
