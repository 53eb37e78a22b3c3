//! The [`State`] published by the supervisor and observed through the broadcaster.

use crate::error::ConsumerError;

/// The operational state of a consumer at a point in time.
///
/// There are exactly two inhabitants; a consumer is always one or the other,
/// never both and never neither. See also the terminal `Closed` condition on
/// [`crate::consumer::Consumer`], which is distinct from this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// The subscription is active and dispatching messages.
    Ready,
    /// The subscription is not currently active, for the given reason.
    Unready(ConsumerError),
}

impl State {
    /// True if this is [`State::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, State::Ready)
    }
}
