//! The [`Consumer`] facade: construction with options, the background
//! supervisor it starts, and the lifecycle handle returned to callers.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::broadcaster::{Broadcaster, ReadyReceiver, UnreadyReceiver};
use crate::channel::ConsumeArgs;
use crate::connection::{default_init, AmqpConnection, ConnectionHandle, InitFn};
use crate::error::{ConsumerError, Error, Result};
use crate::handler::Handler;
use crate::retry::RetryCounter;
use crate::state::State;
use crate::supervisor::{self, SupervisorConfig};

/// Builds a [`Consumer`]. See the `with_*` methods for the recognized
/// options; everything else has a sensible default.
#[must_use = "call `.start` to actually run the consumer."]
pub struct ConsumerBuilder<C: AmqpConnection> {
    queue: String,
    handler: Arc<dyn Handler>,
    init: InitFn<C>,
    retry_period: Duration,
    consume_args: ConsumeArgs,
    ctx: CancellationToken,
}

impl<C: AmqpConnection> ConsumerBuilder<C> {
    /// The default period between reconnect attempts.
    pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

    /// Creates a new builder for the given queue and handler.
    ///
    /// # Errors
    /// Returns [`Error::EmptyQueueName`] if `queue` is empty.
    pub fn new(queue: impl Into<String>, handler: impl Handler) -> Result<Self> {
        let queue = queue.into();
        if queue.is_empty() {
            return Err(Error::EmptyQueueName);
        }

        Ok(Self {
            queue,
            handler: Arc::new(handler),
            init: default_init::<C>(),
            retry_period: Self::DEFAULT_RETRY_PERIOD,
            consume_args: ConsumeArgs::new(),
            ctx: CancellationToken::new(),
        })
    }

    /// Overrides external cancellation. By default the consumer is only
    /// ever stopped via [`Consumer::close`].
    pub fn with_context(mut self, ctx: CancellationToken) -> Self {
        self.ctx = ctx;
        self
    }

    /// Sets the period between reconnect attempts. Defaults to 5 seconds.
    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    /// Sets the arguments every consumption this consumer starts will use.
    pub fn with_consume_args(mut self, consume_args: ConsumeArgs) -> Self {
        self.consume_args = consume_args;
        self
    }

    /// Overrides the step that turns a connection into a ready-to-consume
    /// channel. The default just opens a fresh channel; override this to
    /// also declare queues and bindings atomically with channel creation.
    pub fn with_init(mut self, init: InitFn<C>) -> Self {
        self.init = init;
        self
    }

    /// Starts the supervisor on a background task and returns a handle to
    /// it. `connections` is the connection supplier: its closure means "no
    /// more connections will ever arrive".
    pub fn start<S>(self, connections: S) -> Consumer
    where
        S: Stream<Item = ConnectionHandle<C>> + Send + Unpin + 'static,
        C: 'static,
    {
        // Seeded synchronously so a `notify` call right after `start`
        // observes the initial sentinel immediately, even before the
        // supervisor task has had a chance to run.
        let broadcaster = Arc::new(Broadcaster::new(State::Unready(
            ConsumerError::ConnectionClosed,
        )));
        let retry_counter = Arc::new(RetryCounter::new());
        let close = CancellationToken::new();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let config = SupervisorConfig {
            queue: self.queue,
            consume_args: self.consume_args,
            handler: self.handler,
            init: self.init,
            retry_period: self.retry_period,
            ctx: self.ctx,
            close: close.clone(),
            broadcaster: broadcaster.clone(),
            retry_counter: retry_counter.clone(),
        };

        tokio::spawn(supervisor::run(connections, config, stopped_tx));
        tokio::spawn(async move {
            // Fires `NotifyClosed` exactly once, after STOPPED is reached.
            let _ = stopped_rx.await;
            let _ = closed_tx.send(true);
        });

        Consumer {
            broadcaster,
            retry_counter,
            close,
            closed_rx,
        }
    }
}

/// A handle to a running consumer's lifecycle. Dropping it does not stop
/// the consumer — call [`Consumer::close`] for that.
pub struct Consumer {
    broadcaster: Arc<Broadcaster>,
    retry_counter: Arc<RetryCounter>,
    close: CancellationToken,
    closed_rx: watch::Receiver<bool>,
}

impl Consumer {
    /// Registers a new observer pair, seeded with the current state.
    ///
    /// # Panics
    /// Panics with `"ready chan is unbuffered"` / `"unready chan is
    /// unbuffered"` if either capacity is zero.
    pub fn notify(&self, ready_capacity: usize, unready_capacity: usize) -> (ReadyReceiver, UnreadyReceiver) {
        self.broadcaster.register(ready_capacity, unready_capacity)
    }

    /// The number of consecutive `Unready` transitions since the last
    /// `Ready`. Exposed for operational metrics.
    pub fn retry_count(&self) -> u64 {
        self.retry_counter.get()
    }

    /// Idempotent: requests shutdown and returns immediately. Await
    /// completion via [`Consumer::notify_closed`].
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Returns a receiver that becomes readable exactly once, after the
    /// supervisor has reached `STOPPED`.
    pub fn notify_closed(&self) -> ClosedReceiver {
        ClosedReceiver(self.closed_rx.clone())
    }
}

/// Fires once, after the consumer has fully stopped.
pub struct ClosedReceiver(watch::Receiver<bool>);

impl ClosedReceiver {
    /// Waits for the consumer to reach `STOPPED`. Returns immediately if it
    /// already has.
    pub async fn recv(&mut self) {
        loop {
            if *self.0.borrow() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}
