//! The [`run_worker`] dispatch loop: given a live channel and consumption,
//! hands deliveries to the handler one at a time until the channel closes,
//! the broker cancels, or the supervisor asks it to stop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::channel::{AmqpChannel, ConsumeArgs, ConsumeEvent, DeliveryConsumer};
use crate::error::ConsumerError;
use crate::handler::Handler;

/// Why a subscription worker stopped running.
pub enum WorkerOutcome {
    /// The supervisor asked the worker to stop (`Close`, parent cancellation,
    /// connection stream closed, handle's close signal, or a new connection
    /// arriving).
    Stopped,
    /// The channel (or the underlying connection) closed.
    ChannelClosed,
    /// The broker canceled this consumption.
    ConsumptionCanceled,
    /// Starting the consumption failed.
    ConsumeFailed(ConsumerError),
}

/// Runs the dispatch loop for one `RUNNING` episode.
///
/// Startup: starts consuming from `queue` with `args`. On failure, logs
/// `ch.Consume: <err>`, closes the channel best-effort, and returns
/// [`WorkerOutcome::ConsumeFailed`] without ever entering the dispatch loop.
///
/// Dispatch: selects between the next delivery (dispatched to `handler`
/// synchronously, one at a time), the channel closing, the broker canceling,
/// and `stop` firing.
///
/// Teardown: regardless of exit reason, closes the channel best-effort.
/// "Already closed" is silent (see [`AmqpChannel::close`]); any other error
/// is logged at WARN and not propagated.
pub async fn run_worker<C: AmqpChannel>(
    channel: C,
    queue: String,
    args: ConsumeArgs,
    handler: Arc<dyn Handler>,
    ctx: CancellationToken,
    stop: CancellationToken,
) -> WorkerOutcome {
    debug!("worker starting");

    let mut consumer = match channel.consume(&queue, &args).await {
        Ok(consumer) => consumer,
        Err(e) => {
            error!("ch.Consume: {e}");
            close_channel(&channel).await;
            return WorkerOutcome::ConsumeFailed(ConsumerError::Consume(e.to_string()));
        }
    };

    let outcome = dispatch(&mut consumer, handler.as_ref(), &ctx, &stop).await;

    close_channel(&channel).await;
    debug!("worker stopped");
    outcome
}

/// The inner `select!` loop: one message at a time, no required priority
/// beyond `stop` being checked first so shutdown latency is bounded by the
/// in-flight handler invocation only.
async fn dispatch(
    consumer: &mut (impl DeliveryConsumer + ?Sized),
    handler: &(dyn Handler),
    ctx: &CancellationToken,
    stop: &CancellationToken,
) -> WorkerOutcome {
    loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => return WorkerOutcome::Stopped,

            event = consumer.next_event() => match event {
                ConsumeEvent::Delivery(delivery) => {
                    handler.handle(ctx.clone(), delivery).await;
                }
                ConsumeEvent::Closed(reason) => {
                    debug!("channel closed");
                    let _ = reason;
                    return WorkerOutcome::ChannelClosed;
                }
                ConsumeEvent::Canceled => {
                    debug!("consumption canceled");
                    return WorkerOutcome::ConsumptionCanceled;
                }
            },
        }
    }
}

async fn close_channel(channel: &(impl AmqpChannel + ?Sized)) {
    if let Err(e) = channel.close().await {
        warn!("channel close: {e}");
    }
}
