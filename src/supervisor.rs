//! The session supervisor: the master state machine that consumes the
//! connection stream, opens channels, starts subscription workers, retries
//! on failure, and obeys shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::broadcaster::Broadcaster;
use crate::channel::ConsumeArgs;
use crate::connection::{AmqpConnection, ConnectionHandle, InitFn};
use crate::error::ConsumerError;
use crate::handler::Handler;
use crate::retry::RetryCounter;
use crate::state::State;
use crate::worker::{run_worker, WorkerOutcome};

/// The states named in the design: `WAITING_CONN`, `INITIALIZING`,
/// `RUNNING`, `RETRY_SLEEP`, `STOPPING`. `STOPPED` is not modeled as a phase
/// — it's the point at which [`run`] returns.
enum Phase {
    WaitingConn,
    Initializing,
    Running {
        worker_stop: CancellationToken,
        join: JoinHandle<WorkerOutcome>,
    },
    RetrySleep,
    Stopping,
}

/// The event that ended a `RUNNING` episode's select, decided before any of
/// `handle`/`worker_stop` is touched so the select itself never needs to
/// hold a borrow across branch bodies.
enum RunningEvent<C: AmqpConnection> {
    /// `close`/`ctx` fired.
    ExternalStop,
    /// The connection handle's own close signal fired.
    HandleClosed,
    /// A new connection arrived from the supplier (or the supplier closed).
    NewConnection(Option<ConnectionHandle<C>>),
    /// The worker task returned on its own.
    WorkerExited(WorkerOutcome),
}

/// Everything the supervisor needs for the lifetime of one consumer. Bundled
/// into a struct so the free functions below don't take a dozen parameters.
pub struct SupervisorConfig<C: AmqpConnection> {
    /// Queue to subscribe to.
    pub queue: String,
    /// Arguments for every consumption this supervisor starts.
    pub consume_args: ConsumeArgs,
    /// The user's delivery handler.
    pub handler: Arc<dyn Handler>,
    /// Turns a connection into a ready-to-consume channel.
    pub init: InitFn<C>,
    /// How long to wait between retry attempts.
    pub retry_period: Duration,
    /// External cancellation, independent of `close`.
    pub ctx: CancellationToken,
    /// Fires when the user calls `Consumer::close`.
    pub close: CancellationToken,
    /// Where state transitions are published.
    pub broadcaster: Arc<Broadcaster>,
    /// Fed by every published transition.
    pub retry_counter: Arc<RetryCounter>,
}

/// Runs the supervisor loop to completion. Returns once `STOPPED` is
/// reached; `stopped` is signaled at that point so [`crate::consumer::Consumer::notify_closed`]
/// can wake up.
pub async fn run<C, S>(mut connections: S, config: SupervisorConfig<C>, stopped: oneshot::Sender<()>)
where
    C: AmqpConnection,
    S: Stream<Item = ConnectionHandle<C>> + Send + Unpin,
{
    let SupervisorConfig {
        queue,
        consume_args,
        handler,
        init,
        retry_period,
        ctx,
        close,
        broadcaster,
        retry_counter,
    } = config;

    debug!("consumer starting");
    publish(&broadcaster, &retry_counter, State::Unready(ConsumerError::ConnectionClosed));

    let mut phase = Phase::WaitingConn;
    let mut handle: Option<ConnectionHandle<C>> = None;

    loop {
        phase = match phase {
            Phase::WaitingConn => {
                if handle.is_some() {
                    Phase::Initializing
                } else {
                    tokio::select! {
                        biased;

                        () = close.cancelled() => Phase::Stopping,
                        () = ctx.cancelled() => Phase::Stopping,

                        next = connections.next() => match next {
                            Some(h) => {
                                handle = Some(h);
                                Phase::Initializing
                            }
                            None => Phase::Stopping,
                        },
                    }
                }
            }

            Phase::Initializing => {
                let conn = handle
                    .as_ref()
                    .expect("connection handle set entering INITIALIZING")
                    .connection
                    .clone();

                match init(conn).await {
                    Ok(channel) => {
                        publish(&broadcaster, &retry_counter, State::Ready);
                        debug!("consumer ready");

                        let worker_stop = CancellationToken::new();
                        let join = tokio::spawn(run_worker(
                            channel,
                            queue.clone(),
                            consume_args.clone(),
                            handler.clone(),
                            ctx.clone(),
                            worker_stop.clone(),
                        ));

                        Phase::Running { worker_stop, join }
                    }
                    Err(e) => {
                        // `e`'s `Display` already renders as `init func: <err>`.
                        error!("{e}");
                        mark_unready(&broadcaster, &retry_counter, e);
                        Phase::RetrySleep
                    }
                }
            }

            Phase::Running { worker_stop, mut join } => {
                // Take the close signal out for the duration of the select so
                // there's no mutable borrow of `handle` alive once we need to
                // reassign it in the branch bodies below.
                let mut close_signal = handle
                    .as_mut()
                    .expect("connection handle set while RUNNING")
                    .close_signal
                    .take();

                let event = tokio::select! {
                    biased;

                    () = close.cancelled() => RunningEvent::ExternalStop,
                    () = ctx.cancelled() => RunningEvent::ExternalStop,
                    () = wait_close_signal(&mut close_signal) => RunningEvent::HandleClosed,
                    next = connections.next() => RunningEvent::NewConnection(next),
                    outcome = &mut join => RunningEvent::WorkerExited(outcome.expect("worker task panicked")),
                };

                // Restore the close signal; only matters for the branches
                // that keep the same handle alive (the fast path below).
                if let Some(h) = handle.as_mut() {
                    h.close_signal = close_signal;
                }

                match event {
                    RunningEvent::ExternalStop => {
                        worker_stop.cancel();
                        await_worker(&mut join).await;
                        mark_unready(&broadcaster, &retry_counter, ConsumerError::ConnectionClosed);
                        Phase::Stopping
                    }
                    RunningEvent::HandleClosed => {
                        worker_stop.cancel();
                        await_worker(&mut join).await;
                        handle = None;
                        mark_unready(&broadcaster, &retry_counter, ConsumerError::ConnectionClosed);
                        Phase::WaitingConn
                    }
                    RunningEvent::NewConnection(next) => {
                        worker_stop.cancel();
                        await_worker(&mut join).await;
                        mark_unready(&broadcaster, &retry_counter, ConsumerError::ConnectionClosed);
                        match next {
                            Some(h) => {
                                handle = Some(h);
                                Phase::WaitingConn
                            }
                            None => Phase::Stopping,
                        }
                    }
                    RunningEvent::WorkerExited(outcome) => match outcome {
                        // Only reachable if the worker happened to stop on its
                        // own at the same moment an external signal fired;
                        // re-entering WAITING_CONN is the safe default.
                        WorkerOutcome::Stopped => Phase::WaitingConn,
                        WorkerOutcome::ChannelClosed => {
                            // Fast path: no unready publish, retry immediately.
                            Phase::Initializing
                        }
                        WorkerOutcome::ConsumptionCanceled => {
                            mark_unready(&broadcaster, &retry_counter, ConsumerError::ConsumptionCanceled);
                            handle = None;
                            Phase::WaitingConn
                        }
                        WorkerOutcome::ConsumeFailed(e) => {
                            mark_unready(&broadcaster, &retry_counter, e);
                            Phase::RetrySleep
                        }
                    },
                }
            }

            Phase::RetrySleep => {
                let sleep = tokio::time::sleep(retry_period);
                tokio::pin!(sleep);

                tokio::select! {
                    biased;

                    () = close.cancelled() => Phase::Stopping,
                    () = ctx.cancelled() => Phase::Stopping,

                    next = connections.next() => match next {
                        Some(h) => {
                            handle = Some(h);
                            Phase::Initializing
                        }
                        None => Phase::Stopping,
                    },

                    () = &mut sleep => Phase::WaitingConn,
                }
            }

            Phase::Stopping => break,
        };
    }

    broadcaster.close();
    debug!("consumer stopped");
    let _ = stopped.send(());
}

fn publish(broadcaster: &Broadcaster, retry_counter: &RetryCounter, state: State) {
    retry_counter.record(&state);
    broadcaster.publish(state);
}

fn mark_unready(broadcaster: &Broadcaster, retry_counter: &RetryCounter, err: ConsumerError) {
    publish(broadcaster, retry_counter, State::Unready(err));
    debug!("consumer unready");
}

async fn await_worker(join: &mut JoinHandle<WorkerOutcome>) {
    if let Err(e) = join.await {
        error!("worker task panicked: {e}");
    }
}

async fn wait_close_signal(signal: &mut Option<oneshot::Receiver<()>>) {
    match signal {
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending::<()>().await,
    }
}
